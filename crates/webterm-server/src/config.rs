//! Server configuration: TOML file + CLI overrides.

use crate::rate_limit::{RateLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
use crate::session::ShellCommand;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::info;
use webterm_core::{TermError, TermResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[shell]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellSection {
    /// Program to run; falls back to `$SHELL`, then `bash`.
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for new shells (`~` expanded).
    pub cwd: Option<String>,
    /// Extra environment for new shells.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[rate_limit]` section: per-address allowance for create and resize.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitSection {
    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(self.max_requests, self.window_secs)
    }
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}
fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    23000
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shell: ShellCommand,
    pub rate_limit: RateLimitSection,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_shell: Option<&str>,
    ) -> TermResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| TermError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let host = cli_host
            .map(str::to_string)
            .unwrap_or(file_config.server.host);
        let port = cli_port.unwrap_or(file_config.server.port);

        let program = cli_shell
            .map(str::to_string)
            .or(file_config.shell.program)
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "bash".to_string());

        let mut shell = ShellCommand::new(program);
        shell.args = file_config.shell.args;
        shell.env = file_config.shell.env.into_iter().collect();
        shell.cwd = file_config.shell.cwd.as_deref().map(expand_tilde_str);

        Ok(Self {
            host,
            port,
            shell,
            rate_limit: file_config.rate_limit,
        })
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> TermResult<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| TermError::Config(format!("invalid host {:?}: {e}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
