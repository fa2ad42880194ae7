//! webterm: client for a webterm server.
//!
//! Creates, resizes and lists remote terminals over HTTP, and attaches to
//! them interactively over WebSocket.

mod client;
mod commands;
mod config;
mod terminal;

use clap::{Parser, Subcommand};
use client::WebTermClient;
use std::path::PathBuf;
use tracing::error;
use webterm_core::SessionId;

/// webterm: remote terminals over WebSockets
#[derive(Parser)]
#[command(name = "webterm", version, about = "Client for remote terminals served over WebSockets")]
struct Cli {
    /// Server base URL (overrides the config file)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a terminal and print its pid
    Create {
        /// Columns (defaults to the local terminal width)
        #[arg(long)]
        cols: Option<u16>,
        /// Rows (defaults to the local terminal height)
        #[arg(long)]
        rows: Option<u16>,
    },

    /// Resize a terminal
    Resize {
        pid: SessionId,
        #[arg(long)]
        cols: u16,
        #[arg(long)]
        rows: u16,
    },

    /// List live terminals
    Sessions,

    /// Attach interactively (creates a terminal when no pid is given)
    Attach {
        pid: Option<SessionId>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("webterm=debug,webterm_core=debug")
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("webterm=warn")
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.clone().map(PathBuf::from).unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".webterm").join("config.toml")
    });
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e:#}");
            config::Config::default()
        }
    };
    let server = cli.server.unwrap_or(cfg.default.server);
    let client = WebTermClient::new(&server);

    let result = match cli.command {
        Some(Command::Create { cols, rows }) => commands::create::run(&client, cols, rows).await,
        Some(Command::Resize { pid, cols, rows }) => {
            commands::resize::run(&client, pid, cols, rows).await
        }
        Some(Command::Sessions) => commands::sessions::run(&client).await,
        Some(Command::Attach { pid }) => commands::attach::run(&client, pid).await,
        None => commands::attach::run(&client, None).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("webterm: {e:#}");
        std::process::exit(1);
    }
}
