use thiserror::Error;

/// Errors produced by the webterm session core and its transports.
#[derive(Debug, Error)]
pub enum TermError {
    /// Bad or missing request input. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    #[error("failed to spawn terminal: {0}")]
    Spawn(String),

    #[error("session not found: {0}")]
    SessionNotFound(u32),

    #[error("session already registered: {0}")]
    SessionExists(u32),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    /// Too many requests from one client address within the limiter window.
    #[error("rate limit exceeded for {0}")]
    RateLimited(std::net::IpAddr),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TermError {
    /// Whether the caller can fix this by retrying with corrected input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TermError::Validation(_) | TermError::SessionNotFound(_) | TermError::RateLimited(_)
        )
    }
}

pub type TermResult<T> = Result<T, TermError>;
