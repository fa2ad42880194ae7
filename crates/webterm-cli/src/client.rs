//! HTTP and WebSocket client for the webterm server.
//!
//! Request/response calls retry with exponential backoff on connection
//! failures and 5xx answers; client errors are returned immediately.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use webterm_core::{Dimensions, SessionId};

pub type TerminalSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Option<Duration>,
    pub max_attempts: u32,
}

impl Backoff {
    /// Schedule for HTTP calls: 200ms * 1.25^attempt, 50 attempts.
    pub const HTTP: Backoff = Backoff {
        base: Duration::from_millis(200),
        factor: 1.25,
        max_delay: None,
        max_attempts: 50,
    };

    /// Schedule for WebSocket reconnects: 500ms growing by 1.3x, capped at 7s.
    pub const RECONNECT: Backoff = Backoff {
        base: Duration::from_millis(500),
        factor: 1.3,
        max_delay: Some(Duration::from_secs(7)),
        max_attempts: 50,
    };

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self
            .base
            .mul_f64(self.factor.powi(attempt.min(64) as i32));
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// A live session as reported by `GET /terminals`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub attachments: usize,
    pub history_bytes: usize,
    pub age_secs: u64,
}

pub struct WebTermClient {
    http: reqwest::Client,
    base: String,
    retry: Backoff,
}

impl WebTermClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            retry: Backoff::HTTP,
        }
    }

    /// `POST /terminals`, returning the new session id.
    pub async fn create(&self, size: Dimensions) -> Result<SessionId> {
        let url = format!("{}/terminals?cols={}&rows={}", self.base, size.cols, size.rows);
        let response = self.send(|| self.http.post(&url)).await?;
        let body = expect_status(response, StatusCode::CREATED).await?;
        let id = body
            .trim()
            .parse()
            .with_context(|| format!("server returned an invalid pid: {body:?}"))?;
        debug!(id, "got pid from server");
        Ok(id)
    }

    /// `POST /terminals/:pid/size`.
    pub async fn resize(&self, id: SessionId, size: Dimensions) -> Result<()> {
        let url = format!(
            "{}/terminals/{id}/size?cols={}&rows={}",
            self.base, size.cols, size.rows
        );
        let response = self.send(|| self.http.post(&url)).await?;
        expect_status(response, StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    /// `GET /terminals`.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let url = format!("{}/terminals", self.base);
        let response = self.send(|| self.http.get(&url)).await?;
        let body = expect_status(response, StatusCode::OK).await?;
        serde_json::from_str(&body).context("failed to decode session list")
    }

    /// Whether `id` is still a live session on the server.
    pub async fn is_alive(&self, id: SessionId) -> Result<bool> {
        Ok(self.list().await?.iter().any(|s| s.id == id))
    }

    /// Open the attachment WebSocket for `id`.
    pub async fn connect(&self, id: SessionId) -> Result<TerminalSocket> {
        let url = attach_url(&self.base, id)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        Ok(socket)
    }

    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let retryable = match build().send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) => anyhow!("server answered {}", response.status()),
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => anyhow!(e),
                Err(e) => return Err(e).context("request failed"),
            };
            if attempt + 1 >= self.retry.max_attempts {
                return Err(retryable.context(format!("giving up after {} attempts", attempt + 1)));
            }
            let delay = self.retry.delay(attempt);
            warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %retryable, "retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

async fn expect_status(response: Response, expected: StatusCode) -> Result<String> {
    let status = response.status();
    let body = response.text().await.context("failed to read response body")?;
    if status == expected {
        return Ok(body);
    }
    match status {
        StatusCode::NOT_FOUND => bail!("terminal not found"),
        StatusCode::BAD_REQUEST => bail!("bad request: {body}"),
        other => bail!("unexpected status {other}: {body}"),
    }
}

/// Map an `http(s)://` base URL to the `ws(s)://` attach URL for `id`.
pub fn attach_url(base: &str, id: SessionId) -> Result<String> {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        bail!("unsupported server URL: {base}");
    };
    Ok(format!("{ws_base}/terminals/{id}"))
}
