//! HTTP surface: routes requests onto the [`SessionService`].
//!
//! | Method | Path                      | Result                                   |
//! |--------|---------------------------|------------------------------------------|
//! | POST   | `/terminals?cols&rows`    | `201` id as text, `400`, `429`, `500`    |
//! | POST   | `/terminals/:pid/size`    | `204`, `400`, `404`, `429`               |
//! | GET    | `/terminals/:pid`         | WebSocket: history, then live output     |
//! | GET    | `/terminals/:pid/history` | `200` raw history bytes, `404`           |
//! | GET    | `/terminals`              | `200` JSON list of live sessions         |
//! | GET    | `/version`                | `200` server version                     |
//!
//! Create and resize share one per-address [`RateLimiter`].

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::session::{SessionInfo, SessionService};
use crate::transport::WebSocketTransport;
use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use webterm_core::{parse_session_id, Dimensions, TermError, TermResult};

/// Body of every `429` answer.
pub const RATE_LIMIT_MESSAGE: &str =
    "Too many requests from this IP, please try again after 1 minute";

/// How often idle limiter entries are dropped.
const RATE_LIMIT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// `cols`/`rows` query parameters, validated by [`Dimensions::parse`].
#[derive(Debug, Default, Deserialize)]
pub struct SizeQuery {
    pub cols: Option<String>,
    pub rows: Option<String>,
}

impl SizeQuery {
    fn dimensions(&self) -> TermResult<Dimensions> {
        Dimensions::parse(self.cols.as_deref(), self.rows.as_deref())
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionService>,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>, limiter: RateLimiter) -> Self {
        Self {
            sessions,
            limiter: Arc::new(Mutex::new(limiter)),
        }
    }

    async fn check_rate(&self, addr: SocketAddr) -> TermResult<()> {
        let ip = addr.ip();
        if self.limiter.lock().await.check_and_record(ip) {
            Ok(())
        } else {
            Err(TermError::RateLimited(ip))
        }
    }
}

/// Maps a [`TermError`] onto an HTTP status with a plain-text body.
pub struct ApiError(TermError);

impl From<TermError> for ApiError {
    fn from(e: TermError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_client_error() {
            debug!(error = %self.0, "rejected request");
        } else {
            error!(error = %self.0, "request failed");
        }
        let (status, body) = match self.0 {
            TermError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            TermError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "Terminal not found".into()),
            TermError::RateLimited(_) => {
                (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE.into())
            }
            TermError::Spawn(_) | TermError::SessionExists(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error creating terminal".into(),
            ),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, body).into_response()
    }
}

/// Build the router. Serve it with `into_make_service_with_connect_info::<SocketAddr>()`
/// so the limiter can see client addresses.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/terminals", post(create_terminal).get(list_terminals))
        .route("/terminals/:pid", get(attach_terminal))
        .route("/terminals/:pid/size", post(resize_terminal))
        .route("/terminals/:pid/history", get(terminal_history))
        .route("/version", get(version))
        .with_state(state)
}

async fn create_terminal(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<SizeQuery>,
) -> Result<(StatusCode, String), ApiError> {
    state.check_rate(addr).await?;
    let size = query.dimensions()?;
    let id = state.sessions.create(size).await?;
    Ok((StatusCode::CREATED, id.to_string()))
}

async fn resize_terminal(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(pid): Path<String>,
    Query(query): Query<SizeQuery>,
) -> Result<StatusCode, ApiError> {
    state.check_rate(addr).await?;
    let size = query.dimensions()?;
    let id = parse_session_id(&pid)?;
    state.sessions.resize(id, size).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_terminal(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let id = parse_session_id(&pid)?;
    let sessions = state.sessions;
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = sessions.attach(id, WebSocketTransport::new(socket)).await {
            debug!(session_id = id, error = %e, "websocket attachment ended");
        }
    }))
}

async fn terminal_history(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_session_id(&pid)?;
    let history = state.sessions.history(id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], history).into_response())
}

async fn list_terminals(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list().await)
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// The webterm server instance.
pub struct WebTermServer {
    config: ServerConfig,
    sessions: Arc<SessionService>,
}

impl WebTermServer {
    pub fn new(config: ServerConfig) -> Self {
        let sessions = Arc::new(SessionService::new(config.shell.clone()));
        Self { config, sessions }
    }

    /// Serve until `shutdown` resolves, then kill every live terminal.
    pub async fn run<F>(self, shutdown: F) -> TermResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            shell = %self.config.shell.program,
            max_requests = self.config.rate_limit.max_requests,
            window_secs = self.config.rate_limit.window_secs,
            "app listening"
        );

        let state = AppState::new(self.sessions.clone(), self.config.rate_limit.limiter());
        let gc = tokio::spawn(gc_rate_limits(state.limiter.clone()));

        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        gc.abort();
        if let Err(ref e) = result {
            error!(error = %e, "server error");
        }

        self.sessions.shutdown().await;
        result.map_err(TermError::Io)
    }
}

/// Periodically drop limiter entries whose window has passed.
async fn gc_rate_limits(limiter: Arc<Mutex<RateLimiter>>) {
    let mut interval = tokio::time::interval(RATE_LIMIT_GC_INTERVAL);
    loop {
        interval.tick().await;
        let mut limiter = limiter.lock().await;
        limiter.gc();
        debug!(tracked = limiter.tracked(), "rate limiter gc");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ShellCommand;
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::{SinkExt, StreamExt};
    use http_body_util::BodyExt;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    fn sessions() -> Arc<SessionService> {
        Arc::new(SessionService::new(ShellCommand::new("/bin/sh")))
    }

    fn app(svc: Arc<SessionService>) -> Router {
        router(AppState::new(svc, RateLimiter::default()))
    }

    fn client(last_octet: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)), 40000)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, String) {
        call_from(app, client(1), method, uri).await
    }

    async fn call_from(
        app: &Router,
        from: SocketAddr,
        method: &str,
        uri: &str,
    ) -> (StatusCode, String) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(from));
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn create_resize_scenario() {
        let svc = sessions();
        let app = app(svc.clone());

        let (status, body) = call(&app, "POST", "/terminals?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::CREATED);
        let pid: u32 = body.parse().unwrap();

        let (status, body) = call(&app, "POST", &format!("/terminals/{pid}/size?cols=100&rows=40")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (status, body) = call(&app, "POST", "/terminals/999999/size?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Terminal not found");

        let (status, body) = call(&app, "POST", "/terminals?cols=x&rows=24").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "`cols` must be parsable as a positive integer");

        svc.shutdown().await;
    }

    #[tokio::test]
    async fn validation_errors() {
        let app = app(sessions());

        let (status, body) = call(&app, "POST", "/terminals?cols=80").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "`cols` and `rows` are required");

        let (status, body) = call(&app, "POST", "/terminals/abc/size?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "`pid` must be parsable as integer");

        let (status, _) = call(&app, "POST", "/terminals/1/size?cols=0&rows=24").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn spawn_failure_is_internal_error() {
        let app = app(Arc::new(SessionService::new(ShellCommand::new("/no/such/shell"))));
        let (status, body) = call(&app, "POST", "/terminals?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Error creating terminal");
    }

    #[tokio::test]
    async fn list_and_version() {
        let svc = sessions();
        let app = app(svc.clone());

        let (_, body) = call(&app, "POST", "/terminals?cols=90&rows=30").await;
        let pid: u32 = body.parse().unwrap();

        let (status, body) = call(&app, "GET", "/terminals").await;
        assert_eq!(status, StatusCode::OK);
        let list: serde_json::Value = serde_json::from_str(&body).unwrap();
        let entry = &list.as_array().unwrap()[0];
        assert_eq!(entry["id"], pid);
        assert_eq!(entry["cols"], 90);
        assert_eq!(entry["rows"], 30);

        let (status, body) = call(&app, "GET", "/version").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, env!("CARGO_PKG_VERSION"));

        svc.shutdown().await;
    }

    async fn serve(svc: Arc<SessionService>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = app(svc).into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn websocket_attach_replays_and_forwards_input() {
        let svc = sessions();
        let addr = serve(svc.clone()).await;
        let id = svc.create(Dimensions::new(80, 24).unwrap()).await.unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/terminals/{id}"))
            .await
            .unwrap();

        // History replay comes first.
        let first = ws.next().await.unwrap().unwrap();
        assert!(matches!(first, WsMessage::Text(_) | WsMessage::Binary(_)));

        ws.send(WsMessage::Text("echo WS_$((20+1))\n".into()))
            .await
            .unwrap();

        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Binary(data) = msg {
                    seen.extend_from_slice(&data);
                    if String::from_utf8_lossy(&seen).contains("WS_21") {
                        return;
                    }
                }
            }
        })
        .await
        .expect("live output never arrived");

        svc.shutdown().await;
    }

    #[tokio::test]
    async fn websocket_attach_to_unknown_session_closes() {
        let addr = serve(sessions()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/terminals/999999"))
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Ok(WsMessage::Close(_))) | Some(Err(_))));
    }

    #[tokio::test]
    async fn fifty_first_request_in_window_is_rate_limited() {
        let app = app(sessions());
        for _ in 0..50 {
            let (status, _) = call(&app, "POST", "/terminals/999999/size?cols=80&rows=24").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        let (status, body) = call(&app, "POST", "/terminals/999999/size?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, RATE_LIMIT_MESSAGE);

        // Another address still has its own allowance.
        let (status, _) =
            call_from(&app, client(2), "POST", "/terminals/999999/size?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Reads are not limited.
        let (status, _) = call(&app, "GET", "/terminals").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_resize_share_the_allowance() {
        let svc = sessions();
        let app = router(AppState::new(svc.clone(), RateLimiter::new(3, 60)));

        for _ in 0..2 {
            let (status, _) = call(&app, "POST", "/terminals?cols=80&rows=24").await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, _) = call(&app, "POST", "/terminals/999999/size?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "POST", "/terminals?cols=80&rows=24").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, RATE_LIMIT_MESSAGE);
        assert_eq!(svc.list().await.len(), 2);

        svc.shutdown().await;
    }

    #[tokio::test]
    async fn history_endpoint_returns_raw_output() {
        let svc = sessions();
        let app = app(svc.clone());

        let (_, body) = call(&app, "POST", "/terminals?cols=80&rows=24").await;
        let pid: u32 = body.parse().unwrap();
        let (status, _) = call(&app, "GET", &format!("/terminals/{pid}/history")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "GET", "/terminals/999999/history").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Terminal not found");

        let (status, _) = call(&app, "GET", "/terminals/nope/history").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        svc.shutdown().await;
    }
}
