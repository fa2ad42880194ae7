//! WebSocket attachment transport on top of axum's upgraded socket.
//!
//! Outbound frames map 1:1 onto WebSocket text/binary messages. Inbound text
//! and binary messages are both treated as raw keystrokes for the PTY.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;
use webterm_core::transport::BoxFuture;
use webterm_core::{Frame, FrameSink, FrameSource, TermError, TermResult, Transport};

/// Maximum inbound frame size (1 MiB).
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// An upgraded WebSocket carrying one attachment.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    fn split(self) -> (WebSocketSink, WebSocketSource) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketSink {
                sink,
                closed: false,
            },
            WebSocketSource { stream },
        )
    }
}

impl FrameSink for WebSocketSink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, TermResult<()>> {
        Box::pin(async move {
            let message = match frame {
                Frame::Text(text) => Message::Text(text),
                Frame::Binary(data) => Message::Binary(data),
            };
            self.sink
                .send(message)
                .await
                .map_err(|e| TermError::Transport(format!("WS send failed: {e}")))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, TermResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.sink
                .close()
                .await
                .map_err(|e| TermError::Transport(format!("WS close failed: {e}")))
        })
    }
}

impl FrameSource for WebSocketSource {
    /// Next keystroke payload. Control frames are skipped.
    fn recv(&mut self) -> BoxFuture<'_, TermResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                let data = match self.stream.next().await {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Err(e)) => {
                        return Err(TermError::Transport(format!("WS recv failed: {e}")))
                    }
                };
                if data.len() > MAX_WS_FRAME_SIZE {
                    return Err(TermError::Transport(format!(
                        "WS frame too large: {} bytes (max {})",
                        data.len(),
                        MAX_WS_FRAME_SIZE
                    )));
                }
                debug!(bytes = data.len(), "client input");
                return Ok(Some(data));
            }
        })
    }
}
