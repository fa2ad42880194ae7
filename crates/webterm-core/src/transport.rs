//! Abstract attachment transport.
//!
//! An attachment needs to send frames to the viewer while concurrently
//! receiving keystrokes from it, so every transport splits into an
//! independent sink and source. The WebSocket implementation lives in the
//! server; tests use in-memory channels.

use crate::error::TermResult;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Frame for a history replay: text when the bytes are valid UTF-8,
    /// binary otherwise so the payload is never altered.
    pub fn history(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Frame::Text(text),
            Err(e) => Frame::Binary(e.into_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(s) => s.as_bytes(),
            Frame::Binary(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Frame::Text(s) => s.into_bytes(),
            Frame::Binary(b) => b,
        }
    }
}

/// Outbound half of a transport.
pub trait FrameSink: Send {
    /// Send one frame.
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, TermResult<()>>;

    /// Close the transport. Idempotent.
    fn close(&mut self) -> BoxFuture<'_, TermResult<()>>;
}

/// Inbound half of a transport.
pub trait FrameSource: Send {
    /// Receive the next payload from the client. `None` = closed.
    fn recv(&mut self) -> BoxFuture<'_, TermResult<Option<Vec<u8>>>>;
}

/// A bidirectional transport that can be split into independent halves.
pub trait Transport: Send + 'static {
    type Sink: FrameSink + 'static;
    type Source: FrameSource + 'static;

    fn split(self) -> (Self::Sink, Self::Source);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_prefers_text() {
        assert_eq!(Frame::history(b"$ ls\r\n".to_vec()), Frame::Text("$ ls\r\n".into()));
    }

    #[test]
    fn history_keeps_invalid_utf8_as_binary() {
        // Chunk boundary in the middle of a two-byte sequence.
        let bytes = vec![b'a', 0xC3];
        let frame = Frame::history(bytes.clone());
        assert_eq!(frame, Frame::Binary(bytes.clone()));
        assert_eq!(frame.into_bytes(), bytes);
    }
}
