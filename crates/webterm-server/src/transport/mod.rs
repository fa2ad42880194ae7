//! Attachment transports.

pub mod websocket;

#[cfg(test)]
pub mod memory;

pub use websocket::WebSocketTransport;
