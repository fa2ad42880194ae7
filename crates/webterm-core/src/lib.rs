//! webterm-core: shared types for the web terminal server and client.
//!
//! Provides the error taxonomy, terminal dimension parsing/validation, and
//! the split transport traits that attachments are written against.

pub mod dimensions;
pub mod error;
pub mod transport;

// Re-export commonly used items at crate root.
pub use dimensions::{parse_session_id, Dimensions};
pub use error::{TermError, TermResult};
pub use transport::{Frame, FrameSink, FrameSource, Transport};

/// Identifier of a live session: the OS process id of its shell.
pub type SessionId = u32;
