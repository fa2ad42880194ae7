//! Session management: PTY processes, output history, stream bridging, and
//! the service that ties them together.

pub mod bridge;
pub mod output_log;
pub mod pty;
pub mod registry;
pub mod service;

pub use pty::ShellCommand;
pub use registry::SessionInfo;
pub use service::SessionService;
