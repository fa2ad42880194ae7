//! CLI subcommand implementations.

pub mod attach;
pub mod create;
pub mod resize;
pub mod sessions;
