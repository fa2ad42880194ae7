//! Append-only output history with live fan-out.
//!
//! Every byte a session's PTY emits is kept so that a newly attaching viewer
//! can be sent the complete scrollback before live output. Live viewers
//! subscribe under the same lock that appends take, so the history snapshot
//! and the start of the live stream line up with no gap and no overlap.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Live output for one attachment. Ends when the session closes.
pub type LiveOutput = mpsc::UnboundedReceiver<Vec<u8>>;

#[derive(Default)]
struct LogState {
    bytes: Vec<u8>,
    subscribers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    closed: bool,
}

/// Unbounded history of a session's output.
#[derive(Default)]
pub struct OutputLog {
    state: Mutex<LogState>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // A panicking appender leaves the buffer intact; keep serving it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk and forward it to every live subscriber.
    ///
    /// Subscribers whose receiver was dropped are pruned here.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.bytes.extend_from_slice(chunk);
        let before = state.subscribers.len();
        state
            .subscribers
            .retain(|tx| tx.send(chunk.to_vec()).is_ok());
        let pruned = before - state.subscribers.len();
        if pruned > 0 {
            debug!(pruned, "dropped detached output subscribers");
        }
    }

    /// All bytes appended so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    /// Take a history snapshot and register for live output atomically.
    ///
    /// If the log is already closed the live stream is returned ended.
    pub fn subscribe(&self) -> (Vec<u8>, LiveOutput) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let history = state.bytes.clone();
        if !state.closed {
            state.subscribers.push(tx);
        }
        (history, rx)
    }

    /// Stop accepting output and end every live stream.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().bytes.len()
    }

    /// Number of live subscribers, i.e. attachments currently streaming.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}
