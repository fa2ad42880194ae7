//! Per-session stream bridge.
//!
//! A blocking reader thread drains the PTY and hands chunks to an async task
//! that appends them to the session's [`OutputLog`], which fans them out to
//! live attachments. When the PTY reports end-of-stream or a read error the
//! bridge closes the log, removes the session from the registry and reaps
//! the child.

use super::output_log::OutputLog;
use super::pty::{PtyRead, PtyReader};
use super::registry::{Session, SessionRegistry};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webterm_core::{SessionId, TermError, TermResult};

/// Size of a single PTY read.
const READ_CHUNK_SIZE: usize = 4096;

/// Chunks in flight between the reader thread and the bridge task.
const CHUNK_CHANNEL_DEPTH: usize = 64;

/// Lifecycle of a session's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Streaming,
    Closed,
}

/// Atomic holder for a [`BridgeState`].
#[derive(Debug)]
pub struct BridgeStateCell(AtomicU8);

impl BridgeStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(BridgeState::Starting as u8))
    }

    pub fn get(&self) -> BridgeState {
        match self.0.load(Ordering::Acquire) {
            0 => BridgeState::Starting,
            1 => BridgeState::Streaming,
            _ => BridgeState::Closed,
        }
    }

    fn set(&self, state: BridgeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for BridgeStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Start draining `reader` into `session`'s output log.
///
/// The returned handle resolves once the session has been torn down.
pub fn start(
    session: Arc<Session>,
    reader: PtyReader,
    registry: Arc<SessionRegistry>,
) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_DEPTH);
    let id = session.id();
    let reader_task = tokio::task::spawn_blocking(move || read_loop(id, reader, tx));

    tokio::spawn(async move {
        session.state().set(BridgeState::Streaming);
        debug!(session_id = id, "stream bridge streaming");

        let total = pump(rx, session.log()).await;

        let cause = match reader_task.await {
            Ok(result) => result,
            Err(e) => Err(TermError::Pty(format!("reader join error: {e}"))),
        };
        match cause {
            Ok(()) => info!(session_id = id, bytes = total, "terminal output ended"),
            Err(e) => warn!(session_id = id, error = %e, "error reading from terminal"),
        }

        close(&session, &registry).await;
    })
}

/// Blocking half: read until end-of-stream or error, forwarding each chunk.
fn read_loop(id: SessionId, mut reader: PtyReader, tx: mpsc::Sender<Vec<u8>>) -> TermResult<()> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf)? {
            PtyRead::Data(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!(session_id = id, "bridge task gone, stopping reader");
                    return Ok(());
                }
            }
            PtyRead::EndOfStream => return Ok(()),
        }
    }
}

/// Async half: append chunks in arrival order. Returns total bytes.
async fn pump(mut rx: mpsc::Receiver<Vec<u8>>, log: &OutputLog) -> usize {
    let mut total = 0;
    while let Some(chunk) = rx.recv().await {
        total += chunk.len();
        log.append(&chunk);
    }
    total
}

async fn close(session: &Arc<Session>, registry: &SessionRegistry) {
    let id = session.id();
    session.state().set(BridgeState::Closed);
    session.log().close();
    if registry.remove_if_same(session).await {
        info!(session_id = id, "closed terminal");
    }
    match session.pty().wait().await {
        Ok(code) => debug!(session_id = id, code, "terminal process reaped"),
        Err(e) => warn!(session_id = id, error = %e, "failed to reap terminal process"),
    }
}
