//! Session registry.
//!
//! Maps process ids to live sessions. Shared by the creating request, the
//! session's bridge task, attach handlers and resize handlers; callers never
//! lock anything themselves.

use super::bridge::{BridgeState, BridgeStateCell};
use super::output_log::OutputLog;
use super::pty::PtyProcess;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use webterm_core::{Dimensions, SessionId, TermError, TermResult};

/// A live terminal: its process, output history and stream state.
pub struct Session {
    pty: PtyProcess,
    log: OutputLog,
    state: BridgeStateCell,
    created_at: Instant,
}

impl Session {
    pub fn new(pty: PtyProcess) -> Self {
        Self {
            pty,
            log: OutputLog::new(),
            state: BridgeStateCell::new(),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.pty.pid()
    }

    pub fn pty(&self) -> &PtyProcess {
        &self.pty
    }

    pub fn log(&self) -> &OutputLog {
        &self.log
    }

    pub fn state(&self) -> &BridgeStateCell {
        &self.state
    }

    pub fn info(&self) -> SessionInfo {
        let Dimensions { cols, rows } = self.pty.size();
        SessionInfo {
            id: self.id(),
            cols,
            rows,
            attachments: self.log.subscriber_count(),
            history_bytes: self.log.len(),
            age_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Information returned when listing sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub attachments: usize,
    pub history_bytes: usize,
    pub age_secs: u64,
}

/// Concurrent id → session map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its process id.
    ///
    /// Fails with [`TermError::SessionExists`] if the id is still taken;
    /// a live entry is never overwritten.
    pub async fn insert(&self, session: Arc<Session>) -> TermResult<()> {
        let id = session.id();
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&id) {
            if existing.state().get() != BridgeState::Closed {
                warn!(session_id = id, "process id collides with a live session");
                return Err(TermError::SessionExists(id));
            }
        }
        sessions.insert(id, session);
        debug!(session_id = id, total = sessions.len(), "session registered");
        Ok(())
    }

    /// Look up a live session.
    ///
    /// A session whose output has ended is already unreachable, even before
    /// its bridge unregisters it.
    pub async fn get(&self, id: SessionId) -> TermResult<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .filter(|session| !session.log().is_closed())
            .cloned()
            .ok_or(TermError::SessionNotFound(id))
    }

    /// Remove `session` only if it is still the entry registered under its id.
    pub async fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        let id = session.id();
        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(existing) if Arc::ptr_eq(existing, session) => {
                sessions.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every registered session, ordered by id.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(|s| s.info()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// All registered sessions.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Get the number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
