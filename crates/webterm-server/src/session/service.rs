//! Session orchestration: create, resize, attach.
//!
//! Owns the registry and the shell command template. All HTTP handlers go
//! through here; nothing else touches the registry directly.

use super::bridge;
use super::pty::{PtyProcess, ShellCommand};
use super::registry::{Session, SessionInfo, SessionRegistry};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webterm_core::{Dimensions, Frame, FrameSink, FrameSource, SessionId, TermResult, Transport};

pub struct SessionService {
    registry: Arc<SessionRegistry>,
    shell: ShellCommand,
}

impl SessionService {
    pub fn new(shell: ShellCommand) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            shell,
        }
    }

    /// Spawn a shell of the given size and start streaming its output.
    pub async fn create(&self, size: Dimensions) -> TermResult<SessionId> {
        let (pty, reader) = PtyProcess::spawn(&self.shell, size).map_err(|e| {
            error!(error = %e, "error creating terminal");
            e
        })?;

        let session = Arc::new(Session::new(pty));
        let id = session.id();
        if let Err(e) = self.registry.insert(session.clone()).await {
            // The reader is dropped with this scope; make sure the child goes too.
            if let Err(kill_err) = session.pty().kill() {
                warn!(session_id = id, error = %kill_err, "failed to kill orphaned terminal");
            }
            tokio::spawn(async move {
                let _ = session.pty().wait().await;
            });
            return Err(e);
        }

        bridge::start(session, reader, self.registry.clone());
        let live = self.registry.count().await;
        info!(
            session_id = id,
            %size,
            live = live,
            "created terminal"
        );
        Ok(id)
    }

    /// Apply new dimensions to a live session.
    pub async fn resize(&self, id: SessionId, size: Dimensions) -> TermResult<()> {
        let session = self.registry.get(id).await?;
        session.pty().resize(size)?;
        info!(session_id = id, cols = size.cols, rows = size.rows, "resized terminal");
        Ok(())
    }

    /// Attach a transport to a session.
    ///
    /// Replays the full history, then streams live output while writing
    /// everything the client sends to the PTY. Returns when either side
    /// closes. An unknown id closes the transport straight away.
    pub async fn attach<T: Transport>(&self, id: SessionId, transport: T) -> TermResult<()> {
        let (mut sink, mut source) = transport.split();

        let session = match self.registry.get(id).await {
            Ok(session) => session,
            Err(e) => {
                debug!(session_id = id, "attach to unknown terminal");
                let _ = sink.close().await;
                return Err(e);
            }
        };

        let (history, mut live) = session.log().subscribe();
        info!(session_id = id, history_bytes = history.len(), "client attached");

        if let Err(e) = sink.send(Frame::history(history)).await {
            let _ = sink.close().await;
            return Err(e);
        }

        let mut outbound = tokio::spawn(async move {
            while let Some(chunk) = live.recv().await {
                if let Err(e) = sink.send(Frame::Binary(chunk)).await {
                    debug!(session_id = id, error = %e, "error writing to client");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let result = loop {
            tokio::select! {
                inbound = source.recv() => match inbound {
                    Ok(Some(data)) if data.is_empty() => continue,
                    Ok(Some(data)) => {
                        if let Err(e) = session.pty().write(data).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                _ = &mut outbound => break Ok(()),
            }
        };
        outbound.abort();

        match &result {
            Ok(()) => info!(session_id = id, "client detached"),
            Err(e) => warn!(session_id = id, error = %e, "attachment ended with error"),
        }
        result
    }

    /// Everything the session has printed so far.
    pub async fn history(&self, id: SessionId) -> TermResult<Vec<u8>> {
        Ok(self.registry.get(id).await?.log().snapshot())
    }

    /// List live sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    /// Kill every live session. Their bridges unregister them as they exit.
    pub async fn shutdown(&self) -> usize {
        let sessions = self.registry.sessions().await;
        for session in &sessions {
            if let Err(e) = session.pty().kill() {
                warn!(session_id = session.id(), error = %e, "failed to kill terminal");
            }
        }
        info!(count = sessions.len(), "terminals signalled for shutdown");
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{memory_transport, MemoryClient};
    use std::time::Duration;
    use webterm_core::TermError;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn service() -> SessionService {
        SessionService::new(ShellCommand::new("/bin/sh"))
    }

    fn dims(cols: u16, rows: u16) -> Dimensions {
        Dimensions::new(cols, rows).unwrap()
    }

    async fn wait_for_log(session: &Session, needle: &str) {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                if String::from_utf8_lossy(&session.log().snapshot()).contains(needle) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("marker never reached the output log");
    }

    /// Wait until the log stops growing for a short while.
    async fn wait_for_quiet(session: &Session) {
        let mut last = session.log().len();
        loop {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let now = session.log().len();
            if now == last {
                return;
            }
            last = now;
        }
    }

    async fn read_until(client: &mut MemoryClient, needle: &str) -> Vec<u8> {
        let mut seen = Vec::new();
        tokio::time::timeout(TIMEOUT, async {
            while let Some(frame) = client.frames.recv().await {
                seen.extend_from_slice(frame.as_bytes());
                if String::from_utf8_lossy(&seen).contains(needle) {
                    return;
                }
            }
        })
        .await
        .expect("marker never reached the client");
        seen
    }

    async fn wait_until_gone(svc: &SessionService, id: SessionId) {
        tokio::time::timeout(TIMEOUT, async {
            while svc.resize(id, dims(80, 24)).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session never went away");
    }

    #[tokio::test]
    async fn create_then_resize_with_same_size() {
        let svc = service();
        let id = svc.create(dims(80, 24)).await.unwrap();
        svc.resize(id, dims(80, 24)).await.unwrap();
        svc.resize(id, dims(100, 40)).await.unwrap();
        svc.resize(id, dims(100, 40)).await.unwrap();

        let session = svc.registry.get(id).await.unwrap();
        assert_eq!(session.pty().size(), dims(100, 40));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn create_with_bad_shell_registers_nothing() {
        let svc = SessionService::new(ShellCommand::new("/no/such/shell"));
        let err = svc.create(dims(80, 24)).await.unwrap_err();
        assert!(matches!(err, TermError::Spawn(_)));
        assert!(svc.list().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_and_attach_closes() {
        let svc = service();
        assert!(matches!(
            svc.resize(999_999, dims(80, 24)).await,
            Err(TermError::SessionNotFound(999_999))
        ));

        let (transport, mut client) = memory_transport();
        let err = svc.attach(999_999, transport).await.unwrap_err();
        assert!(matches!(err, TermError::SessionNotFound(_)));
        assert!(client.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn attach_replays_history_then_streams_input_echo() {
        let svc = Arc::new(service());
        let id = svc.create(dims(80, 24)).await.unwrap();
        let session = svc.registry.get(id).await.unwrap();

        session.pty().write(b"echo HIST_$((6*7))\n".to_vec()).await.unwrap();
        wait_for_log(&session, "HIST_42").await;
        let before = session.log().snapshot();

        let (transport, mut client) = memory_transport();
        let attach = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.attach(id, transport).await })
        };

        let first = client.frames.recv().await.unwrap();
        assert!(first.as_bytes().starts_with(&before));

        client.input.send(b"echo LIVE_$((2+3))\n".to_vec()).unwrap();
        let live = read_until(&mut client, "LIVE_5").await;
        assert!(String::from_utf8_lossy(&live).contains("LIVE_5"));

        drop(client);
        tokio::time::timeout(TIMEOUT, attach).await.unwrap().unwrap().unwrap();
        // Detaching leaves the session alive.
        svc.resize(id, dims(80, 24)).await.unwrap();
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn sequential_attaches_see_identical_history() {
        let svc = Arc::new(service());
        let id = svc.create(dims(80, 24)).await.unwrap();
        let session = svc.registry.get(id).await.unwrap();
        session.pty().write(b"echo SEQ_$((3+4))\n".to_vec()).await.unwrap();
        wait_for_log(&session, "SEQ_7").await;
        wait_for_quiet(&session).await;

        let mut histories = Vec::new();
        for _ in 0..2 {
            let (transport, mut client) = memory_transport();
            let svc = svc.clone();
            let attach = tokio::spawn(async move { svc.attach(id, transport).await });
            histories.push(client.frames.recv().await.unwrap().into_bytes());
            drop(client);
            attach.await.unwrap().unwrap();
        }
        assert_eq!(histories[0], histories[1]);
        assert!(String::from_utf8_lossy(&histories[0]).contains("SEQ_7"));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_attachments_both_receive_output() {
        let svc = Arc::new(service());
        let id = svc.create(dims(80, 24)).await.unwrap();

        let mut clients = Vec::new();
        for _ in 0..2 {
            let (transport, mut client) = memory_transport();
            let svc = svc.clone();
            tokio::spawn(async move { svc.attach(id, transport).await });
            client.frames.recv().await.unwrap();
            clients.push(client);
        }

        clients[0].input.send(b"echo FAN_$((5+5))\n".to_vec()).unwrap();
        for client in &mut clients {
            read_until(client, "FAN_10").await;
        }
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn stream_matches_log_while_output_races_attach() {
        let svc = Arc::new(service());
        let id = svc.create(dims(80, 24)).await.unwrap();
        let session = svc.registry.get(id).await.unwrap();

        let script = "i=0; while [ $i -lt 400 ]; do echo line$i; i=$((i+1)); \
                      [ $((i % 50)) -eq 0 ] && sleep 0.05; done; exit\n";
        session.pty().write(script.as_bytes().to_vec()).await.unwrap();
        wait_for_log(&session, "line60").await;

        let (transport, mut client) = memory_transport();
        let attach = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.attach(id, transport).await })
        };

        let mut seen = Vec::new();
        tokio::time::timeout(TIMEOUT, async {
            while let Some(frame) = client.frames.recv().await {
                seen.extend_from_slice(frame.as_bytes());
            }
        })
        .await
        .expect("transport never closed after exit");
        attach.await.unwrap().unwrap();

        assert!(session.log().is_closed());
        assert_eq!(seen, session.log().snapshot());
    }

    #[tokio::test]
    async fn shell_exit_makes_session_unreachable() {
        let svc = Arc::new(service());
        let id = svc.create(dims(80, 24)).await.unwrap();

        let (transport, mut client) = memory_transport();
        let attach = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.attach(id, transport).await })
        };
        client.frames.recv().await.unwrap();

        client.input.send(b"exit\n".to_vec()).unwrap();
        wait_until_gone(&svc, id).await;

        // The attachment notices and closes its transport.
        tokio::time::timeout(TIMEOUT, async { while client.frames.recv().await.is_some() {} })
            .await
            .unwrap();
        attach.await.unwrap().unwrap();
        assert!(svc.list().await.is_empty());
    }

    #[tokio::test]
    async fn history_matches_what_attach_replays() {
        let svc = Arc::new(service());
        let id = svc.create(dims(80, 24)).await.unwrap();
        let session = svc.registry.get(id).await.unwrap();
        session.pty().write(b"echo SNAP_$((8+1))\n".to_vec()).await.unwrap();
        wait_for_log(&session, "SNAP_9").await;
        wait_for_quiet(&session).await;

        let history = svc.history(id).await.unwrap();
        assert!(String::from_utf8_lossy(&history).contains("SNAP_9"));

        let (transport, mut client) = memory_transport();
        let attach = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.attach(id, transport).await })
        };
        assert_eq!(client.frames.recv().await.unwrap().into_bytes(), history);
        drop(client);
        attach.await.unwrap().unwrap();

        assert!(matches!(
            svc.history(999_999).await,
            Err(TermError::SessionNotFound(999_999))
        ));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn list_and_shutdown() {
        let svc = service();
        let a = svc.create(dims(80, 24)).await.unwrap();
        let b = svc.create(dims(120, 30)).await.unwrap();

        let ids: Vec<_> = svc.list().await.iter().map(|info| info.id).collect();
        assert!(ids.contains(&a) && ids.contains(&b));

        assert_eq!(svc.shutdown().await, 2);
        wait_until_gone(&svc, a).await;
        wait_until_gone(&svc, b).await;
    }
}
