//! `webterm attach [pid]`: interactive session against a remote terminal.
//!
//! Creates a terminal when no pid is given, enters raw mode, and pipes the
//! local terminal to the attachment WebSocket. History replay arrives first,
//! then live output. Local resize events are forwarded over HTTP. When the
//! socket drops while the terminal is still listed, the client reconnects
//! with backoff, resets the local screen, and lets the replay redraw it.

use anyhow::{bail, Context, Result};
use crossterm::event::{self, Event};
use futures_util::{SinkExt, StreamExt};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use webterm_core::{Dimensions, SessionId};

use crate::client::{Backoff, TerminalSocket, WebTermClient};
use crate::terminal::{self as term, RawModeGuard};

/// How a single WebSocket attachment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Detached,
    Disconnected,
}

/// Local events, produced by the blocking input thread.
struct LocalEvents {
    input: mpsc::Receiver<Vec<u8>>,
    resize: mpsc::Receiver<Dimensions>,
    quit: mpsc::Receiver<()>,
}

pub async fn run(client: &WebTermClient, id: Option<SessionId>) -> Result<()> {
    let size = term::terminal_size();
    let id = match id {
        Some(id) => {
            if !client.is_alive(id).await? {
                bail!("terminal {id} not found");
            }
            id
        }
        None => {
            let id = client.create(size).await?;
            info!(id, %size, "created terminal");
            id
        }
    };

    let socket = client.connect(id).await?;
    client.resize(id, size).await?;
    info!(id, %size, "attached");

    let _guard = RawModeGuard::enter().context("failed to enter raw terminal mode")?;
    let mut events = spawn_input_thread();

    let mut socket = Some(socket);
    let mut reconnects = 0u32;
    loop {
        let current = match socket.take() {
            Some(socket) => socket,
            None => match reconnect(client, id, &mut events, &mut reconnects).await? {
                Some(socket) => {
                    write_stdout(term::RESET)?;
                    if let Err(e) = client.resize(id, term::terminal_size()).await {
                        warn!(error = %e, "failed to restore terminal size");
                    }
                    socket
                }
                None => break,
            },
        };

        match pump(current, client, id, &mut events).await? {
            Outcome::Detached => {
                info!(id, "detached");
                eprint!("\r\nDetached from terminal {id}.\r\n");
                break;
            }
            Outcome::Disconnected => {
                if !client.is_alive(id).await? {
                    eprint!("\r\nTerminal {id} exited.\r\n");
                    break;
                }
                debug!(id, "connection lost, reconnecting");
            }
        }
    }

    Ok(())
}

/// Retry the WebSocket with [`Backoff::RECONNECT`] until it opens, the
/// terminal disappears, or the user detaches.
async fn reconnect(
    client: &WebTermClient,
    id: SessionId,
    events: &mut LocalEvents,
    attempt: &mut u32,
) -> Result<Option<TerminalSocket>> {
    let schedule = Backoff::RECONNECT;
    loop {
        if *attempt >= schedule.max_attempts {
            bail!("giving up on terminal {id} after {attempt} reconnect attempts");
        }
        let delay = schedule.delay(*attempt);
        *attempt += 1;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = events.quit.recv() => return Ok(None),
        }

        match client.connect(id).await {
            Ok(socket) => {
                info!(id, attempt = *attempt, "reconnected");
                *attempt = 0;
                return Ok(Some(socket));
            }
            Err(e) => {
                warn!(id, attempt = *attempt, error = %e, "reconnect failed");
                if !client.is_alive(id).await? {
                    eprint!("\r\nTerminal {id} exited.\r\n");
                    return Ok(None);
                }
            }
        }
    }
}

/// Shuttle bytes between one WebSocket and the local terminal.
async fn pump(
    socket: TerminalSocket,
    client: &WebTermClient,
    id: SessionId,
    events: &mut LocalEvents,
) -> Result<Outcome> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => write_stdout(text.as_bytes())?,
                Some(Ok(Message::Binary(data))) => write_stdout(&data)?,
                Some(Ok(Message::Close(_))) | None => return Ok(Outcome::Disconnected),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket error");
                    return Ok(Outcome::Disconnected);
                }
            },
            Some(bytes) = events.input.recv() => {
                if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                    return Ok(Outcome::Disconnected);
                }
            }
            Some(size) = events.resize.recv() => {
                debug!(%size, "terminal resized");
                if let Err(e) = client.resize(id, size).await {
                    warn!(error = %e, "failed to forward resize");
                }
            }
            _ = events.quit.recv() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(Outcome::Detached);
            }
        }
    }
}

/// Read crossterm events on a blocking thread. The thread exits on `Ctrl+]`
/// or once the receivers are dropped.
fn spawn_input_thread() -> LocalEvents {
    let (tx_input, input) = mpsc::channel::<Vec<u8>>(64);
    let (tx_resize, resize) = mpsc::channel::<Dimensions>(8);
    let (tx_quit, quit) = mpsc::channel::<()>(1);

    tokio::task::spawn_blocking(move || loop {
        if tx_input.is_closed() {
            break;
        }
        match event::poll(Duration::from_millis(100)) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!("crossterm poll error: {e}");
                break;
            }
        }
        match event::read() {
            Ok(Event::Key(key_event)) => {
                if term::is_detach(&key_event) {
                    let _ = tx_quit.blocking_send(());
                    break;
                }
                if let Some(bytes) = term::key_event_to_bytes(&key_event) {
                    if tx_input.blocking_send(bytes).is_err() {
                        break;
                    }
                }
            }
            Ok(Event::Paste(text)) => {
                if tx_input.blocking_send(text.into_bytes()).is_err() {
                    break;
                }
            }
            Ok(Event::Resize(cols, rows)) => {
                if let Ok(size) = Dimensions::new(cols, rows) {
                    let _ = tx_resize.blocking_send(size);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("crossterm event error: {e}");
                break;
            }
        }
    });

    LocalEvents { input, resize, quit }
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}
