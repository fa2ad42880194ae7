//! PTY process wrapper using portable-pty.
//!
//! Spawns a shell attached to a pseudo-terminal and exposes blocking read,
//! write, resize, wait and kill on top of it. The reader is handed out
//! separately so the stream bridge can own it on a blocking thread while
//! writes and resizes go through their own locks.

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use webterm_core::{Dimensions, SessionId, TermError, TermResult};

/// What to run inside a new PTY.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment on top of the server's own.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.cwd(cwd);
        }
        // Interactive programs key off these to pick colors.
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd
    }
}

/// Outcome of one blocking read from the PTY master.
#[derive(Debug, PartialEq, Eq)]
pub enum PtyRead {
    Data(usize),
    EndOfStream,
}

/// Read half of a PTY, owned by exactly one reader thread.
pub struct PtyReader {
    inner: Box<dyn Read + Send>,
}

impl PtyReader {
    /// Block until output is available or the process is gone.
    ///
    /// Never returns `Data(0)`.
    pub fn read(&mut self, buf: &mut [u8]) -> TermResult<PtyRead> {
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Ok(PtyRead::EndOfStream),
                Ok(n) => return Ok(PtyRead::Data(n)),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // Linux and macOS report EIO on the master once the shell has exited.
                #[cfg(unix)]
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(PtyRead::EndOfStream),
                Err(e) => return Err(TermError::Pty(format!("read failed: {e}"))),
            }
        }
    }
}

struct MasterState {
    master: Box<dyn MasterPty + Send>,
    size: Dimensions,
}

/// A spawned process and the master side of its PTY.
pub struct PtyProcess {
    pid: SessionId,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    /// Serializes resizes on the shared descriptor and tracks the current size.
    master: Mutex<MasterState>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// Separate from `child` so a kill never waits behind a blocking `wait()`.
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl PtyProcess {
    /// Open a PTY of the given size and spawn `command` on its slave side.
    pub fn spawn(command: &ShellCommand, size: Dimensions) -> TermResult<(Self, PtyReader)> {
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| TermError::Spawn(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|e| TermError::Spawn(format!("failed to spawn {}: {e}", command.program)))?;
        // The parent must not hold the slave open or reads never see EOF.
        drop(pair.slave);

        let (pid, reader, writer) = match master_io(child.as_ref(), pair.master.as_ref()) {
            Ok(io) => io,
            Err(e) => {
                abandon(child);
                return Err(e);
            }
        };
        let killer = child.clone_killer();

        info!(pid, program = %command.program, %size, "PTY spawned");

        Ok((
            Self {
                pid,
                writer: Arc::new(Mutex::new(writer)),
                master: Mutex::new(MasterState {
                    master: pair.master,
                    size,
                }),
                child: Arc::new(Mutex::new(child)),
                killer: Mutex::new(killer),
            },
            PtyReader { inner: reader },
        ))
    }

    pub fn pid(&self) -> SessionId {
        self.pid
    }

    /// Write to the PTY input from async code.
    pub async fn write(&self, data: Vec<u8>) -> TermResult<()> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || write_all(&writer, &data))
            .await
            .map_err(|e| TermError::Pty(format!("join error: {e}")))?
    }

    /// Resize the PTY.
    pub fn resize(&self, size: Dimensions) -> TermResult<()> {
        let mut state = self
            .master
            .lock()
            .map_err(|_| TermError::Pty("PTY master lock poisoned".into()))?;
        state
            .master
            .resize(pty_size(size))
            .map_err(|e| TermError::Pty(format!("PTY resize failed: {e}")))?;
        state.size = size;
        debug!(pid = self.pid, %size, "PTY resized");
        Ok(())
    }

    /// Current terminal size.
    pub fn size(&self) -> Dimensions {
        match self.master.lock() {
            Ok(state) => state.size,
            Err(poisoned) => poisoned.into_inner().size,
        }
    }

    /// Wait for the child process to exit. Returns the exit code.
    pub async fn wait(&self) -> TermResult<u32> {
        let child = self.child.clone();
        let status = tokio::task::spawn_blocking(move || {
            let mut child = child
                .lock()
                .map_err(|_| TermError::Pty("child lock poisoned".into()))?;
            child
                .wait()
                .map_err(|e| TermError::Pty(format!("wait error: {e}")))
        })
        .await
        .map_err(|e| TermError::Pty(format!("join error: {e}")))??;

        let code = status.exit_code();
        info!(pid = self.pid, code, "PTY child exited");
        Ok(code)
    }

    /// Kill the child process.
    pub fn kill(&self) -> TermResult<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| TermError::Pty("killer lock poisoned".into()))?;
        killer
            .kill()
            .map_err(|e| TermError::Pty(format!("kill failed: {e}")))
    }
}

type ChildIo = (SessionId, Box<dyn Read + Send>, Box<dyn Write + Send>);

/// Pid plus the master's read and write handles for a freshly spawned child.
fn master_io(
    child: &(dyn Child + Send + Sync),
    master: &(dyn MasterPty + Send),
) -> TermResult<ChildIo> {
    let pid = child
        .process_id()
        .ok_or_else(|| TermError::Spawn("spawned process has no pid".into()))?;
    let reader = master
        .try_clone_reader()
        .map_err(|e| TermError::Spawn(format!("failed to clone PTY reader: {e}")))?;
    let writer = master
        .take_writer()
        .map_err(|e| TermError::Spawn(format!("failed to take PTY writer: {e}")))?;
    Ok((pid, reader, writer))
}

/// Kill and reap a child that will never be registered.
fn abandon(mut child: Box<dyn Child + Send + Sync>) {
    let pid = child.process_id();
    if let Err(e) = child.kill() {
        warn!(?pid, error = %e, "failed to kill abandoned child");
    }
    if let Err(e) = child.wait() {
        warn!(?pid, error = %e, "failed to reap abandoned child");
    }
}

fn write_all(writer: &Mutex<Box<dyn Write + Send>>, data: &[u8]) -> TermResult<()> {
    let mut writer = writer
        .lock()
        .map_err(|_| TermError::Pty("PTY writer lock poisoned".into()))?;
    writer
        .write_all(data)
        .and_then(|_| writer.flush())
        .map_err(|e| TermError::Pty(format!("write failed: {e}")))
}

fn pty_size(size: Dimensions) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
