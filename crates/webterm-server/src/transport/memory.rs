//! In-process transport backed by channels, used to drive attachments in tests.

use tokio::sync::mpsc;
use webterm_core::transport::BoxFuture;
use webterm_core::{Frame, FrameSink, FrameSource, TermError, TermResult, Transport};

/// Server-facing end.
pub struct MemoryTransport {
    frames: mpsc::UnboundedSender<Frame>,
    input: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Test-facing end. Dropping it disconnects the "client".
pub struct MemoryClient {
    /// Frames sent by the server. `None` once the server closed.
    pub frames: mpsc::UnboundedReceiver<Frame>,
    /// Bytes "typed" by the client.
    pub input: mpsc::UnboundedSender<Vec<u8>>,
}

pub fn memory_transport() -> (MemoryTransport, MemoryClient) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            frames: frames_tx,
            input: input_rx,
        },
        MemoryClient {
            frames: frames_rx,
            input: input_tx,
        },
    )
}

pub struct MemorySink(Option<mpsc::UnboundedSender<Frame>>);

pub struct MemorySource(mpsc::UnboundedReceiver<Vec<u8>>);

impl FrameSink for MemorySink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, TermResult<()>> {
        Box::pin(async move {
            match self.0 {
                Some(ref tx) => tx
                    .send(frame)
                    .map_err(|_| TermError::Transport("client gone".into())),
                None => Err(TermError::Transport("sink closed".into())),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, TermResult<()>> {
        Box::pin(async move {
            self.0.take();
            Ok(())
        })
    }
}

impl FrameSource for MemorySource {
    fn recv(&mut self) -> BoxFuture<'_, TermResult<Option<Vec<u8>>>> {
        Box::pin(async move { Ok(self.0.recv().await) })
    }
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (MemorySink, MemorySource) {
        (MemorySink(Some(self.frames)), MemorySource(self.input))
    }
}
