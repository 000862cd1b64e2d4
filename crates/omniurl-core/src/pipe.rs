//! In-memory byte pipes connecting producer threads to consumers.
//!
//! A pipe carries chunks through a single-slot channel. The writer ends the
//! stream either with [`PipeWriter::close`] (clean EOF) or
//! [`PipeWriter::close_with_error`]; a writer dropped without either is
//! reported to the reader as an error rather than as EOF. Both ends poll the
//! cancellation token, so a cancelled consumer or producer never stays
//! blocked.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A readable byte stream handed out by `open`.
pub type ReadStream = Box<dyn Read + Send>;

enum Message {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// Create a connected reader/writer pair.
pub fn pipe(cancel: &CancellationToken) -> (PipeReader, PipeWriter) {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    (
        PipeReader {
            receiver,
            buffer: Vec::new(),
            position: 0,
            state: ReaderState::Open,
            cancel: cancel.clone(),
        },
        PipeWriter {
            sender: Some(sender),
            cancel: cancel.clone(),
        },
    )
}

/// Run `produce` on a named background thread that writes into a new pipe,
/// returning the consuming end.
///
/// The pipe is closed cleanly when `produce` returns `Ok`, and closed with
/// the error otherwise.
pub fn spawn_producer<F>(name: &str, cancel: &CancellationToken, produce: F) -> Result<PipeReader>
where
    F: FnOnce(&mut PipeWriter) -> Result<()> + Send + 'static,
{
    let (reader, mut writer) = pipe(cancel);
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match produce(&mut writer) {
            Ok(()) => writer.close(),
            Err(err) => {
                tracing::debug!(error = %err, "producer failed");
                writer.close_with_error(err.into_io());
            }
        })?;
    Ok(reader)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Open,
    Finished,
    Failed,
}

/// Consuming end of a [`pipe`].
pub struct PipeReader {
    receiver: Receiver<Message>,
    buffer: Vec<u8>,
    position: usize,
    state: ReaderState,
    cancel: CancellationToken,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.position < self.buffer.len() {
                let available = &self.buffer[self.position..];
                let count = available.len().min(buf.len());
                buf[..count].copy_from_slice(&available[..count]);
                self.position += count;
                return Ok(count);
            }

            match self.state {
                ReaderState::Open => {}
                ReaderState::Finished => return Ok(0),
                ReaderState::Failed => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "read from a failed pipe",
                    ));
                }
            }

            if self.cancel.is_cancelled() {
                self.state = ReaderState::Failed;
                return Err(Error::Cancelled.into_io());
            }

            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(Message::Data(data)) => {
                    self.buffer = data;
                    self.position = 0;
                }
                Ok(Message::Eof) => {
                    self.state = ReaderState::Finished;
                    return Ok(0);
                }
                Ok(Message::Failed(err)) => {
                    self.state = ReaderState::Failed;
                    return Err(err);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = ReaderState::Failed;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "producer stopped without closing the stream",
                    ));
                }
            }
        }
    }
}

/// Producing end of a [`pipe`].
pub struct PipeWriter {
    sender: Option<Sender<Message>>,
    cancel: CancellationToken,
}

impl PipeWriter {
    /// End the stream cleanly.
    pub fn close(mut self) {
        let _ = self.send(Message::Eof);
        self.sender = None;
    }

    /// End the stream; the reader's next read returns `err`.
    pub fn close_with_error(mut self, err: io::Error) {
        let _ = self.send(Message::Failed(err));
        self.sender = None;
    }

    fn send(&mut self, mut message: Message) -> io::Result<()> {
        let Some(sender) = &self.sender else {
            return Err(closed_pipe());
        };
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled.into_io());
            }
            match sender.send_timeout(message, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => message = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(closed_pipe()),
            }
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(Message::Data(buf.to_vec()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader was closed")
}

/// Wraps a reader so each read first checks a cancellation token.
pub struct CancellableReader<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R: Read> CancellableReader<R> {
    pub fn new(inner: R, cancel: &CancellationToken) -> Self {
        Self {
            inner,
            cancel: cancel.clone(),
        }
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled.into_io());
        }
        self.inner.read(buf)
    }
}
