// SPDX-License-Identifier: MIT OR Apache-2.0
//! Non-blocking reader over one child pipe endpoint.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

/// Size of one read from the pipe.
const READ_BUF: usize = 8192;
/// In-flight chunks before the reader task backs off.
const CHANNEL_CAP: usize = 32;

/// Wraps one readable pipe end of a child process.
///
/// A background task keeps a read armed at all times and forwards completed
/// chunks over a bounded channel, so [`read`](PipeReader::read) never blocks
/// the caller. [`ready`](PipeReader::ready) is the waitable signal the wait
/// loop multiplexes on.
///
/// An orderly pipe closure (EOF or broken pipe) simply marks the stream
/// closed; any other OS read error is surfaced exactly once as an `Err`
/// chunk, after which the stream also counts as closed.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Option<io::Result<Vec<u8>>>,
    task: JoinHandle<()>,
    closed: bool,
}

impl PipeReader {
    /// Start reading from `stream`; the first read is armed immediately.
    pub fn spawn<R>(mut stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>(CHANNEL_CAP);

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUF];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Self {
            rx,
            pending: None,
            task,
            closed: false,
        }
    }

    /// Returns `true` once the peer endpoint has ended (or the stream was
    /// finished by a final drain).
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Wait until a completed read (or EOF) is available to take.
    ///
    /// Resolves immediately when the stream is closed or a chunk is already
    /// pending. Cancel-safe: a chunk received here is stashed and handed out
    /// by the next [`read`](PipeReader::read).
    pub async fn ready(&mut self) {
        if self.closed || self.pending.is_some() {
            return;
        }
        match self.rx.recv().await {
            Some(chunk) => self.pending = Some(chunk),
            None => self.closed = true,
        }
    }

    /// Take newly available bytes without blocking.
    ///
    /// Returns `Ok(None)` when nothing has arrived yet (or the stream is
    /// closed — distinguish via [`closed`](PipeReader::closed)). With
    /// `finish` set, an empty result also ends the stream: whatever was
    /// immediately available has been drained and no more data is expected.
    pub fn read(&mut self, finish: bool) -> io::Result<Option<Vec<u8>>> {
        if self.closed {
            return Ok(None);
        }

        let next = match self.pending.take() {
            Some(chunk) => Some(chunk),
            None => match self.rx.try_recv() {
                Ok(chunk) => Some(chunk),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return Ok(None);
                }
            },
        };

        match next {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => {
                self.close();
                Err(e)
            }
            None => {
                if finish {
                    self.close();
                }
                Ok(None)
            }
        }
    }

    /// Mark the stream closed and cancel any read still in flight.
    fn close(&mut self) {
        self.closed = true;
        self.task.abort();
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}
