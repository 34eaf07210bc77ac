//! Serial transport to the regenbox.
//!
//! A [`Transport`] owns one open port and relays bytes through two background
//! workers, one per direction. Callers never touch the port: `read()` takes
//! the next frame assembled by the read worker, `write()` hands bytes to the
//! write worker and waits for the result. Every caller-visible wait races a
//! timeout and the shutdown token, so a wedged or unplugged device can't hang
//! anyone. `close()` is the single, permanent way to stop the workers.
//!
//! ```rust,ignore
//! let transport = Transport::new(port, LinkConfig::default(), "/dev/ttyUSB0", false);
//! transport.start();
//! transport.write(&[0x00, 0xFF]).await?;
//! let frame = transport.read().await?;
//! transport.close().await?;
//! ```

mod framing;
mod link;

pub use link::{
    open_port_name, DataBits, LinkConfig, NativeSerial, Parity, Port, SerialBackend, StopBits,
};

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::TransportSettings;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use framing::ReadOutcome;

struct WriteRequest {
    frame: Vec<u8>,
    reply: oneshot::Sender<io::Result<()>>,
}

// Channel ends and the port, held until start() hands them to the workers.
struct Pending<P> {
    port: P,
    frames: mpsc::Sender<ReadOutcome>,
    requests: mpsc::Receiver<WriteRequest>,
}

struct Workers<P> {
    reader: JoinHandle<ReadHalf<P>>,
    writer: JoinHandle<WriteHalf<P>>,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    read: Duration,
    write: Duration,
}

/// Read-only view of a transport's shutdown signal.
#[derive(Debug, Clone)]
pub struct ClosedSignal(CancellationToken);

impl ClosedSignal {
    /// True once the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves when the transport is closed, immediately if it already is.
    pub async fn wait(&self) {
        self.0.cancelled().await
    }
}

/// Framed, timeout-bounded byte channel over one serial port.
pub struct Transport<P> {
    path: String,
    link: LinkConfig,
    exclusive: bool,
    terminator: u8,
    max_frame_len: usize,
    timeouts: Mutex<Timeouts>,

    frames: tokio::sync::Mutex<mpsc::Receiver<ReadOutcome>>,
    requests: mpsc::Sender<WriteRequest>,
    // Held from hand-off until the write result comes back.
    write_lane: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Pending<P>>>,
    workers: Mutex<Option<Workers<P>>>,

    shutdown: CancellationToken,
    closing: AtomicBool,
}

impl<P: Port> Transport<P> {
    /// Wrap an open port using default settings. Workers are not started.
    pub fn new(port: P, link: LinkConfig, path: impl Into<String>, exclusive: bool) -> Self {
        Self::with_settings(port, link, path, exclusive, &TransportSettings::default())
    }

    /// Wrap an open port. Workers are not started.
    pub fn with_settings(
        port: P,
        link: LinkConfig,
        path: impl Into<String>,
        exclusive: bool,
        settings: &TransportSettings,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(1);
        let (requests_tx, requests_rx) = mpsc::channel(1);

        Self {
            path: path.into(),
            link,
            exclusive,
            terminator: settings.terminator,
            max_frame_len: settings.max_frame_len,
            timeouts: Mutex::new(Timeouts {
                read: settings.read_timeout,
                write: settings.write_timeout,
            }),
            frames: tokio::sync::Mutex::new(frames_rx),
            requests: requests_tx,
            write_lane: tokio::sync::Mutex::new(()),
            pending: Mutex::new(Some(Pending {
                port,
                frames: frames_tx,
                requests: requests_rx,
            })),
            workers: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Launch the read and write workers. Must be called once, inside a
    /// tokio runtime, before `read()` or `write()`.
    pub fn start(&self) {
        let Some(pending) = self.pending.lock().take() else {
            warn!(port = %self.path, "Transport already started or closed");
            return;
        };

        let (reader, writer) = tokio::io::split(pending.port);
        let reader = tokio::spawn(read_worker(
            reader,
            self.terminator,
            self.max_frame_len,
            pending.frames,
            self.shutdown.clone(),
        ));
        let writer = tokio::spawn(write_worker(
            writer,
            pending.requests,
            self.shutdown.clone(),
        ));

        *self.workers.lock() = Some(Workers { reader, writer });
        debug!(port = %self.path, link = %self.link, "Transport started");
    }

    /// Next frame from the port, terminator stripped.
    ///
    /// Fails with [`Error::ReadTimeout`] if no frame arrives within the read
    /// timeout, [`Error::Closed`] if the transport is closed first, and
    /// [`Error::Read`] if the physical read failed (any bytes gathered
    /// before the failure are kept in the error).
    pub async fn read(&self) -> Result<Vec<u8>> {
        let timeout = self.read_timeout();
        let deadline = Instant::now() + timeout;

        let mut frames = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Closed),
            frames = self.frames.lock() => frames,
            _ = time::sleep_until(deadline) => return Err(Error::ReadTimeout(timeout)),
        };

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Closed),
            outcome = frames.recv() => outcome.ok_or(Error::Closed)?,
            _ = time::sleep_until(deadline) => return Err(Error::ReadTimeout(timeout)),
        };

        trace!(port = %self.path, frame = ?outcome.frame, error = ?outcome.error, "Read frame");
        outcome.into_result()
    }

    /// Write `frame` to the port as-is, waiting for the physical write.
    ///
    /// Writers queue behind each other; [`Error::WriteTimeout`] is returned if
    /// the write worker does not take the frame within the write timeout,
    /// e.g. because an earlier write is still stuck on the port. Once taken,
    /// the call waits for the result or for close.
    pub async fn write(&self, frame: &[u8]) -> Result<()> {
        let timeout = self.write_timeout();
        let deadline = Instant::now() + timeout;

        let _lane = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Closed),
            lane = self.write_lane.lock() => lane,
            _ = time::sleep_until(deadline) => return Err(Error::WriteTimeout(timeout)),
        };

        let (reply, pending_reply) = oneshot::channel();
        let request = WriteRequest {
            frame: frame.to_vec(),
            reply,
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Closed),
            sent = self.requests.send(request) => sent.map_err(|_| Error::Closed)?,
            _ = time::sleep_until(deadline) => return Err(Error::WriteTimeout(timeout)),
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Closed),
            result = pending_reply => match result {
                Ok(written) => {
                    trace!(port = %self.path, frame = ?frame, "Wrote frame");
                    written.map_err(Error::Io)
                }
                Err(_) => Err(Error::Closed),
            },
        }
    }

    /// Stop both workers, then close the port.
    ///
    /// Returns the result of closing the port. A second call, or a call
    /// racing the first, gets [`Error::Closed`]. In-flight `read()`/`write()`
    /// calls return [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }

        debug!(port = %self.path, "Closing serial port");
        self.shutdown.cancel();

        let workers = self.workers.lock().take();
        let port = match workers {
            Some(workers) => {
                let reader = workers.reader.await;
                let writer = workers.writer.await;
                match (reader, writer) {
                    (Ok(reader), Ok(writer)) => Some(reader.unsplit(writer)),
                    (reader, writer) => {
                        error!(
                            port = %self.path,
                            reader_ok = reader.is_ok(),
                            writer_ok = writer.is_ok(),
                            "Transport worker panicked"
                        );
                        return Err(Error::Io(io::Error::other("transport worker panicked")));
                    }
                }
            }
            None => self.pending.lock().take().map(|pending| pending.port),
        };

        let result = match port {
            Some(mut port) => port.shutdown().await.map_err(Error::Io),
            None => Ok(()),
        };

        match &result {
            Ok(()) => info!(port = %self.path, "Serial port closed"),
            Err(e) => warn!(port = %self.path, error = %e, "Error closing serial port"),
        }
        result
    }

    /// Signal that is set once the transport is closed.
    pub fn closed(&self) -> ClosedSignal {
        ClosedSignal(self.shutdown.clone())
    }
}

impl<P> Transport<P> {
    /// Device name or path of the port.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Link settings the port was opened with.
    pub fn link(&self) -> LinkConfig {
        self.link
    }

    /// Whether exclusive access was requested when the port was opened.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Byte that ends a frame.
    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    pub fn read_timeout(&self) -> Duration {
        self.timeouts.lock().read
    }

    pub fn write_timeout(&self) -> Duration {
        self.timeouts.lock().write
    }

    /// Takes effect for calls started after this one.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.timeouts.lock().read = timeout;
    }

    /// Takes effect for calls started after this one.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.timeouts.lock().write = timeout;
    }
}

impl<P> Drop for Transport<P> {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            debug!(port = %self.path, "Transport dropped without close, stopping workers");
            self.shutdown.cancel();
        }
    }
}

impl<P> std::fmt::Debug for Transport<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("path", &self.path)
            .field("link", &self.link)
            .field("exclusive", &self.exclusive)
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn read_worker<R>(
    mut port: R,
    terminator: u8,
    max_frame_len: usize,
    frames: mpsc::Sender<ReadOutcome>,
    shutdown: CancellationToken,
) -> R
where
    R: AsyncRead + Unpin,
{
    trace!("Read worker started.");
    loop {
        // Don't start another read while a finished frame is still waiting.
        let slot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            slot = frames.reserve() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            outcome = framing::read_frame(&mut port, terminator, max_frame_len) => outcome,
        };

        slot.send(outcome);
    }
    trace!("Read worker stopped.");
    port
}

async fn write_worker<W>(
    mut port: W,
    mut requests: mpsc::Receiver<WriteRequest>,
    shutdown: CancellationToken,
) -> W
where
    W: AsyncWrite + Unpin,
{
    trace!("Write worker started.");
    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = write_frame(&mut port, &request.frame) => result,
        };

        // The caller may have given up; nobody to tell then.
        let _ = request.reply.send(result);
    }
    trace!("Write worker stopped.");
    port
}

async fn write_frame<W: AsyncWrite + Unpin>(port: &mut W, frame: &[u8]) -> io::Result<()> {
    port.write_all(frame).await?;
    port.flush().await
}
