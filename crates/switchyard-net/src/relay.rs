//! Relay I/O boundary: how the session engine talks to its two peers.
//!
//! The engine only sees the [`Relay`] trait. [`RelayWriter`] is the tokio
//! implementation: packets are handed to a per-connection writer task over a
//! bounded channel, so writes never block the engine. A peer that stops reading
//! fills the queue, and the relay then closes itself. Delayed writes stay in
//! a local buffer until [`Relay::flush`] hands them over as one batch, which the
//! writer task puts on the socket with a single flush.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};
use crate::packets::{Disconnect, Packet};

/// Outbound side of one peer connection.
pub trait Relay: Send {
    /// Send `packet` right away.
    fn write(&mut self, packet: Packet);
    /// Queue `packet` until the next [`Relay::flush`].
    fn delayed_write(&mut self, packet: Packet);
    /// Send everything queued by [`Relay::delayed_write`] as one burst.
    fn flush(&mut self);
    /// Close the connection, optionally telling the peer why. Idempotent.
    fn close(&mut self, reason: Option<String>);
    /// Whether [`Relay::close`] has been called.
    fn is_closed(&self) -> bool;
}

enum Outbound {
    Batch(Vec<Packet>),
    Close(Option<Disconnect>),
}

/// Batches a writer task may hold before its relay gives up on the peer.
pub const OUTBOUND_QUEUE: usize = 1024;

/// Channel-backed [`Relay`] feeding a writer task.
pub struct RelayWriter {
    label: &'static str,
    tx: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
    pending: Vec<Packet>,
    closed: bool,
    overflowed: bool,
}

impl RelayWriter {
    /// Spawn the writer task for `writer` and return its handle.
    ///
    /// `label` names the peer in log output ("client", "backend").
    pub fn spawn<W>(writer: W, config: FrameConfig, label: &'static str) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_capacity(writer, config, label, OUTBOUND_QUEUE)
    }

    /// Like [`RelayWriter::spawn`], holding at most `capacity` batches.
    pub fn with_capacity<W>(
        writer: W,
        config: FrameConfig,
        label: &'static str,
        capacity: usize,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(write_loop(writer, rx, config, label));
        Self {
            label,
            tx,
            task,
            pending: Vec::new(),
            closed: false,
            overflowed: false,
        }
    }

    /// Number of packets waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether the relay closed itself because the peer stopped reading.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn send(&mut self, outbound: Outbound) {
        match self.tx.try_send(outbound) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "{} is not reading, dropping the link after {} queued writes",
                    self.label,
                    self.tx.max_capacity()
                );
                self.overflowed = true;
                self.closed = true;
                self.pending.clear();
                self.task.abort();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("{} writer already stopped, dropping output", self.label);
            }
        }
    }
}

impl Relay for RelayWriter {
    fn write(&mut self, packet: Packet) {
        if self.closed {
            return;
        }
        self.send(Outbound::Batch(vec![packet]));
    }

    fn delayed_write(&mut self, packet: Packet) {
        if self.closed {
            return;
        }
        self.pending.push(packet);
    }

    fn flush(&mut self) {
        if self.closed || self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        self.send(Outbound::Batch(batch));
    }

    fn close(&mut self, reason: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.send(Outbound::Close(reason.map(|reason| Disconnect { reason })));
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

async fn write_loop<W>(
    writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    config: FrameConfig,
    label: &'static str,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(outbound) = rx.recv().await {
        let result = match outbound {
            Outbound::Batch(packets) => write_batch(&mut writer, &packets, &config, label).await,
            Outbound::Close(notice) => {
                if let Some(notice) = notice {
                    let packets = [Packet::Disconnect(notice)];
                    let _ = write_batch(&mut writer, &packets, &config, label).await;
                }
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!("{label} write failed: {e}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_batch<W>(
    writer: &mut BufWriter<W>,
    packets: &[Packet],
    config: &FrameConfig,
    label: &'static str,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    for packet in packets {
        match packet.encode() {
            Ok(payload) => write_frame(writer, &payload, config).await?,
            Err(e) => tracing::warn!("{label}: dropping unencodable packet 0x{:02x}: {e}", packet.id()),
        }
    }
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Something the reader task observed on a connection.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded packet.
    Packet(Packet),
    /// The connection ended. Carries the error if it did not end cleanly.
    Closed(Option<FrameError>),
}

/// Spawn a task that decodes frames from `reader` and hands them to `tx`,
/// wrapped by `wrap`. Undecodable packets are logged and skipped; the task
/// ends after delivering [`Inbound::Closed`] or when `tx` is dropped.
pub fn spawn_reader<R, T, F>(
    mut reader: R,
    config: FrameConfig,
    tx: mpsc::Sender<T>,
    label: &'static str,
    wrap: F,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    T: Send + 'static,
    F: Fn(Inbound) -> T + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let frame = match read_frame(&mut reader, &config).await {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => {
                    let _ = tx.send(wrap(Inbound::Closed(None))).await;
                    return;
                }
                Err(e) => {
                    let _ = tx.send(wrap(Inbound::Closed(Some(e)))).await;
                    return;
                }
            };
            match Packet::decode(frame) {
                Ok(packet) => {
                    if tx.send(wrap(Inbound::Packet(packet))).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("{label}: skipping undecodable packet: {e}"),
            }
        }
    })
}
