//! Dedicated writer task: the only code that writes to a connection.
//!
//! Handlers never touch the socket. They push encoded payloads into a channel
//! and one task per connection frames and writes them, so two frames can never
//! interleave on the wire.
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► Socket
//! Handler N ─┘
//! ```
//!
//! Queuing never waits, so a handler never holds a dispatcher worker while
//! its peer is slow to read. The handle counts frames queued and not yet
//! written; the connection's read loop stops taking new frames from a peer
//! whose count reaches `max_pending_frames`.
//!
//! Frames already queued when the writer wakes up are coalesced into one
//! buffer and written with a single `write_all`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{EndpointError, Result};
use crate::protocol::{encode_length_prefix, LENGTH_PREFIX_SIZE};

/// Default limit on frames waiting to be written.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Maximum frames to coalesce into one write.
const MAX_BATCH_SIZE: usize = 64;

/// A framed payload ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    prefix: [u8; LENGTH_PREFIX_SIZE],
    payload: Bytes,
}

impl OutboundFrame {
    /// Frame a payload.
    ///
    /// # Errors
    ///
    /// Returns a framing error if the payload does not fit a 32-bit length.
    pub fn new(payload: Bytes) -> Result<Self> {
        Ok(Self {
            prefix: encode_length_prefix(payload.len())?,
            payload,
        })
    }

    /// Total size on the wire (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Pending frames at which the connection stops reading from its peer.
    pub max_pending_frames: usize,
    /// Deadline for each socket write; `None` waits forever.
    pub write_timeout: Option<Duration>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            write_timeout: None,
        }
    }
}

/// Handle for queuing frames on a connection's writer task.
///
/// Cheaply cloneable; every handler on the connection holds one.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame. Never waits.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            EndpointError::ConnectionClosed
        })
    }

    /// Frame and queue an encoded payload.
    pub fn send_payload(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(OutboundFrame::new(payload.into())?)
    }

    /// Frames queued and not yet written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queuing frames.
///
/// The task ends cleanly when every handle is dropped, after flushing what
/// was queued, and with an error on the first failed or timed-out write.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let task = tokio::spawn(writer_loop(rx, writer, pending.clone(), config.write_timeout));
    (WriterHandle { tx, pending }, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    write_timeout: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let write = write_batch(&mut writer, &batch);
        match write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| EndpointError::Timeout("write"))??,
            None => write.await?,
        }
        pending.fetch_sub(batch.len(), Ordering::AcqRel);
        tracing::trace!(frames = batch.len(), "wrote batch");
        batch.clear();
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Coalesce a batch into one buffer and write it out.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut out = BytesMut::with_capacity(total);
    for frame in batch {
        out.put_slice(&frame.prefix);
        out.put_slice(&frame.payload);
    }

    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
