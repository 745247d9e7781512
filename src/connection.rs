//! Per-connection read → extract → dispatch loop.
//!
//! One [`ConnectionHandler`] owns one accepted stream. Its read loop is the
//! only code touching the stream's read half and its frame buffer, so neither
//! needs a lock. Every complete frame becomes one dispatcher task that decodes
//! it and runs the category's handler; the loop goes straight back to the
//! socket without waiting for that task.
//!
//! Replies queue without waiting, so a peer that stops reading cannot pin
//! dispatcher workers. Instead the loop itself stops taking frames from that
//! peer while its queued replies plus its unfinished frames reach the writer's
//! `max_pending_frames`, and resumes as they drain.
//!
//! ```text
//! socket ─► FrameReader ─► frame K ─► Dispatcher ─► decode + handler ─┐
//!                      └─► frame K+1 ─► ...                          │
//!                                                  WriterHandle ◄────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dispatcher::{Dispatcher, TaskHandle};
use crate::error::{EndpointError, Result};
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::message::MessageFactory;
use crate::protocol::{FrameReader, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// How often a paused read loop rechecks its backlog.
const BACKLOG_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Limits applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted length prefix.
    pub max_payload_size: u32,
    /// Deadline for each wait on the socket; `None` waits forever.
    pub read_timeout: Option<Duration>,
    pub writer: WriterConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_timeout: None,
            writer: WriterConfig::default(),
        }
    }
}

/// Drives one connection until the peer closes it or it fails.
pub struct ConnectionHandler {
    peer: SocketAddr,
    registry: Arc<HandlerRegistry>,
    factory: Arc<MessageFactory>,
    dispatcher: Dispatcher,
    config: ConnectionConfig,
}

impl ConnectionHandler {
    pub fn new(
        peer: SocketAddr,
        registry: Arc<HandlerRegistry>,
        factory: Arc<MessageFactory>,
        dispatcher: Dispatcher,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            peer,
            registry,
            factory,
            dispatcher,
            config,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run the connection to completion and return how many frames it read.
    ///
    /// Returns once the read side has ended and every reply queued by this
    /// connection's handlers has been written.
    ///
    /// # Errors
    ///
    /// `Framing` if the peer closed mid-frame or sent an oversized length,
    /// `Timeout` if a read or write deadline expired, `Io` for socket
    /// failures. Per-message failures are logged and never end the loop.
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer.clone());

        let read_result = self.read_loop(reader, &writer).await;

        // handlers still in flight hold their own clones
        drop(writer);
        let write_result = match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(EndpointError::Task(e.to_string())),
        };

        // a failed writer explains a read loop that found it closed
        write_result?;
        let frames = read_result?;
        tracing::debug!(peer = %self.peer, frames, "connection closed");
        Ok(frames)
    }

    async fn read_loop<R>(&self, reader: R, writer: &WriterHandle) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FrameReader::with_max_payload(reader, self.config.max_payload_size);
        let mut sequence = 0u64;
        let in_flight = Arc::new(AtomicUsize::new(0));

        loop {
            self.wait_for_backlog(writer, &in_flight).await?;

            let next = match self.config.read_timeout {
                Some(limit) => tokio::time::timeout(limit, frames.next_frame())
                    .await
                    .map_err(|_| EndpointError::Timeout("read"))?,
                None => frames.next_frame().await,
            };

            let Some(frame) = next? else {
                return Ok(sequence);
            };

            let ctx = HandlerContext::with_writer(
                self.peer,
                sequence,
                self.factory.clone(),
                writer.clone(),
            );
            let guard = InFlight::enter(&in_flight);
            let handle = self
                .dispatcher
                .submit(process_frame(frame, self.registry.clone(), ctx, guard));
            report(self.peer, sequence, handle);

            sequence += 1;
        }
    }

    /// Pause while this peer's backlog is at the limit.
    async fn wait_for_backlog(&self, writer: &WriterHandle, in_flight: &AtomicUsize) -> Result<()> {
        let limit = self.config.writer.max_pending_frames.max(1);
        let mut paused = false;

        while writer.pending() + in_flight.load(Ordering::Acquire) >= limit {
            if writer.is_closed() {
                return Err(EndpointError::ConnectionClosed);
            }
            if !paused {
                tracing::debug!(peer = %self.peer, limit, "backlog full, pausing reads");
                paused = true;
            }
            tokio::time::sleep(BACKLOG_CHECK_INTERVAL).await;
        }

        if paused {
            tracing::debug!(peer = %self.peer, "resuming reads");
        }
        Ok(())
    }
}

/// Counts one unfinished frame task until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Decode one frame and hand it to its category's handler.
async fn process_frame(
    frame: Bytes,
    registry: Arc<HandlerRegistry>,
    ctx: HandlerContext,
    _in_flight: InFlight,
) -> Result<()> {
    let message = ctx.factory().decode(&frame)?;
    tracing::trace!(
        peer = %ctx.peer(),
        sequence = ctx.sequence(),
        category = %message.category(),
        "dispatching"
    );
    registry.dispatch(message, ctx).await
}

/// Log the outcome of a frame's task once it finishes.
fn report(peer: SocketAddr, sequence: u64, handle: TaskHandle<()>) {
    tokio::spawn(async move {
        match handle.join().await {
            Ok(()) => {}
            Err(e) if e.is_message_error() => {
                tracing::warn!(peer = %peer, sequence, error = %e, "message dropped");
            }
            Err(e) => {
                tracing::error!(peer = %peer, sequence, error = %e, "handler failed");
            }
        }
    });
}
