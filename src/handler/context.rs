//! Per-message context handed to handlers.
//!
//! Carries who sent the message and a way to answer on the same connection:
//! - `respond` - send a RESPONSE
//! - `acknowledge` - send an empty ACKNOWLEDGE
//! - `reply` - send any registered category
//!
//! # Example
//!
//! ```ignore
//! async fn echo(msg: Message, ctx: HandlerContext) -> HandlerResult {
//!     ctx.respond(msg.into_payload()).await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Result;
use crate::message::{Category, Message, MessageFactory};
use crate::writer::WriterHandle;

/// Context passed to handlers.
///
/// `Clone` and cheap; a handler may move it into spawned work and reply later.
/// Replies go through the connection's writer task, so they never interleave
/// with other handlers' replies. Queuing a reply never waits on the peer.
#[derive(Clone)]
pub struct HandlerContext {
    peer: SocketAddr,
    sequence: u64,
    factory: Arc<MessageFactory>,
    writer: Option<WriterHandle>,
}

impl HandlerContext {
    /// Context without a writer; replies are dropped (for testing).
    pub fn new(peer: SocketAddr, sequence: u64, factory: Arc<MessageFactory>) -> Self {
        Self {
            peer,
            sequence,
            factory,
            writer: None,
        }
    }

    pub fn with_writer(
        peer: SocketAddr,
        sequence: u64,
        factory: Arc<MessageFactory>,
        writer: WriterHandle,
    ) -> Self {
        Self {
            peer,
            sequence,
            factory,
            writer: Some(writer),
        }
    }

    /// Remote address of the connection the message arrived on.
    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Zero-based position of the message's frame within its connection.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    /// Send a RESPONSE carrying `payload`.
    pub async fn respond(&self, payload: Value) -> Result<()> {
        self.reply(Category::Response, payload).await
    }

    /// Send an ACKNOWLEDGE with an empty payload map.
    pub async fn acknowledge(&self) -> Result<()> {
        self.reply(Category::Acknowledge, json!({})).await
    }

    /// Build a message of `category` and send it back to the peer.
    ///
    /// # Errors
    ///
    /// `UnknownCategory` if the category is not registered on this endpoint,
    /// `UnsupportedPayload` if the payload is not a map, `ConnectionClosed`
    /// once the writer has stopped.
    pub async fn reply(&self, category: Category, payload: Value) -> Result<()> {
        let message = self.factory.message(category, payload)?;
        self.send(&message).await
    }

    /// Encode and send an already-built message.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;

        let writer = match &self.writer {
            Some(w) => w,
            None => {
                // testing mode
                return Ok(());
            }
        };

        writer.send_payload(bytes)
    }
}
