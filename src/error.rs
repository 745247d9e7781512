//! Error types for tagwire.

use thiserror::Error;

use crate::message::Category;

/// Main error type for all endpoint operations.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Connection-level I/O failure (refused, reset, broken pipe).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration, batch input, typed payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Payload shape the codec refuses to put on the wire.
    #[error("unsupported payload: {0}")]
    UnsupportedPayload(String),

    /// Bytes decoded, but not into a well-formed message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Stream closed mid-frame or carried an unacceptable length prefix.
    #[error("framing error: {0}")]
    Framing(String),

    /// Category tag outside the registered set.
    #[error("unknown category: {0:?}")]
    UnknownCategory(String),

    /// No handler registered for a received category.
    #[error("no handler registered for category {0}")]
    HandlerNotFound(Category),

    /// Rendezvous read returned something other than a response.
    #[error("expected RESPONSE, received {0}")]
    UnexpectedCategory(Category),

    /// Connection closed before the operation could complete.
    #[error("connection closed")]
    ConnectionClosed,

    /// A read, write, connect or shutdown deadline expired.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The dispatcher no longer accepts work.
    #[error("dispatcher is shut down")]
    PoolShutdown,

    /// A dispatched task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A client-side send failed; carries enough context to find the message.
    #[error("message {}/{} to {target} failed: {source}", .index + 1, .total)]
    Send {
        index: usize,
        total: usize,
        target: String,
        #[source]
        source: Box<EndpointError>,
    },
}

impl EndpointError {
    /// Errors local to one message. The connection keeps going after these.
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            EndpointError::Encode(_)
                | EndpointError::Decode(_)
                | EndpointError::UnsupportedPayload(_)
                | EndpointError::MalformedMessage(_)
                | EndpointError::UnknownCategory(_)
                | EndpointError::Json(_)
                | EndpointError::HandlerNotFound(_)
        )
    }

    /// Errors that end the connection they happened on (and nothing else).
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            EndpointError::Io(_)
                | EndpointError::Framing(_)
                | EndpointError::ConnectionClosed
                | EndpointError::Timeout(_)
        )
    }
}

/// Result type alias using EndpointError.
pub type Result<T> = std::result::Result<T, EndpointError>;
