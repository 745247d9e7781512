//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` as a growable buffer with a moving read cursor:
//! `split_to` hands out the front of the buffer without copying the rest, so
//! long-lived connections never pay for repeated reassembly.
//!
//! State machine:
//! - `AwaitingLength`: need at least 4 bytes
//! - `AwaitingPayload`: length parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use tagwire::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let wire = build_frame(b"hello").unwrap();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//! let frames = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(&frames[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_length_prefix, validate_length, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
use crate::error::{EndpointError, Result};

/// State machine for frame extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a complete 4-byte length prefix.
    AwaitingLength,
    /// Prefix consumed, waiting for `length` payload bytes.
    AwaitingPayload { length: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Owned by exactly one reader; it is never shared between tasks.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 16MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::AwaitingLength,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Every complete frame present is peeled off before returning, in
    /// stream order. Partial data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns a framing error if a length prefix exceeds the configured cap.
    /// The buffer is unusable afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame payload.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::AwaitingLength => {
                    let Some(length) = decode_length_prefix(&self.buffer) else {
                        return Ok(None);
                    };
                    validate_length(length, self.max_payload_size)?;

                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    self.state = State::AwaitingPayload { length };
                }
                State::AwaitingPayload { length } => {
                    let length = length as usize;
                    if self.buffer.len() < length {
                        return Ok(None);
                    }

                    // zero-length frames yield an empty payload here too
                    let payload = self.buffer.split_to(length).freeze();
                    self.state = State::AwaitingLength;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Check the buffer at end of stream.
    ///
    /// Clean close: nothing buffered and no frame in progress.
    ///
    /// # Errors
    ///
    /// Returns a framing error if the stream ended mid-frame.
    pub fn finish(&self) -> Result<()> {
        match self.state {
            State::AwaitingLength if self.buffer.is_empty() => Ok(()),
            State::AwaitingLength => Err(EndpointError::Framing(format!(
                "stream closed with {} of {} length prefix bytes",
                self.buffer.len(),
                LENGTH_PREFIX_SIZE
            ))),
            State::AwaitingPayload { length } => Err(EndpointError::Framing(format!(
                "stream closed with {} of {} payload bytes",
                self.buffer.len(),
                length
            ))),
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when no partial frame is pending.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingLength && self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::AwaitingLength => "AwaitingLength",
            State::AwaitingPayload { .. } => "AwaitingPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
