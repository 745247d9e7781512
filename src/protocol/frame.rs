//! Frame construction and the lazy frame reader.
//!
//! [`FrameReader`] wraps any `AsyncRead` and yields complete payloads one at a
//! time, suspending on the socket only when the buffer has no complete frame
//! left.
//!
//! # Example
//!
//! ```
//! use tagwire::protocol::{build_frame, FrameReader};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut wire = build_frame(b"one").unwrap();
//! wire.extend(build_frame(b"").unwrap());
//!
//! let mut reader = FrameReader::new(&wire[..]);
//! assert_eq!(&reader.next_frame().await.unwrap().unwrap()[..], b"one");
//! assert!(reader.next_frame().await.unwrap().unwrap().is_empty());
//! assert!(reader.next_frame().await.unwrap().is_none());
//! # }
//! ```

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame_buffer::FrameBuffer;
use super::wire_format::{encode_length_prefix, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::Result;

/// Socket read size.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Build a complete frame (prefix + payload) as a single byte vector.
///
/// # Errors
///
/// Returns a framing error if the payload is longer than `u32::MAX`.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let prefix = encode_length_prefix(payload.len())?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write one frame to a stream and flush it.
///
/// Not safe to call from several tasks on one stream; connections route all
/// writes through their [`WriterHandle`](crate::writer::WriterHandle).
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = build_frame(payload)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Lazy sequence of frame payloads read from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: FrameBuffer,
    ready: VecDeque<Bytes>,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the default payload cap.
    pub fn new(reader: R) -> Self {
        Self::with_max_payload(reader, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a reader with a custom payload cap.
    pub fn with_max_payload(reader: R, max_payload_size: u32) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_max_payload(max_payload_size),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// Next complete payload.
    ///
    /// - `Ok(Some(payload))`: one frame, in stream order
    /// - `Ok(None)`: peer closed cleanly between frames
    /// - `Err(Framing)`: peer closed mid-frame, or the length exceeded the cap
    /// - `Err(Io)`: the read itself failed
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.buffer.finish()?;
                return Ok(None);
            }

            self.ready.extend(self.buffer.push(&self.chunk[..n])?);
        }
    }
}
