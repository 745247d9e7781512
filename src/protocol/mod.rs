//! Protocol module - length-prefixed framing over a byte stream.
//!
//! - 4-byte big-endian length prefix
//! - Frame buffer for accumulating partial reads
//! - Frame reader producing complete payloads lazily from any `AsyncRead`

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, write_frame, FrameReader};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, validate_length, ABSOLUTE_MAX_PAYLOAD_SIZE,
    DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
