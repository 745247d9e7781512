//! Wire format encoding and decoding.
//!
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ Length       │ Payload             │
//! │ 4 bytes      │ Length bytes        │
//! │ uint32 BE    │ codec-encoded       │
//! └──────────────┴─────────────────────┘
//! ```

use crate::error::{EndpointError, Result};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size accepted from a peer (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Largest length the prefix can express.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = u32::MAX;

/// Encode a payload length as a big-endian prefix.
///
/// # Errors
///
/// Returns a framing error if `len` does not fit in 32 bits.
///
/// # Example
///
/// ```
/// use tagwire::protocol::encode_length_prefix;
///
/// assert_eq!(encode_length_prefix(258).unwrap(), [0, 0, 1, 2]);
/// ```
pub fn encode_length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = u32::try_from(len).map_err(|_| {
        EndpointError::Framing(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            len, ABSOLUTE_MAX_PAYLOAD_SIZE
        ))
    })?;
    Ok(len.to_be_bytes())
}

/// Decode a big-endian length prefix.
///
/// Returns `None` if fewer than 4 bytes are available.
#[inline]
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Reject lengths above the configured cap.
pub fn validate_length(length: u32, max_payload_size: u32) -> Result<()> {
    if length > max_payload_size {
        return Err(EndpointError::Framing(format!(
            "payload size {} exceeds maximum {}",
            length, max_payload_size
        )));
    }
    Ok(())
}
