//! Codec module - structured value (de)serialization for frame payloads.
//!
//! The framing layer treats payloads as opaque bytes. Turning a message into
//! those bytes and back is the codec's job:
//!
//! - [`MsgPackCodec`] - self-describing MessagePack via `rmp-serde`
//!
//! # Example
//!
//! ```
//! use tagwire::codec::MsgPackCodec;
//! use serde_json::json;
//!
//! let value = json!({"text": "hi"});
//! let encoded = MsgPackCodec::encode(&value).unwrap();
//! let decoded: serde_json::Value = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, value);
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
