//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` so records travel as maps
//! keyed by field name. A peer can then decode any frame without knowing the
//! Rust type that produced it.

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Encode`](crate::EndpointError::Encode) if the
    /// value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Decode`](crate::EndpointError::Decode) if the
    /// bytes are malformed or do not fit `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Greeting {
        id: u32,
        text: String,
    }

    #[test]
    fn test_structured_value_roundtrip() {
        let values = [
            json!({}),
            json!({"text": "hi"}),
            json!({"n": -12, "big": u64::MAX, "pi": 3.5, "ok": true, "none": null}),
            json!({"nested": {"list": [1, "two", {"three": 3}]}}),
            json!({"unicode": "żółw 🐢"}),
        ];

        for value in values {
            let encoded = MsgPackCodec::encode(&value).unwrap();
            let decoded: Value = MsgPackCodec::decode(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let greeting = Greeting {
            id: 1,
            text: "x".to_string(),
        };

        let encoded = MsgPackCodec::encode(&greeting).unwrap();

        // 0x82 = fixmap with 2 entries; positional encoding would be 0x92
        assert_eq!(encoded[0], 0x82);

        let as_value: Value = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(as_value, json!({"id": 1, "text": "x"}));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Greeting> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(crate::EndpointError::Decode(_))));
    }

    #[test]
    fn test_decode_error_on_truncated_data() {
        let encoded = MsgPackCodec::encode(&json!({"text": "hello"})).unwrap();
        let result: Result<Value> = MsgPackCodec::decode(&encoded[..encoded.len() - 2]);
        assert!(result.is_err());
    }
}
