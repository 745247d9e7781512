//! Batch input of outbound message descriptors.
//!
//! The client binary reads one JSON document from stdin. Accepted shapes:
//!
//! - an array of descriptors: `[{"category": "REQUEST", "payload": {...}}, ...]`
//! - a single descriptor object
//! - any other object, sent as the payload of one REQUEST

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{EndpointError, Result};
use crate::message::Category;

/// One outbound message before it has been checked against a category set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub category: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl MessageDescriptor {
    pub fn new(category: impl Into<String>, payload: Value) -> Self {
        Self {
            category: category.into(),
            payload,
        }
    }

    pub fn request(payload: Value) -> Self {
        Self::new(Category::Request.as_str(), payload)
    }
}

/// Parse descriptors from JSON text.
///
/// Blank input yields no descriptors.
///
/// # Errors
///
/// `Json` for text that does not parse or an array entry that is not a
/// descriptor, `MalformedMessage` for a top-level value that is neither an
/// array nor an object.
pub fn parse_descriptors(text: &str) -> Result<Vec<MessageDescriptor>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(EndpointError::from))
            .collect(),
        Value::Object(map) if map.contains_key("category") => {
            Ok(vec![serde_json::from_value(Value::Object(map))?])
        }
        Value::Object(map) => Ok(vec![MessageDescriptor::request(Value::Object(map))]),
        other => Err(EndpointError::MalformedMessage(format!(
            "expected a descriptor, an array of descriptors, or a payload object, got {}",
            other
        ))),
    }
}

/// Read the whole stream and parse it as descriptors.
pub async fn read_descriptors<R>(mut reader: R) -> Result<Vec<MessageDescriptor>>
where
    R: AsyncRead + Unpin,
{
    let mut text = String::new();
    reader.read_to_string(&mut text).await?;
    parse_descriptors(&text)
}
