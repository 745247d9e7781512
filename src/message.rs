//! Message model - categories, the registered category set, and messages.
//!
//! A [`Message`] is one concrete type: a [`Category`] tag plus an opaque
//! structured payload. Messages are only built through a [`MessageFactory`],
//! which checks the tag against the deployment's [`CategorySet`].
//!
//! On the wire a message is a MsgPack map:
//!
//! ```text
//! { "category": "REQUEST", "payload": { ...application fields... } }
//! ```
//!
//! # Example
//!
//! ```
//! use tagwire::message::{CategorySet, MessageFactory};
//! use serde_json::json;
//!
//! let factory = MessageFactory::new(CategorySet::minimal());
//! let msg = factory.construct("REQUEST", json!({"text": "hi"})).unwrap();
//! let bytes = msg.encode().unwrap();
//! assert_eq!(factory.decode(&bytes).unwrap(), msg);
//!
//! assert!(factory.construct("BOGUS", json!({})).is_err());
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::MsgPackCodec;
use crate::error::{EndpointError, Result};

/// Closed set of message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Request,
    Response,
    Acknowledge,
    Indication,
    Publish,
}

impl Category {
    /// Every category the protocol knows about.
    pub const ALL: [Category; 5] = [
        Category::Request,
        Category::Response,
        Category::Acknowledge,
        Category::Indication,
        Category::Publish,
    ];

    /// Wire tag for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Request => "REQUEST",
            Category::Response => "RESPONSE",
            Category::Acknowledge => "ACKNOWLEDGE",
            Category::Indication => "INDICATION",
            Category::Publish => "PUBLISH",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = EndpointError;

    fn from_str(tag: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == tag)
            .ok_or_else(|| EndpointError::UnknownCategory(tag.to_string()))
    }
}

/// The categories a deployment accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    registered: BTreeSet<Category>,
}

impl CategorySet {
    /// `{REQUEST, RESPONSE}`.
    pub fn minimal() -> Self {
        Self::from_categories([Category::Request, Category::Response])
    }

    /// All five categories.
    pub fn extended() -> Self {
        Self::from_categories(Category::ALL)
    }

    pub fn from_categories(categories: impl IntoIterator<Item = Category>) -> Self {
        Self {
            registered: categories.into_iter().collect(),
        }
    }

    /// Build a set from wire tags.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCategory` for the first tag the protocol does not define.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        let registered = tags
            .iter()
            .map(|t| t.as_ref().parse())
            .collect::<Result<BTreeSet<Category>>>()?;
        Ok(Self { registered })
    }

    pub fn contains(&self, category: Category) -> bool {
        self.registered.contains(&category)
    }

    /// Resolve a tag to a registered category.
    pub fn resolve(&self, tag: &str) -> Result<Category> {
        let category: Category = tag.parse()?;
        if !self.contains(category) {
            return Err(EndpointError::UnknownCategory(tag.to_string()));
        }
        Ok(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.registered.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::minimal()
    }
}

/// A typed application message.
///
/// Immutable once constructed; the category is always one the factory that
/// built it had registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    category: Category,
    payload: Value,
}

impl Message {
    #[inline]
    pub fn category(&self) -> Category {
        self.category
    }

    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.category == Category::Request
    }

    /// Encode to frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPayload` when the payload is not a map/record, or
    /// `Encode` if the codec rejects it.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.payload.is_object() {
            return Err(EndpointError::UnsupportedPayload(format!(
                "{} payload must be a map, got {}",
                self.category,
                value_kind(&self.payload)
            )));
        }

        MsgPackCodec::encode(&WireMessage {
            category: self.category.as_str(),
            payload: &self.payload,
        })
    }
}

/// Borrowed wire form used when encoding.
#[derive(Serialize)]
struct WireMessage<'a> {
    category: &'a str,
    payload: &'a Value,
}

/// Owned wire form used when decoding.
#[derive(Deserialize)]
struct InboundMessage {
    category: String,
    payload: Value,
}

/// Builds and decodes messages against one registered category set.
#[derive(Debug, Clone, Default)]
pub struct MessageFactory {
    categories: CategorySet,
}

impl MessageFactory {
    pub fn new(categories: CategorySet) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Construct a message from a wire tag.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCategory` if `tag` is not in the registered set.
    pub fn construct(&self, tag: &str, payload: Value) -> Result<Message> {
        let category = self.categories.resolve(tag)?;
        Ok(Message { category, payload })
    }

    /// Construct a message from a category value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCategory` if `category` is not registered here.
    pub fn message(&self, category: Category, payload: Value) -> Result<Message> {
        if !self.categories.contains(category) {
            return Err(EndpointError::UnknownCategory(category.as_str().to_string()));
        }
        Ok(Message { category, payload })
    }

    /// Decode frame payload bytes into a message.
    ///
    /// # Errors
    ///
    /// `Decode` for bytes the codec cannot read, `MalformedMessage` for a
    /// non-map payload, `UnknownCategory` for a tag outside the set.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let inbound: InboundMessage = MsgPackCodec::decode(bytes)?;

        if !inbound.payload.is_object() {
            return Err(EndpointError::MalformedMessage(format!(
                "payload must be a map, got {}",
                value_kind(&inbound.payload)
            )));
        }

        self.construct(&inbound.category, inbound.payload)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_tags() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!(matches!(
            "request".parse::<Category>(),
            Err(EndpointError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_category_serde_matches_wire_tag() {
        let json = serde_json::to_string(&Category::Acknowledge).unwrap();
        assert_eq!(json, "\"ACKNOWLEDGE\"");
    }

    #[test]
    fn test_unknown_category_rejected() {
        let factory = MessageFactory::new(CategorySet::minimal());

        let result = factory.construct("BOGUS", json!({"text": "hi"}));

        match result {
            Err(EndpointError::UnknownCategory(tag)) => assert_eq!(tag, "BOGUS"),
            other => panic!("expected UnknownCategory, got {:?}", other),
        }
    }

    #[test]
    fn test_known_but_unregistered_category_rejected() {
        let factory = MessageFactory::new(CategorySet::minimal());

        assert!(factory.construct("PUBLISH", json!({})).is_err());
        assert!(factory.message(Category::Indication, json!({})).is_err());

        let extended = MessageFactory::new(CategorySet::extended());
        assert!(extended.construct("PUBLISH", json!({})).is_ok());
    }

    #[test]
    fn test_category_set_from_tags() {
        let set = CategorySet::from_tags(&["REQUEST", "RESPONSE", "PUBLISH"]).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(Category::Publish));
        assert!(!set.contains(Category::Indication));

        assert!(CategorySet::from_tags(&["REQUEST", "NOPE"]).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let factory = MessageFactory::new(CategorySet::extended());
        let msg = factory
            .construct("INDICATION", json!({"text": "hi", "n": [1, 2, 3]}))
            .unwrap();

        let bytes = msg.encode().unwrap();
        let decoded = factory.decode(&bytes).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.category(), Category::Indication);
    }

    #[test]
    fn test_wire_shape_is_category_and_payload_map() {
        let factory = MessageFactory::default();
        let msg = factory.construct("REQUEST", json!({"text": "hi"})).unwrap();

        let as_value: Value = MsgPackCodec::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(
            as_value,
            json!({"category": "REQUEST", "payload": {"text": "hi"}})
        );
    }

    #[test]
    fn test_encode_rejects_non_map_payload() {
        let factory = MessageFactory::default();
        let msg = factory.construct("REQUEST", json!([1, 2])).unwrap();

        assert!(matches!(
            msg.encode(),
            Err(EndpointError::UnsupportedPayload(_))
        ));
    }

    #[test]
    fn test_decode_malformed_bytes() {
        let factory = MessageFactory::default();
        assert!(matches!(
            factory.decode(&[0xc1, 0x00]),
            Err(EndpointError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unregistered_tag() {
        let bytes = MsgPackCodec::encode(&json!({"category": "PUBLISH", "payload": {}})).unwrap();

        let minimal = MessageFactory::new(CategorySet::minimal());
        assert!(matches!(
            minimal.decode(&bytes),
            Err(EndpointError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_map_payload() {
        let bytes = MsgPackCodec::encode(&json!({"category": "REQUEST", "payload": "text"})).unwrap();

        assert!(matches!(
            MessageFactory::default().decode(&bytes),
            Err(EndpointError::MalformedMessage(_))
        ));
    }
}
