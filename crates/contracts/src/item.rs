//! Item - opaque payload accumulated into batches

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque item payload.
///
/// The batcher never looks inside an item; only arrival order matters.
/// Serialized as a string when the payload is valid UTF-8, as a byte
/// sequence otherwise, so JSON state files and sink output stay readable.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Item(Bytes);

impl Item {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&'static str> for Item {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Item {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<Bytes> for Item {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => write!(f, "Item({text:?})"),
            None => write!(f, "Item({} bytes)", self.0.len()),
        }
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_text() {
            Some(text) => serializer.serialize_str(text),
            None => serde_bytes::serialize(self.0.as_ref(), serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ItemRepr {
    Text(String),
    Binary(serde_bytes::ByteBuf),
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ItemRepr::deserialize(deserializer)? {
            ItemRepr::Text(text) => Self::from(text),
            ItemRepr::Binary(buf) => Self::from(buf.into_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_item_serializes_as_string() {
        let item = Item::from("hello");
        assert_eq!(serde_json::to_string(&item).unwrap(), "\"hello\"");
    }

    #[test]
    fn test_binary_item_survives_json() {
        let item = Item::from(vec![0xff, 0x00, 0x7f]);
        assert!(item.as_text().is_none());

        let json = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_bytes(), &[0xff, 0x00, 0x7f]);
    }

    #[test]
    fn test_debug_does_not_dump_binary() {
        let item = Item::from(vec![0xfe; 64]);
        assert_eq!(format!("{item:?}"), "Item(64 bytes)");
    }
}
