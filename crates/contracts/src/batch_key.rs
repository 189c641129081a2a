//! BatchKey - partition identifier for batching
//!
//! Keys are cloned on every receive, timer schedule and dispatched batch, so
//! the string lives behind an `Arc<str>`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Logical partition key. Items under different keys never share a batch.
///
/// # Examples
/// ```
/// use contracts::BatchKey;
///
/// let key: BatchKey = "orders-eu".into();
/// assert_eq!(key.as_str(), "orders-eu");
/// assert!(!key.is_blank());
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey(Arc<str>);

impl BatchKey {
    pub fn new(key: &str) -> Self {
        Self(Arc::from(key))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only keys cannot identify a partition.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Deref for BatchKey {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BatchKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for BatchKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BatchKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for BatchKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl PartialEq<str> for BatchKey {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for BatchKey {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchKey({:?})", self.0)
    }
}

impl Serialize for BatchKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BatchKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}
