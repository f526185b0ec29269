use serde::{Deserialize, Serialize};

/// The entity type of a record, e.g. `account` or `invoice_line`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    // Most collection ids come from handlers and records, but the error log collection has a fixed name
    pub fn fixed_name(name: &str) -> Self { CollectionId(name.to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl From<&str> for CollectionId {
    fn from(val: &str) -> Self { CollectionId(val.to_string()) }
}

impl From<String> for CollectionId {
    fn from(val: String) -> Self { CollectionId(val) }
}

impl PartialEq<str> for CollectionId {
    fn eq(&self, other: &str) -> bool { self.0 == other }
}

impl PartialEq<&str> for CollectionId {
    fn eq(&self, other: &&str) -> bool { self.0 == *other }
}

impl From<CollectionId> for String {
    fn from(collection_id: CollectionId) -> Self { collection_id.0 }
}

impl AsRef<str> for CollectionId {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}
