use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CollectionId, EntityId};

/// A record value of some collection. `id` is `None` until storage assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub collection: CollectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// A record that does not exist yet.
    pub fn new(collection: impl Into<CollectionId>) -> Self { Self { collection: collection.into(), id: None, fields: BTreeMap::new() } }

    /// A reference to an existing record.
    pub fn existing(collection: impl Into<CollectionId>, id: EntityId) -> Self {
        Self { collection: collection.into(), id: Some(id), fields: BTreeMap::new() }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) { self.fields.insert(field.into(), value.into()); }

    pub fn get(&self, field: &str) -> Option<&Value> { self.fields.get(field) }

    pub fn get_str(&self, field: &str) -> Option<&str> { self.fields.get(field).and_then(Value::as_str) }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{:#}", self.collection, id),
            None => write!(f, "{}/<new>", self.collection),
        }
    }
}
