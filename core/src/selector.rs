use serde_json::Value;
use tracing::debug;
use unitary_proto::{CollectionId, EntityId, Record};

use crate::{
    error::RetrievalError,
    policy::{AccessDenied, PolicyAgent},
    storage::StorageEngine,
};

/// A read of one collection: optionally restricted to ids, filtered by field equality, and limited.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub collection: CollectionId,
    pub ids: Option<Vec<EntityId>>,
    pub filters: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl Selection {
    pub fn new(collection: impl Into<CollectionId>) -> Self { Self { collection: collection.into(), ids: None, filters: Vec::new(), limit: None } }

    pub fn ids(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &Record) -> bool { self.filters.iter().all(|(field, value)| record.get(field) == Some(value)) }
}

impl From<&str> for Selection {
    fn from(collection: &str) -> Self { Selection::new(collection) }
}

impl From<CollectionId> for Selection {
    fn from(collection: CollectionId) -> Self { Selection::new(collection) }
}

/// Collection-level denial is an error; records hidden by the row-level check are left out silently.
pub(crate) async fn select<SE: StorageEngine, PA: PolicyAgent>(
    storage: &SE,
    agent: &PA,
    cdata: &PA::ContextData,
    selection: &Selection,
) -> Result<Vec<Record>, RetrievalError> {
    let collection = &selection.collection;
    if !agent.can_read(cdata, collection) {
        return Err(AccessDenied::Read(collection.clone()).into());
    }

    let records = match &selection.ids {
        Some(ids) => storage.get(collection, ids).await?,
        None => storage.scan(collection).await?,
    };
    let total = records.len();
    let visible = records.into_iter().filter(|record| selection.matches(record) && agent.check_read_record(cdata, record));
    let visible: Vec<Record> = match selection.limit {
        Some(limit) => visible.take(limit).collect(),
        None => visible.collect(),
    };
    debug!("select {collection}: {} of {total} record(s) visible", visible.len());
    Ok(visible)
}
