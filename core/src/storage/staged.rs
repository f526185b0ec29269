use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use tracing::debug;
use unitary_proto::{CollectionId, EntityId, Record};

use super::{codes, StorageTransaction};
use crate::error::{RecordFailure, StorageError};

/// Writes staged by a transaction, keyed by collection then id. `None` marks a removal.
#[derive(Debug, Default)]
pub struct Overlay {
    changes: BTreeMap<CollectionId, BTreeMap<EntityId, Option<Record>>>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool { self.changes.values().all(BTreeMap::is_empty) }

    pub fn len(&self) -> usize { self.changes.values().map(BTreeMap::len).sum() }

    pub fn into_changes(self) -> BTreeMap<CollectionId, BTreeMap<EntityId, Option<Record>>> { self.changes }

    fn lookup(&self, collection: &CollectionId, id: EntityId) -> Option<Option<&Record>> {
        self.changes.get(collection).and_then(|staged| staged.get(&id)).map(Option::as_ref)
    }

    fn stage(&mut self, collection: &CollectionId, id: EntityId, record: Option<Record>) {
        self.changes.entry(collection.clone()).or_default().insert(id, record);
    }
}

/// Per-collection field rules checked on every staged insert and update.
///
/// Clones share one rule set, so a rule added through any clone applies to all of them.
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    required: Arc<RwLock<BTreeMap<CollectionId, BTreeSet<String>>>>,
}

impl ValidationRules {
    pub fn require_field(&self, collection: impl Into<CollectionId>, field: impl Into<String>) {
        let mut required = self.required.write().unwrap_or_else(PoisonError::into_inner);
        required.entry(collection.into()).or_default().insert(field.into());
    }

    /// The first required field that is absent or null.
    pub fn missing_field(&self, record: &Record) -> Option<String> {
        let required = self.required.read().unwrap_or_else(PoisonError::into_inner);
        required.get(&record.collection)?.iter().find(|field| record.get(field).map_or(true, serde_json::Value::is_null)).cloned()
    }
}

/// The committed side of a staged transaction.
#[async_trait]
pub trait StagingBackend: Send + Sync + 'static {
    async fn read(&self, collection: &CollectionId, id: EntityId) -> Result<Option<Record>, StorageError>;

    /// Make every change in the overlay visible.
    async fn apply(&self, overlay: Overlay) -> Result<(), StorageError>;

    fn rules(&self) -> &ValidationRules;
}

/// A storage transaction that stages writes in memory and hands them to the backend on commit.
pub struct StagedTransaction<B: StagingBackend> {
    backend: Arc<B>,
    overlay: Overlay,
}

impl<B: StagingBackend> StagedTransaction<B> {
    pub fn new(backend: Arc<B>) -> Self { Self { backend, overlay: Overlay::default() } }

    async fn current(&self, collection: &CollectionId, id: EntityId) -> Result<Option<Record>, StorageError> {
        match self.overlay.lookup(collection, id) {
            Some(staged) => Ok(staged.cloned()),
            None => self.backend.read(collection, id).await,
        }
    }
}

fn foreign_record(index: usize, record: &Record, collection: &CollectionId) -> RecordFailure {
    RecordFailure::new(index, record.id, codes::INVALID_RECORD, format!("record of {} written to {}", record.collection, collection))
}

fn reject<T>(collection: &CollectionId, failures: Vec<RecordFailure>) -> Result<T, StorageError> {
    debug!("rejecting write to {collection}: {} failure(s)", failures.len());
    Err(StorageError::Rejected(failures))
}

#[async_trait]
impl<B: StagingBackend> StorageTransaction for StagedTransaction<B> {
    async fn get(&mut self, collection: &CollectionId, ids: &[EntityId]) -> Result<Vec<Record>, StorageError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.current(collection, *id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn insert(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<Vec<EntityId>, StorageError> {
        let mut failures = Vec::new();
        let mut staged = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();

        for (index, mut record) in records.into_iter().enumerate() {
            if record.collection != *collection {
                failures.push(foreign_record(index, &record, collection));
                continue;
            }
            let id = match record.id {
                Some(id) => {
                    if !seen.insert(id) || self.current(collection, id).await?.is_some() {
                        failures.push(RecordFailure::new(index, Some(id), codes::DUPLICATE_ID, "a record with this id already exists"));
                        continue;
                    }
                    id
                }
                None => EntityId::new(),
            };
            if let Some(field) = self.backend.rules().missing_field(&record) {
                failures.push(RecordFailure::new(index, record.id, codes::REQUIRED_FIELD_MISSING, format!("required field {field} is missing")));
                continue;
            }
            record.id = Some(id);
            staged.push((id, record));
        }

        if !failures.is_empty() {
            return reject(collection, failures);
        }
        let ids = staged.iter().map(|(id, _)| *id).collect();
        for (id, record) in staged {
            self.overlay.stage(collection, id, Some(record));
        }
        Ok(ids)
    }

    async fn update(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<(), StorageError> {
        let mut failures = Vec::new();
        let mut merged: BTreeMap<EntityId, Record> = BTreeMap::new();

        for (index, record) in records.into_iter().enumerate() {
            if record.collection != *collection {
                failures.push(foreign_record(index, &record, collection));
                continue;
            }
            let Some(id) = record.id else {
                failures.push(RecordFailure::new(index, None, codes::INVALID_RECORD, "record has no id"));
                continue;
            };
            let base = match merged.remove(&id) {
                Some(earlier) => Some(earlier),
                None => self.current(collection, id).await?,
            };
            let Some(mut current) = base else {
                failures.push(RecordFailure::new(index, Some(id), codes::NOT_FOUND, "record does not exist"));
                continue;
            };
            current.fields.extend(record.fields);
            if let Some(field) = self.backend.rules().missing_field(&current) {
                failures.push(RecordFailure::new(index, Some(id), codes::REQUIRED_FIELD_MISSING, format!("required field {field} is missing")));
                continue;
            }
            merged.insert(id, current);
        }

        if !failures.is_empty() {
            return reject(collection, failures);
        }
        for (id, record) in merged {
            self.overlay.stage(collection, id, Some(record));
        }
        Ok(())
    }

    async fn delete(&mut self, collection: &CollectionId, ids: Vec<EntityId>) -> Result<(), StorageError> {
        let mut failures = Vec::new();
        let mut removed = BTreeSet::new();

        for (index, id) in ids.into_iter().enumerate() {
            if removed.contains(&id) {
                continue;
            }
            if self.current(collection, id).await?.is_none() {
                failures.push(RecordFailure::new(index, Some(id), codes::NOT_FOUND, "record does not exist"));
                continue;
            }
            removed.insert(id);
        }

        if !failures.is_empty() {
            return reject(collection, failures);
        }
        for id in removed {
            self.overlay.stage(collection, id, None);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        debug!("committing {} staged change(s)", self.overlay.len());
        let Self { backend, overlay } = *self;
        backend.apply(overlay).await
    }

    async fn rollback(self: Box<Self>) {
        debug!("discarding {} staged change(s)", self.overlay.len());
    }
}
