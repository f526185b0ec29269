//! In-memory storage engine. Transactions stage their writes and apply them all at once on commit.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use tracing::debug;
use unitary_core::{
    error::StorageError,
    storage::{Overlay, StagedTransaction, StagingBackend, StorageEngine, StorageTransaction, ValidationRules},
};
use unitary_proto::{CollectionId, EntityId, Record};

type Collections = BTreeMap<CollectionId, BTreeMap<EntityId, Record>>;

struct MemoryBackend {
    collections: RwLock<Collections>,
    rules: ValidationRules,
}

fn poisoned() -> StorageError { StorageError::Backend("memory storage lock poisoned".into()) }

#[async_trait]
impl StagingBackend for MemoryBackend {
    async fn read(&self, collection: &CollectionId, id: EntityId) -> Result<Option<Record>, StorageError> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(collection).and_then(|records| records.get(&id)).cloned())
    }

    async fn apply(&self, overlay: Overlay) -> Result<(), StorageError> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        for (collection, changes) in overlay.into_changes() {
            let records = collections.entry(collection).or_default();
            for (id, change) in changes {
                match change {
                    Some(record) => records.insert(id, record),
                    None => records.remove(&id),
                };
            }
        }
        Ok(())
    }

    fn rules(&self) -> &ValidationRules { &self.rules }
}

#[derive(Clone)]
pub struct MemoryStorageEngine {
    backend: Arc<MemoryBackend>,
    transactions_started: Arc<AtomicUsize>,
}

impl Default for MemoryStorageEngine {
    fn default() -> Self { Self::new() }
}

impl MemoryStorageEngine {
    pub fn new() -> Self { Self::with_rules(ValidationRules::default()) }

    pub fn with_rules(rules: ValidationRules) -> Self {
        Self {
            backend: Arc::new(MemoryBackend { collections: RwLock::new(Collections::new()), rules }),
            transactions_started: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reject inserts and updates into `collection` that leave `field` absent or null.
    /// The rule applies to every clone of this engine.
    pub fn require_field(self, collection: impl Into<CollectionId>, field: impl Into<String>) -> Self {
        self.backend.rules.require_field(collection, field);
        self
    }

    /// Number of storage transactions begun so far.
    pub fn transactions_started(&self) -> usize { self.transactions_started.load(Ordering::Acquire) }

    /// Committed record count of `collection`.
    pub fn count(&self, collection: &CollectionId) -> usize {
        self.backend.collections.read().map(|c| c.get(collection).map_or(0, BTreeMap::len)).unwrap_or(0)
    }
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        let started = self.transactions_started.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("MemoryStorageEngine.begin #{started}");
        Ok(Box::new(StagedTransaction::new(self.backend.clone())))
    }

    async fn get(&self, collection: &CollectionId, ids: &[EntityId]) -> Result<Vec<Record>, StorageError> {
        let collections = self.backend.collections.read().map_err(|_| poisoned())?;
        let Some(records) = collections.get(collection) else { return Ok(Vec::new()) };
        Ok(ids.iter().filter_map(|id| records.get(id)).cloned().collect())
    }

    async fn scan(&self, collection: &CollectionId) -> Result<Vec<Record>, StorageError> {
        let collections = self.backend.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(collection).map(|records| records.values().cloned().collect()).unwrap_or_default())
    }
}
