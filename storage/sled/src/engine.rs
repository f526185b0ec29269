use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use sled::Config;
use tokio::task;
use tracing::debug;
use unitary_core::{
    error::StorageError,
    storage::{Overlay, StagedTransaction, StagingBackend, StorageEngine, StorageTransaction, ValidationRules},
};
use unitary_proto::{CollectionId, EntityId, Record};

use crate::{
    database::Database,
    error::{sled_error, SledStorageError},
};

struct SledBackend {
    database: Database,
    rules: ValidationRules,
}

#[async_trait]
impl StagingBackend for SledBackend {
    async fn read(&self, collection: &CollectionId, id: EntityId) -> Result<Option<Record>, StorageError> {
        let database = self.database.clone();
        let collection = collection.clone();
        let record = task::spawn_blocking(move || database.read(&collection, id)).await.map_err(SledStorageError::from)??;
        Ok(record)
    }

    async fn apply(&self, overlay: Overlay) -> Result<(), StorageError> {
        let database = self.database.clone();
        task::spawn_blocking(move || database.apply(overlay)).await.map_err(SledStorageError::from)??;
        Ok(())
    }

    fn rules(&self) -> &ValidationRules { &self.rules }
}

pub struct SledStorageEngine {
    backend: Arc<SledBackend>,
}

impl SledStorageEngine {
    pub fn with_homedir_folder(folder_name: &str) -> anyhow::Result<Self> {
        let dir = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Failed to get home directory"))?.join(folder_name);

        Self::with_path(dir)
    }

    pub fn with_path(path: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&path)?;
        let dbpath = path.join("sled");
        let db = sled::open(&dbpath)?;
        Ok(Self::open(db))
    }

    pub fn new() -> anyhow::Result<Self> { Self::with_homedir_folder(".unitary") }

    pub fn new_test() -> anyhow::Result<Self> {
        let db = Config::new().temporary(true).flush_every_ms(None).open()?;
        Ok(Self::open(db))
    }

    fn open(db: sled::Db) -> Self { Self { backend: Arc::new(SledBackend { database: Database::open(db), rules: ValidationRules::default() }) } }

    /// Reject inserts and updates into `collection` that leave `field` absent or null.
    pub fn require_field(self, collection: impl Into<CollectionId>, field: impl Into<String>) -> Self {
        self.backend.rules.require_field(collection, field);
        self
    }

    pub fn database(&self) -> &Database { &self.backend.database }

    pub fn list_collections(&self) -> Vec<CollectionId> { self.backend.database.list_collections() }

    /// Flush committed writes to disk.
    pub async fn flush(&self) -> Result<usize, StorageError> { self.backend.database.db.flush_async().await.map_err(sled_error) }
}

#[async_trait]
impl StorageEngine for SledStorageEngine {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        debug!("SledStorageEngine.begin");
        Ok(Box::new(StagedTransaction::new(self.backend.clone())))
    }

    async fn get(&self, collection: &CollectionId, ids: &[EntityId]) -> Result<Vec<Record>, StorageError> {
        let database = self.backend.database.clone();
        let collection = collection.clone();
        let ids = ids.to_vec();
        // sled is blocking
        let records = task::spawn_blocking(move || database.read_many(&collection, &ids)).await.map_err(SledStorageError::from)??;
        Ok(records)
    }

    async fn scan(&self, collection: &CollectionId) -> Result<Vec<Record>, StorageError> {
        let database = self.backend.database.clone();
        let collection = collection.clone();
        let records = task::spawn_blocking(move || database.scan(&collection)).await.map_err(SledStorageError::from)??;
        Ok(records)
    }
}
