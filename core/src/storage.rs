use async_trait::async_trait;
use unitary_proto::{CollectionId, EntityId, Record};

use crate::error::StorageError;

mod staged;
pub use staged::{Overlay, StagedTransaction, StagingBackend, ValidationRules};

/// Failure codes reported in `RecordFailure::code`.
pub mod codes {
    pub const DUPLICATE_ID: &str = "DUPLICATE_ID";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const REQUIRED_FIELD_MISSING: &str = "REQUIRED_FIELD_MISSING";
    pub const INVALID_RECORD: &str = "INVALID_RECORD";
}

#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Start a storage transaction. Nothing written through it is visible until it commits.
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError>;

    /// Fetch committed records by id. Missing ids are skipped.
    async fn get(&self, collection: &CollectionId, ids: &[EntityId]) -> Result<Vec<Record>, StorageError>;

    /// Every committed record of the collection, ordered by id.
    async fn scan(&self, collection: &CollectionId) -> Result<Vec<Record>, StorageError>;
}

/// A write context over a storage engine.
///
/// Every write call is all-or-nothing: the whole group is validated before any of it is
/// staged, and a rejected group leaves the transaction exactly as it was.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Read records as this transaction sees them, including its own staged writes.
    async fn get(&mut self, collection: &CollectionId, ids: &[EntityId]) -> Result<Vec<Record>, StorageError>;

    /// Stage new records, returning the ids assigned to them in input order.
    async fn insert(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<Vec<EntityId>, StorageError>;

    /// Stage field changes for existing records. Fields not present are left untouched.
    async fn update(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<(), StorageError>;

    async fn delete(&mut self, collection: &CollectionId, ids: Vec<EntityId>) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>);
}
