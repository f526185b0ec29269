use thiserror::Error;
use unitary_core::error::StorageError;
use unitary_proto::CollectionId;

#[derive(Debug, Error)]
pub enum SledStorageError {
    #[error("Storage error: {0}")]
    StorageError(#[from] sled::Error),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Invalid tree name for collection {0}")]
    InvalidCollection(CollectionId),
}

impl From<SledStorageError> for StorageError {
    fn from(err: SledStorageError) -> Self {
        match err {
            SledStorageError::Corrupt(e) => StorageError::Serialization(e),
            other => StorageError::backend(other),
        }
    }
}

pub fn sled_error(err: sled::Error) -> StorageError { SledStorageError::StorageError(err).into() }
