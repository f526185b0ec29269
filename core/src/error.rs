//! Error types for the unit of work and its collaborators.
//!
//! `CommitError` is what a flush returns, and it is handed back to the caller unchanged.
//! `MutationError` wraps it at the transaction boundary together with the failures that
//! can happen before a flush is ever attempted.

use thiserror::Error;
use unitary_proto::{CollectionId, EntityId, Operation};

use crate::{dispatch::RecordError, policy::AccessDenied};

/// Per-record detail reported by a rejected write group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Position of the record within the write call
    pub index: usize,
    pub id: Option<EntityId>,
    pub code: String,
    pub message: String,
}

impl RecordFailure {
    pub fn new(index: usize, id: Option<EntityId>, code: &str, message: impl Into<String>) -> Self {
        Self { index, id, code: code.to_string(), message: message.into() }
    }
}

impl std::fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "#{} ({}): {} {}", self.index, id, self.code, self.message),
            None => write!(f, "#{}: {} {}", self.index, self.code, self.message),
        }
    }
}

/// Error type for storage engines and storage transactions.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write group was refused as a whole; nothing from it was staged
    #[error("{} record(s) rejected", .0.len())]
    Rejected(Vec<RecordFailure>),

    #[error("storage transaction already closed")]
    TransactionClosed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl StorageError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self { StorageError::Backend(Box::new(err)) }
}

/// How a write group failed.
#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error("{}", format_failures(.0))]
    Records(Vec<RecordFailure>),

    #[error("{0}")]
    Batch(StorageError),
}

fn format_failures(failures: &[RecordFailure]) -> String { failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ") }

impl From<StorageError> for WriteFailure {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Rejected(failures) => WriteFailure::Records(failures),
            other => WriteFailure::Batch(other),
        }
    }
}

/// A write group rejected by storage. Groups are all-or-nothing, so none of its records were written.
#[derive(Debug, Error)]
#[error("{operation} of {collection} rejected: {failure}")]
pub struct WriteError {
    pub collection: CollectionId,
    pub operation: Operation,
    /// Identities in the rejected group; empty for inserts
    pub ids: Vec<EntityId>,
    pub failure: WriteFailure,
}

impl WriteError {
    /// The first failure code, or `STORAGE_ERROR` when storage gave no per-record detail.
    pub fn code(&self) -> &str {
        match &self.failure {
            WriteFailure::Records(failures) => failures.first().map_or("STORAGE_ERROR", |f| f.code.as_str()),
            WriteFailure::Batch(_) => "STORAGE_ERROR",
        }
    }

    pub fn record_failures(&self) -> &[RecordFailure] {
        match &self.failure {
            WriteFailure::Records(failures) => failures,
            WriteFailure::Batch(_) => &[],
        }
    }
}

/// The first failure encountered by a flush.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    AccessDenied(AccessDenied),

    #[error(transparent)]
    Write(WriteError),
}

impl CommitError {
    pub fn collection(&self) -> Option<&CollectionId> {
        match self {
            CommitError::AccessDenied(denied) => denied.collection(),
            CommitError::Write(err) => Some(&err.collection),
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            CommitError::AccessDenied(denied) => denied.operation(),
            CommitError::Write(err) => Some(err.operation),
        }
    }

    pub fn ids(&self) -> &[EntityId] {
        match self {
            CommitError::AccessDenied(denied) => denied.ids(),
            CommitError::Write(err) => &err.ids,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            CommitError::AccessDenied(_) => "ACCESS_DENIED",
            CommitError::Write(err) => err.code(),
        }
    }

    /// The message to show end users; details live in the error log under `reference`.
    pub fn user_message(&self, reference: ulid::Ulid) -> String {
        format!("An unexpected error occurred while saving your changes. Reference: {reference}")
    }
}

impl From<AccessDenied> for CommitError {
    fn from(err: AccessDenied) -> Self { CommitError::AccessDenied(err) }
}

impl From<WriteError> for CommitError {
    fn from(err: WriteError) -> Self { CommitError::Write(err) }
}

/// Error type for transaction operations.
///
/// Returned from: `Transaction::insert`, `update`, `delete`, `commit`
#[derive(Debug, Error)]
pub enum MutationError {
    /// The principal may not perform the primary write
    #[error("access denied: {0}")]
    AccessDenied(AccessDenied),

    /// Handlers attached record-level errors; the save was blocked
    #[error("validation failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<RecordError>),

    /// The primary write was rejected by storage
    #[error(transparent)]
    Write(WriteError),

    /// The unit of work failed to flush. `reference` locates the error log entry.
    #[error("commit failed: {error}")]
    Commit { error: CommitError, reference: Option<ulid::Ulid> },

    /// A handler failed unexpectedly
    #[error("{phase} handler for {collection} failed: {cause:#}")]
    Handler { collection: CollectionId, phase: crate::dispatch::TriggerPhase, cause: anyhow::Error },

    /// An earlier step marked the transaction for rollback
    #[error("transaction is marked for rollback")]
    RollbackOnly,

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl MutationError {
    /// Error log reference of a failed flush, if one was reported.
    pub fn reference(&self) -> Option<ulid::Ulid> {
        match self {
            MutationError::Commit { reference, .. } => *reference,
            _ => None,
        }
    }
}

impl From<AccessDenied> for MutationError {
    fn from(err: AccessDenied) -> Self { MutationError::AccessDenied(err) }
}

impl From<StorageError> for MutationError {
    fn from(err: StorageError) -> Self { MutationError::Storage(err) }
}

/// Error type for read operations.
///
/// Returned from: `Context::select`
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("access denied: {0}")]
    AccessDenied(AccessDenied),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<AccessDenied> for RetrievalError {
    fn from(err: AccessDenied) -> Self { RetrievalError::AccessDenied(err) }
}

/// Failure to hand an entry to the error log. Never propagated out of a commit.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("error log channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
