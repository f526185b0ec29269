use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use unitary_proto::{CollectionId, EntityId, Operation, Record};

use crate::{
    buffer::{PendingWrite, RecordBuffer},
    error::{CommitError, StorageError, WriteError},
    error_log::{ErrorLogEntry, ErrorReporter},
    policy::{AccessDenied, AuthorizationGate},
};

/// How pending groups are sequenced during a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Phase by phase, regardless of type: every sub-group of a phase is authorized
    /// before any of that phase is written.
    #[default]
    All,
    /// Type by type within each phase, following the declared type order.
    /// Each type is authorized right before its own write.
    PerType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Committed,
    Failed,
}

/// The write side of a flush. One call per (collection, operation) group.
#[async_trait]
pub trait RecordWriter: Send {
    async fn insert(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<Vec<EntityId>, StorageError>;
    async fn update(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<(), StorageError>;
    async fn delete(&mut self, collection: &CollectionId, ids: Vec<EntityId>) -> Result<(), StorageError>;
}

/// One write call issued by a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub collection: CollectionId,
    pub operation: Operation,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub writes: Vec<WriteCall>,
    pub inserted: Vec<(CollectionId, Vec<EntityId>)>,
}

impl CommitReport {
    /// Nothing was written.
    pub fn is_noop(&self) -> bool { self.writes.is_empty() }

    pub fn records_written(&self) -> usize { self.writes.iter().map(|w| w.count).sum() }

    /// Ids assigned to inserts of `collection`, in registration order.
    pub fn inserted_ids(&self, collection: &CollectionId) -> &[EntityId] {
        self.inserted.iter().find(|(c, _)| c == collection).map_or(&[], |(_, ids)| ids.as_slice())
    }
}

/// Accumulates the writes of one logical transaction and flushes them in a fixed order.
///
/// A flush runs inserts, then updates, then deletes. Each (collection, operation) group is
/// authorized once and written with a single all-or-nothing call. A successful flush
/// empties the buffer; a failed one leaves it intact so the caller can retry or abandon.
/// Groups written before a failure are not compensated here; that is the job of the
/// enclosing storage transaction's rollback.
#[derive(Debug)]
pub struct UnitOfWork {
    mode: FlushMode,
    type_order: Vec<CollectionId>,
    buffer: RecordBuffer,
    state: FlushState,
    last_outcome: Option<FlushOutcome>,
    failure_reference: Option<ulid::Ulid>,
}

impl Default for UnitOfWork {
    fn default() -> Self { Self::new(FlushMode::All) }
}

impl UnitOfWork {
    pub fn new(mode: FlushMode) -> Self {
        Self { mode, type_order: Vec::new(), buffer: RecordBuffer::new(), state: FlushState::Idle, last_outcome: None, failure_reference: None }
    }

    /// PER_TYPE flushing with an explicit order, e.g. parents before children.
    pub fn per_type(type_order: impl IntoIterator<Item = impl Into<CollectionId>>) -> Self {
        Self::new(FlushMode::PerType).with_type_order(type_order)
    }

    pub fn with_type_order(mut self, type_order: impl IntoIterator<Item = impl Into<CollectionId>>) -> Self {
        self.type_order = type_order.into_iter().map(Into::into).collect();
        self
    }

    pub fn mode(&self) -> FlushMode { self.mode }

    pub fn state(&self) -> FlushState { self.state }

    pub fn last_outcome(&self) -> Option<FlushOutcome> { self.last_outcome }

    /// Error log reference of the last failed commit.
    pub fn failure_reference(&self) -> Option<ulid::Ulid> { self.failure_reference }

    pub fn buffer(&self) -> &RecordBuffer { &self.buffer }

    pub fn register_new(&mut self, record: Record) { self.buffer.register_new(record) }

    pub fn register_new_all(&mut self, records: impl IntoIterator<Item = Record>) { self.buffer.register_new_all(records) }

    pub fn register_dirty(&mut self, record: Record) { self.buffer.register_dirty(record) }

    pub fn register_dirty_all(&mut self, records: impl IntoIterator<Item = Record>) { self.buffer.register_dirty_all(records) }

    pub fn register_deleted(&mut self, record: Record) { self.buffer.register_deleted(record) }

    pub fn register_deleted_all(&mut self, records: impl IntoIterator<Item = Record>) { self.buffer.register_deleted_all(records) }

    /// Abandon all pending work.
    pub fn clear(&mut self) { self.buffer.clear() }

    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    /// Flush every pending write.
    ///
    /// Errors are returned unchanged. Before returning one, a structured entry is handed to
    /// `reporter`; if reporting fails that failure is logged and dropped.
    pub async fn commit(
        &mut self,
        gate: &dyn AuthorizationGate,
        writer: &mut dyn RecordWriter,
        reporter: &dyn ErrorReporter,
    ) -> Result<CommitReport, CommitError> {
        if self.buffer.is_empty() {
            debug!("UnitOfWork.commit: nothing registered");
            self.last_outcome = Some(FlushOutcome::Committed);
            return Ok(CommitReport::default());
        }

        debug!("UnitOfWork.commit: flushing {} pending operation(s) in {:?} mode", self.buffer.len(), self.mode);
        self.state = FlushState::Flushing;
        let result = match self.mode {
            FlushMode::All => self.flush_all(gate, writer).await,
            FlushMode::PerType => self.flush_per_type(gate, writer).await,
        };
        self.state = FlushState::Idle;

        match result {
            Ok(report) => {
                info!("UnitOfWork.commit: {} write call(s), {} record(s)", report.writes.len(), report.records_written());
                self.buffer.clear();
                self.last_outcome = Some(FlushOutcome::Committed);
                self.failure_reference = None;
                Ok(report)
            }
            Err(err) => {
                warn!("UnitOfWork.commit failed: {err}");
                self.last_outcome = Some(FlushOutcome::Failed);
                self.failure_reference = Some(report_failure(reporter, &err));
                Err(err)
            }
        }
    }

    async fn flush_all(&self, gate: &dyn AuthorizationGate, writer: &mut dyn RecordWriter) -> Result<CommitReport, CommitError> {
        let mut report = CommitReport::default();
        for operation in Operation::FLUSH_ORDER {
            let groups: Vec<(CollectionId, PendingWrite)> = self
                .buffer
                .collections(operation)
                .into_iter()
                .filter_map(|collection| self.buffer.pending(operation, &collection).map(|pending| (collection, pending)))
                .collect();

            for (collection, pending) in &groups {
                authorize(gate, collection, pending)?;
            }
            for (collection, pending) in groups {
                write(writer, collection, pending, &mut report).await?;
            }
        }
        Ok(report)
    }

    async fn flush_per_type(&self, gate: &dyn AuthorizationGate, writer: &mut dyn RecordWriter) -> Result<CommitReport, CommitError> {
        let mut report = CommitReport::default();
        for operation in Operation::FLUSH_ORDER {
            for collection in &self.flush_order(operation) {
                let Some(pending) = self.buffer.pending(operation, collection) else { continue };
                authorize(gate, collection, &pending)?;
                write(writer, collection.clone(), pending, &mut report).await?;
            }
        }
        Ok(report)
    }

    /// Declared types first, then the rest in the order they were first registered for `operation`.
    fn flush_order(&self, operation: Operation) -> Vec<CollectionId> {
        let mut order: IndexSet<CollectionId> = self.type_order.iter().cloned().collect();
        order.extend(self.buffer.collections(operation));
        order.into_iter().collect()
    }
}

fn authorize(gate: &dyn AuthorizationGate, collection: &CollectionId, pending: &PendingWrite) -> Result<(), CommitError> {
    let operation = pending.operation();
    if gate.check_permission(collection, operation) {
        return Ok(());
    }
    warn!("UnitOfWork.commit: {operation} on {collection} denied");
    Err(AccessDenied::Write { collection: collection.clone(), operation, ids: pending.ids() }.into())
}

async fn write(
    writer: &mut dyn RecordWriter,
    collection: CollectionId,
    pending: PendingWrite,
    report: &mut CommitReport,
) -> Result<(), CommitError> {
    let operation = pending.operation();
    let count = pending.len();
    let ids = pending.ids();
    debug!("UnitOfWork.commit: {operation} {count} record(s) of {collection}");

    let result = match pending {
        PendingWrite::Insert(records) => writer.insert(&collection, records).await.map(|inserted| report.inserted.push((collection.clone(), inserted))),
        PendingWrite::Update(records) => writer.update(&collection, records).await,
        PendingWrite::Delete(ids) => writer.delete(&collection, ids).await,
    };
    match result {
        Ok(()) => {
            report.writes.push(WriteCall { collection, operation, count });
            Ok(())
        }
        Err(err) => Err(WriteError { collection, operation, ids, failure: err.into() }.into()),
    }
}

fn report_failure(reporter: &dyn ErrorReporter, err: &CommitError) -> ulid::Ulid {
    let entry = ErrorLogEntry::from_commit_error(err, "UnitOfWork", "commit");
    let reference = entry.reference;
    if let Err(report_err) = reporter.report(entry) {
        warn!("UnitOfWork.commit: could not report failure {reference}: {report_err}");
    }
    reference
}
