use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use unitary_proto::{CollectionId, EntityId, Operation, Record};

use crate::{
    context::Context,
    dispatch::{run_phase, TriggerContext, TriggerHandler, TriggerPhase},
    error::{MutationError, StorageError, WriteError},
    error_log::{ErrorLogEntry, Severity},
    policy::AccessDenied,
    storage::StorageTransaction,
    unit_of_work::{CommitReport, RecordWriter, UnitOfWork},
};

/// The storage transaction behind a `Transaction`, begun on first write.
struct LazyStorage {
    context: Context,
    trx: Option<Box<dyn StorageTransaction>>,
}

impl LazyStorage {
    async fn started(&mut self) -> Result<&mut Box<dyn StorageTransaction>, StorageError> {
        let trx = match self.trx.take() {
            Some(trx) => trx,
            None => {
                debug!("beginning storage transaction");
                self.context.0.begin_storage().await?
            }
        };
        Ok(self.trx.insert(trx))
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        match self.trx.take() {
            Some(trx) => trx.commit().await,
            None => Ok(()),
        }
    }

    async fn abort(&mut self) {
        if let Some(trx) = self.trx.take() {
            trx.rollback().await;
        }
    }
}

#[async_trait]
impl RecordWriter for LazyStorage {
    async fn insert(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<Vec<EntityId>, StorageError> {
        self.started().await?.insert(collection, records).await
    }

    async fn update(&mut self, collection: &CollectionId, records: Vec<Record>) -> Result<(), StorageError> {
        self.started().await?.update(collection, records).await
    }

    async fn delete(&mut self, collection: &CollectionId, ids: Vec<EntityId>) -> Result<(), StorageError> {
        self.started().await?.delete(collection, ids).await
    }
}

impl Drop for LazyStorage {
    fn drop(&mut self) {
        if self.trx.is_some() {
            debug!("storage transaction dropped without commit, discarding staged writes");
        }
    }
}

/// One logical transaction: primary writes dispatched through handlers, plus the unit of
/// work those handlers feed. Nothing is visible to other transactions until `commit`.
///
/// Dropping a transaction without committing rolls it back.
pub struct Transaction {
    context: Context,
    storage: LazyStorage,
    unit_of_work: UnitOfWork,
    rollback_only: bool,
}

impl Transaction {
    pub(crate) fn new(context: Context) -> Self {
        let unit_of_work = context.0.unit_of_work();
        Self { storage: LazyStorage { context: context.clone(), trx: None }, context, unit_of_work, rollback_only: false }
    }

    /// The buffer business logic registers follow-up writes into.
    pub fn unit_of_work(&mut self) -> &mut UnitOfWork { &mut self.unit_of_work }

    pub fn is_rollback_only(&self) -> bool { self.rollback_only }

    /// Mark the transaction so that `commit` rolls back instead.
    pub fn set_rollback_only(&mut self) { self.rollback_only = true; }

    /// Create records, returning them with their assigned ids.
    pub async fn insert(&mut self, records: Vec<Record>) -> Result<Vec<Record>, MutationError> { self.apply(Operation::Insert, records).await }

    pub async fn update(&mut self, records: Vec<Record>) -> Result<Vec<Record>, MutationError> { self.apply(Operation::Update, records).await }

    /// Delete records by id, returning their stored state.
    pub async fn delete(&mut self, records: Vec<Record>) -> Result<Vec<Record>, MutationError> { self.apply(Operation::Delete, records).await }

    /// Flush the unit of work, then commit storage. Any failure rolls the whole transaction back.
    pub async fn commit(mut self) -> Result<CommitReport, MutationError> {
        if self.rollback_only {
            warn!("Transaction.commit: marked for rollback");
            self.storage.abort().await;
            return Err(MutationError::RollbackOnly);
        }

        let report = match self.unit_of_work.commit(self.context.0.gate(), &mut self.storage, self.context.0.reporter()).await {
            Ok(report) => report,
            Err(error) => {
                self.storage.abort().await;
                return Err(MutationError::Commit { error, reference: self.unit_of_work.failure_reference() });
            }
        };

        if let Err(err) = self.storage.finish().await {
            let entry = ErrorLogEntry::new("Transaction", "commit", "STORAGE_ERROR", err.to_string()).with_severity(Severity::Critical);
            if let Err(report_err) = self.context.0.reporter().report(entry) {
                warn!("Transaction.commit: could not report storage failure: {report_err}");
            }
            return Err(err.into());
        }
        debug!("Transaction.commit: done");
        Ok(report)
    }

    pub async fn rollback(mut self) {
        debug!("Transaction.rollback");
        self.storage.abort().await;
    }

    async fn apply(&mut self, operation: Operation, records: Vec<Record>) -> Result<Vec<Record>, MutationError> {
        if self.rollback_only {
            return Err(MutationError::RollbackOnly);
        }

        let mut groups: IndexMap<CollectionId, Vec<Record>> = IndexMap::new();
        for record in records {
            groups.entry(record.collection.clone()).or_default().push(record);
        }

        let mut written = Vec::new();
        for (collection, group) in groups {
            match self.apply_group(operation, &collection, group).await {
                Ok(records) => written.extend(records),
                Err(err) => {
                    self.rollback_only = true;
                    return Err(err);
                }
            }
        }
        Ok(written)
    }

    async fn apply_group(&mut self, operation: Operation, collection: &CollectionId, mut records: Vec<Record>) -> Result<Vec<Record>, MutationError> {
        let handler = self.context.0.dispatcher().handler(collection);
        let ids: Vec<EntityId> = records.iter().filter_map(|r| r.id).collect();
        let old = match operation {
            Operation::Insert => Vec::new(),
            Operation::Update | Operation::Delete => self.storage.started().await?.get(collection, &ids).await?,
        };
        if operation == Operation::Delete {
            records = old.clone();
        }

        if let Some(handler) = handler.as_deref() {
            self.run_handler(handler, operation, TriggerPhase::before(operation), collection, &mut records, &old)?;
        }

        if !self.context.0.gate().check_permission(collection, operation) {
            return Err(AccessDenied::Write { collection: collection.clone(), operation, ids }.into());
        }

        let result = match operation {
            Operation::Insert => self.storage.insert(collection, records.clone()).await.map(|assigned| {
                for (record, id) in records.iter_mut().zip(assigned) {
                    record.id = Some(id);
                }
            }),
            Operation::Update => self.storage.update(collection, records.clone()).await,
            Operation::Delete => self.storage.delete(collection, ids.clone()).await,
        };
        if let Err(err) = result {
            info!("{operation} of {collection} rejected: {err}");
            return Err(MutationError::Write(WriteError { collection: collection.clone(), operation, ids, failure: err.into() }));
        }

        if let Some(handler) = handler.as_deref() {
            self.run_handler(handler, operation, TriggerPhase::after(operation), collection, &mut records, &old)?;
        }
        Ok(records)
    }

    fn run_handler(
        &mut self,
        handler: &dyn TriggerHandler,
        operation: Operation,
        phase: TriggerPhase,
        collection: &CollectionId,
        records: &mut [Record],
        old: &[Record],
    ) -> Result<(), MutationError> {
        let mut cx = TriggerContext::new(phase, collection, records, old, &mut self.unit_of_work);
        if let Err(cause) = run_phase(handler, &mut cx) {
            let mut entry = ErrorLogEntry::new("TriggerHandler", phase.to_string(), "HANDLER_FAILED", format!("{cause:#}"))
                .with_target(collection.clone(), Some(operation));
            entry.ids = cx.records().iter().filter_map(|record| record.id).collect();
            if let Err(report_err) = self.context.0.reporter().report(entry) {
                warn!("could not report handler failure: {report_err}");
            }
            return Err(MutationError::Handler { collection: collection.clone(), phase, cause });
        }

        let errors = cx.into_errors();
        if !errors.is_empty() {
            info!("{phase} on {collection} blocked the save with {} error(s)", errors.len());
            return Err(MutationError::Validation(errors));
        }
        Ok(())
    }
}
