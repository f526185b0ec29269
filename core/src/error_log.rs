//! Decoupled error reporting.
//!
//! Failures are published as [`ErrorLogEntry`] values without waiting on anything. An
//! [`ErrorLogSubscriber`] task drains them into an [`ErrorLogSink`] out of band, so the log
//! entry survives even when the transaction that failed is rolled back.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, sync::Notify, task::JoinHandle};
use tracing::{debug, error, warn};
use ulid::Ulid;
use unitary_proto::{CollectionId, EntityId, Operation, Record};

use crate::{
    error::{CommitError, ReportError, StorageError},
    storage::StorageEngine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// A structured failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// Reference number shown to end users
    pub reference: Ulid,
    pub timestamp: DateTime<Utc>,
    pub collection: Option<CollectionId>,
    pub operation: Option<Operation>,
    pub ids: Vec<EntityId>,
    pub code: String,
    pub message: String,
    pub severity: Severity,
    /// Originating component and method, e.g. `UnitOfWork` / `commit`
    pub component: String,
    pub method: String,
}

impl ErrorLogEntry {
    pub fn new(component: impl Into<String>, method: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reference: Ulid::new(),
            timestamp: Utc::now(),
            collection: None,
            operation: None,
            ids: Vec::new(),
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
            component: component.into(),
            method: method.into(),
        }
    }

    pub fn from_commit_error(err: &CommitError, component: &str, method: &str) -> Self {
        let mut entry = Self::new(component, method, err.code(), err.to_string());
        entry.collection = err.collection().cloned();
        entry.operation = err.operation();
        entry.ids = err.ids().to_vec();
        entry
    }

    pub fn with_target(mut self, collection: CollectionId, operation: Option<Operation>) -> Self {
        self.collection = Some(collection);
        self.operation = operation;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The entry as a record of `collection`, keyed by its reference number.
    pub fn to_record(&self, collection: &CollectionId) -> Result<Record, serde_json::Error> {
        let fields = match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        Ok(Record { collection: collection.clone(), id: Some(EntityId::from_ulid(self.reference)), fields })
    }

    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(record.fields.clone().into_iter().collect()))
    }
}

/// Accepts failures for logging. Must return promptly and never wait on the log itself.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, entry: ErrorLogEntry) -> Result<(), ReportError>;
}

/// Publishes entries onto an unbounded channel read by an [`ErrorLogSubscriber`].
#[derive(Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<ErrorLogEntry>,
}

impl ChannelReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ErrorLogEntry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ErrorReporter for ChannelReporter {
    fn report(&self, entry: ErrorLogEntry) -> Result<(), ReportError> {
        debug!("publishing error log entry {}", entry.reference);
        self.sender.send(entry).map_err(|_| ReportError::Closed)
    }
}

/// Writes entries to the tracing log only. Used when no error log is configured.
#[derive(Clone, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, entry: ErrorLogEntry) -> Result<(), ReportError> {
        error!(
            reference = %entry.reference,
            code = %entry.code,
            component = %entry.component,
            method = %entry.method,
            "{}",
            entry.message
        );
        Ok(())
    }
}

/// Durable destination of error log entries.
#[async_trait]
pub trait ErrorLogSink: Send + Sync + 'static {
    async fn persist(&self, entry: ErrorLogEntry) -> Result<(), StorageError>;
}

/// Keeps entries in memory.
#[derive(Clone, Default)]
pub struct MemoryErrorLog {
    entries: Arc<Mutex<Vec<ErrorLogEntry>>>,
}

impl MemoryErrorLog {
    pub fn new() -> Self { Self::default() }

    pub fn entries(&self) -> Vec<ErrorLogEntry> { self.entries.lock().unwrap().clone() }

    pub fn find(&self, reference: Ulid) -> Option<ErrorLogEntry> {
        self.entries.lock().unwrap().iter().find(|entry| entry.reference == reference).cloned()
    }
}

#[async_trait]
impl ErrorLogSink for MemoryErrorLog {
    async fn persist(&self, entry: ErrorLogEntry) -> Result<(), StorageError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Persists each entry as a record through its own storage transaction.
pub struct StorageErrorLog<SE: StorageEngine> {
    engine: Arc<SE>,
    collection: CollectionId,
}

impl<SE: StorageEngine> StorageErrorLog<SE> {
    pub fn new(engine: Arc<SE>, collection: CollectionId) -> Self { Self { engine, collection } }
}

#[async_trait]
impl<SE: StorageEngine> ErrorLogSink for StorageErrorLog<SE> {
    async fn persist(&self, entry: ErrorLogEntry) -> Result<(), StorageError> {
        let record = entry.to_record(&self.collection)?;
        let mut trx = self.engine.begin().await?;
        if let Err(err) = trx.insert(&self.collection, vec![record]).await {
            trx.rollback().await;
            return Err(err);
        }
        trx.commit().await
    }
}

/// Background task draining published entries into a sink.
///
/// The task ends once every reporter clone has been dropped.
pub struct ErrorLogSubscriber {
    handle: JoinHandle<()>,
    processed: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ErrorLogSubscriber {
    /// Spawn onto the current tokio runtime.
    pub fn spawn<S: ErrorLogSink>(mut receiver: mpsc::UnboundedReceiver<ErrorLogEntry>, sink: S) -> Self {
        let processed = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        let handle = {
            let processed = processed.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                while let Some(entry) = receiver.recv().await {
                    let reference = entry.reference;
                    if let Err(err) = sink.persist(entry).await {
                        warn!("failed to persist error log entry {reference}: {err}");
                    }
                    processed.fetch_add(1, Ordering::AcqRel);
                    notify.notify_waiters();
                }
                debug!("error log subscriber finished");
            })
        };
        Self { handle, processed, notify }
    }

    /// Number of entries handled so far, persisted or not.
    pub fn processed(&self) -> usize { self.processed.load(Ordering::Acquire) }

    /// Wait until at least `count` entries have been handled.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.processed() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait for the task to drain and exit. Only returns once all reporters are gone.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!("error log subscriber task failed: {err}");
        }
    }
}
