use std::sync::Arc;

use async_trait::async_trait;
use unitary_proto::{CollectionId, Operation, Record};

use crate::{
    dispatch::Dispatcher,
    error::{RetrievalError, StorageError},
    error_log::ErrorReporter,
    policy::{AuthorizationGate, Authorizer, PolicyAgent},
    runtime::Runtime,
    selector::{self, Selection},
    storage::{StorageEngine, StorageTransaction},
    transaction::Transaction,
    unit_of_work::UnitOfWork,
};

/// Type-erased context wrapper: a runtime bound to one principal.
pub struct Context(pub(crate) Arc<dyn TContext + Send + Sync + 'static>);

impl Clone for Context {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

pub struct RuntimeAndContext<SE: StorageEngine, PA: PolicyAgent> {
    pub runtime: Runtime<SE, PA>,
    pub cdata: PA::ContextData,
}

#[async_trait]
pub trait TContext {
    /// Write permissions of this context's principal
    fn gate(&self) -> &dyn AuthorizationGate;
    fn reporter(&self) -> &dyn ErrorReporter;
    fn dispatcher(&self) -> Dispatcher<'_>;
    /// A fresh unit of work configured from the runtime config
    fn unit_of_work(&self) -> UnitOfWork;
    async fn begin_storage(&self) -> Result<Box<dyn StorageTransaction>, StorageError>;
    async fn select(&self, selection: &Selection) -> Result<Vec<Record>, RetrievalError>;
}

impl<SE: StorageEngine, PA: PolicyAgent> AuthorizationGate for RuntimeAndContext<SE, PA> {
    fn check_permission(&self, collection: &CollectionId, operation: Operation) -> bool {
        Authorizer::new(&self.runtime.policy_agent, &self.cdata).check_permission(collection, operation)
    }
}

#[async_trait]
impl<SE: StorageEngine, PA: PolicyAgent> TContext for RuntimeAndContext<SE, PA> {
    fn gate(&self) -> &dyn AuthorizationGate { self }
    fn reporter(&self) -> &dyn ErrorReporter { self.runtime.reporter.as_ref() }
    fn dispatcher(&self) -> Dispatcher<'_> { Dispatcher::new(&self.runtime.registry, &self.runtime.config.dispatch) }
    fn unit_of_work(&self) -> UnitOfWork {
        let config = &self.runtime.config;
        UnitOfWork::new(config.flush_mode).with_type_order(config.type_order.iter().cloned())
    }
    async fn begin_storage(&self) -> Result<Box<dyn StorageTransaction>, StorageError> { self.runtime.storage.begin().await }
    async fn select(&self, selection: &Selection) -> Result<Vec<Record>, RetrievalError> {
        selector::select(self.runtime.storage.as_ref(), &self.runtime.policy_agent, &self.cdata, selection).await
    }
}

impl Context {
    pub fn new<SE: StorageEngine, PA: PolicyAgent>(runtime: Runtime<SE, PA>, cdata: PA::ContextData) -> Self {
        Self(Arc::new(RuntimeAndContext { runtime, cdata }))
    }

    /// Begin a transaction. It owns its own unit of work.
    pub fn begin(&self) -> Transaction { Transaction::new(self.clone()) }

    /// Read committed records the principal is allowed to see.
    pub async fn select(&self, selection: impl Into<Selection>) -> Result<Vec<Record>, RetrievalError> {
        let selection = selection.into();
        self.0.select(&selection).await
    }

    pub async fn select_all(&self, collection: impl Into<CollectionId>) -> Result<Vec<Record>, RetrievalError> {
        self.select(Selection::new(collection)).await
    }
}
