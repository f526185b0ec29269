use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unitary_proto::{CollectionId, EntityId, Operation, Record};

use crate::unit_of_work::UnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerPhase {
    BeforeInsert,
    BeforeUpdate,
    BeforeDelete,
    AfterInsert,
    AfterUpdate,
    AfterDelete,
}

impl TriggerPhase {
    pub fn before(operation: Operation) -> Self {
        match operation {
            Operation::Insert => TriggerPhase::BeforeInsert,
            Operation::Update => TriggerPhase::BeforeUpdate,
            Operation::Delete => TriggerPhase::BeforeDelete,
        }
    }

    pub fn after(operation: Operation) -> Self {
        match operation {
            Operation::Insert => TriggerPhase::AfterInsert,
            Operation::Update => TriggerPhase::AfterUpdate,
            Operation::Delete => TriggerPhase::AfterDelete,
        }
    }

    pub fn is_before(&self) -> bool { matches!(self, TriggerPhase::BeforeInsert | TriggerPhase::BeforeUpdate | TriggerPhase::BeforeDelete) }
}

impl std::fmt::Display for TriggerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TriggerPhase::BeforeInsert => "before insert",
            TriggerPhase::BeforeUpdate => "before update",
            TriggerPhase::BeforeDelete => "before delete",
            TriggerPhase::AfterInsert => "after insert",
            TriggerPhase::AfterUpdate => "after update",
            TriggerPhase::AfterDelete => "after delete",
        };
        f.write_str(name)
    }
}

/// A record- or field-level error attached by a handler. Any such error blocks the save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub index: usize,
    pub id: Option<EntityId>,
    pub field: Option<String>,
    pub message: String,
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "#{} {}: {}", self.index, field, self.message),
            None => write!(f, "#{}: {}", self.index, self.message),
        }
    }
}

/// What a handler sees during one lifecycle phase.
pub struct TriggerContext<'a> {
    phase: TriggerPhase,
    collection: &'a CollectionId,
    records: &'a mut [Record],
    old: &'a [Record],
    errors: Vec<RecordError>,
    unit_of_work: &'a mut UnitOfWork,
}

impl<'a> TriggerContext<'a> {
    pub fn new(
        phase: TriggerPhase,
        collection: &'a CollectionId,
        records: &'a mut [Record],
        old: &'a [Record],
        unit_of_work: &'a mut UnitOfWork,
    ) -> Self {
        Self { phase, collection, records, old, errors: Vec::new(), unit_of_work }
    }

    pub fn phase(&self) -> TriggerPhase { self.phase }

    pub fn collection(&self) -> &CollectionId { self.collection }

    /// Incoming records. For deletes these are the stored records being removed.
    pub fn records(&self) -> &[Record] { &*self.records }

    /// Changes made here in a before phase are what gets written.
    pub fn records_mut(&mut self) -> &mut [Record] { &mut *self.records }

    /// Stored state of the records prior to an update or delete. Empty for inserts.
    pub fn old(&self) -> &[Record] { self.old }

    pub fn add_error(&mut self, index: usize, message: impl Into<String>) {
        let id = self.records.get(index).and_then(|r| r.id);
        self.errors.push(RecordError { index, id, field: None, message: message.into() });
    }

    pub fn add_field_error(&mut self, index: usize, field: impl Into<String>, message: impl Into<String>) {
        let id = self.records.get(index).and_then(|r| r.id);
        self.errors.push(RecordError { index, id, field: Some(field.into()), message: message.into() });
    }

    pub fn has_errors(&self) -> bool { !self.errors.is_empty() }

    /// The transaction's unit of work, for follow-up writes.
    pub fn unit_of_work(&mut self) -> &mut UnitOfWork { &mut *self.unit_of_work }

    pub fn into_errors(self) -> Vec<RecordError> { self.errors }
}

/// Business logic for one collection, one method per lifecycle phase.
pub trait TriggerHandler: Send + Sync {
    fn before_insert(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Ok(()) }
    fn before_update(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Ok(()) }
    fn before_delete(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Ok(()) }
    fn after_insert(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Ok(()) }
    fn after_update(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Ok(()) }
    fn after_delete(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Ok(()) }
}

pub fn run_phase(handler: &dyn TriggerHandler, cx: &mut TriggerContext<'_>) -> anyhow::Result<()> {
    debug!("dispatch {} on {} ({} record(s))", cx.phase(), cx.collection(), cx.records().len());
    match cx.phase() {
        TriggerPhase::BeforeInsert => handler.before_insert(cx),
        TriggerPhase::BeforeUpdate => handler.before_update(cx),
        TriggerPhase::BeforeDelete => handler.before_delete(cx),
        TriggerPhase::AfterInsert => handler.after_insert(cx),
        TriggerPhase::AfterUpdate => handler.after_update(cx),
        TriggerPhase::AfterDelete => handler.after_delete(cx),
    }
}

type HandlerFactory = Arc<dyn Fn() -> Box<dyn TriggerHandler> + Send + Sync>;

/// Explicit mapping from collection to handler constructor, filled in at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: BTreeMap<CollectionId, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register the handler constructor for `collection`, replacing any earlier one.
    pub fn register<F, H>(&mut self, collection: impl Into<CollectionId>, factory: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: TriggerHandler + 'static,
    {
        let collection = collection.into();
        if self.factories.insert(collection.clone(), Arc::new(move || Box::new(factory()) as Box<dyn TriggerHandler>)).is_some() {
            warn!("replacing handler registered for {collection}");
        }
        self
    }

    pub fn contains(&self, collection: &CollectionId) -> bool { self.factories.contains_key(collection) }

    /// A fresh handler instance for `collection`, if one is registered.
    pub fn handler(&self, collection: &CollectionId) -> Option<Box<dyn TriggerHandler>> { self.factories.get(collection).map(|factory| factory()) }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_set().entries(self.factories.keys()).finish() }
}

/// Enable/bypass switches for dispatch, resolved once when the runtime is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub enabled: bool,
    pub bypass: BTreeSet<CollectionId>,
}

impl Default for DispatchConfig {
    fn default() -> Self { Self { enabled: true, bypass: BTreeSet::new() } }
}

impl DispatchConfig {
    pub fn is_enabled(&self, collection: &CollectionId) -> bool { self.enabled && !self.bypass.contains(collection) }
}

/// Resolves the handler for a collection, honouring the dispatch switches.
pub struct Dispatcher<'a> {
    registry: &'a HandlerRegistry,
    config: &'a DispatchConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a HandlerRegistry, config: &'a DispatchConfig) -> Self { Self { registry, config } }

    pub fn handler(&self, collection: &CollectionId) -> Option<Box<dyn TriggerHandler>> {
        if !self.config.is_enabled(collection) {
            debug!("dispatch bypassed for {collection}");
            return None;
        }
        self.registry.handler(collection)
    }
}
