use indexmap::{IndexMap, IndexSet};
use tracing::debug;
use unitary_proto::{CollectionId, EntityId, Operation, Record};

/// A write group taken out of the buffer for one (collection, operation) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Insert(Vec<Record>),
    Update(Vec<Record>),
    Delete(Vec<EntityId>),
}

impl PendingWrite {
    pub fn operation(&self) -> Operation {
        match self {
            PendingWrite::Insert(_) => Operation::Insert,
            PendingWrite::Update(_) => Operation::Update,
            PendingWrite::Delete(_) => Operation::Delete,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PendingWrite::Insert(records) | PendingWrite::Update(records) => records.len(),
            PendingWrite::Delete(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Identities carried by the group. Inserts have none yet.
    pub fn ids(&self) -> Vec<EntityId> {
        match self {
            PendingWrite::Insert(_) => Vec::new(),
            PendingWrite::Update(records) => records.iter().filter_map(|r| r.id).collect(),
            PendingWrite::Delete(ids) => ids.clone(),
        }
    }
}

/// Holding area for writes registered during a transaction.
///
/// Registration never fails: input that cannot be buffered (no collection, or no
/// id where one is required) is dropped. Updates are keyed by id with the last
/// registration winning; deletes are deduplicated by id.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    inserts: IndexMap<CollectionId, Vec<Record>>,
    updates: IndexMap<CollectionId, IndexMap<EntityId, Record>>,
    deletes: IndexMap<CollectionId, IndexSet<EntityId>>,
}

impl RecordBuffer {
    pub fn new() -> Self { Self::default() }

    pub fn register_new(&mut self, record: Record) {
        if record.collection.is_empty() {
            debug!("register_new: dropping record without collection");
            return;
        }
        self.inserts.entry(record.collection.clone()).or_default().push(record);
    }

    pub fn register_new_all(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.register_new(record);
        }
    }

    pub fn register_dirty(&mut self, record: Record) {
        let Some(id) = record.id else {
            debug!("register_dirty: dropping {record}, it has no id");
            return;
        };
        if record.collection.is_empty() {
            debug!("register_dirty: dropping {id} without collection");
            return;
        }
        // IndexMap::insert keeps the original position of an existing key
        self.updates.entry(record.collection.clone()).or_default().insert(id, record);
    }

    pub fn register_dirty_all(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.register_dirty(record);
        }
    }

    pub fn register_deleted(&mut self, record: Record) {
        let Some(id) = record.id else {
            debug!("register_deleted: dropping {record}, it has no id");
            return;
        };
        if record.collection.is_empty() {
            debug!("register_deleted: dropping {id} without collection");
            return;
        }
        self.deletes.entry(record.collection).or_default().insert(id);
    }

    pub fn register_deleted_all(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.register_deleted(record);
        }
    }

    pub fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
        self.deletes.clear();
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Total number of buffered operations.
    pub fn len(&self) -> usize {
        self.inserts.values().map(Vec::len).sum::<usize>()
            + self.updates.values().map(IndexMap::len).sum::<usize>()
            + self.deletes.values().map(IndexSet::len).sum::<usize>()
    }

    /// Collections holding pending work of `operation`, in first-registration order for that operation.
    pub fn collections(&self, operation: Operation) -> Vec<CollectionId> {
        match operation {
            Operation::Insert => self.inserts.keys().cloned().collect(),
            Operation::Update => self.updates.keys().cloned().collect(),
            Operation::Delete => self.deletes.keys().cloned().collect(),
        }
    }

    /// A copy of the pending group, or `None` if there is nothing to write.
    pub fn pending(&self, operation: Operation, collection: &CollectionId) -> Option<PendingWrite> {
        let pending = match operation {
            Operation::Insert => PendingWrite::Insert(self.inserts.get(collection)?.clone()),
            Operation::Update => PendingWrite::Update(self.updates.get(collection)?.values().cloned().collect()),
            Operation::Delete => PendingWrite::Delete(self.deletes.get(collection)?.iter().copied().collect()),
        };
        (!pending.is_empty()).then_some(pending)
    }

    pub fn inserts(&self, collection: &CollectionId) -> &[Record] { self.inserts.get(collection).map_or(&[], Vec::as_slice) }

    pub fn updates(&self, collection: &CollectionId) -> Vec<&Record> {
        self.updates.get(collection).map(|group| group.values().collect()).unwrap_or_default()
    }

    pub fn deletes(&self, collection: &CollectionId) -> Vec<EntityId> {
        self.deletes.get(collection).map(|group| group.iter().copied().collect()).unwrap_or_default()
    }
}
