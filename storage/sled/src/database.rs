use sled::{Batch, Db};
use tracing::debug;
use unitary_core::storage::Overlay;
use unitary_proto::{CollectionId, EntityId, Record};

use crate::error::SledStorageError;

const COLLECTION_PREFIX: &str = "collection_";

#[derive(Clone)]
pub struct Database {
    pub db: Db,
}

impl Database {
    pub fn open(db: Db) -> Self { Self { db } }

    fn tree_name(collection: &CollectionId) -> Result<String, SledStorageError> {
        if collection.is_empty() {
            return Err(SledStorageError::InvalidCollection(collection.clone()));
        }
        Ok(format!("{COLLECTION_PREFIX}{}", collection.as_str()))
    }

    /// The tree holding `collection`, created on first use.
    pub fn collection_tree(&self, collection: &CollectionId) -> Result<sled::Tree, SledStorageError> {
        Ok(self.db.open_tree(Self::tree_name(collection)?)?)
    }

    /// The tree holding `collection` if anything was ever written to it. Reads use this so
    /// looking up an unknown collection does not create it.
    pub fn existing_tree(&self, collection: &CollectionId) -> Result<Option<sled::Tree>, SledStorageError> {
        let name = Self::tree_name(collection)?;
        if !self.db.tree_names().iter().any(|existing| existing.as_ref() == name.as_bytes()) {
            return Ok(None);
        }
        Ok(Some(self.db.open_tree(name)?))
    }

    /// List all collections by looking for trees that start with `collection_`
    pub fn list_collections(&self) -> Vec<CollectionId> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                let name = String::from_utf8(name.to_vec()).ok()?;
                name.strip_prefix(COLLECTION_PREFIX).map(|c| CollectionId::from(c.to_string()))
            })
            .collect()
    }

    pub fn read(&self, collection: &CollectionId, id: EntityId) -> Result<Option<Record>, SledStorageError> {
        let Some(tree) = self.existing_tree(collection)? else { return Ok(None) };
        match tree.get(id.to_bytes())? {
            Some(ivec) => Ok(Some(serde_json::from_slice(&ivec)?)),
            None => Ok(None),
        }
    }

    pub fn read_many(&self, collection: &CollectionId, ids: &[EntityId]) -> Result<Vec<Record>, SledStorageError> {
        let Some(tree) = self.existing_tree(collection)? else { return Ok(Vec::new()) };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ivec) = tree.get(id.to_bytes())? {
                records.push(serde_json::from_slice(&ivec)?);
            }
        }
        Ok(records)
    }

    pub fn scan(&self, collection: &CollectionId) -> Result<Vec<Record>, SledStorageError> {
        let Some(tree) = self.existing_tree(collection)? else { return Ok(Vec::new()) };
        let mut records = Vec::new();
        for item in tree.iter() {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Apply staged changes, one batch per collection tree.
    pub fn apply(&self, overlay: Overlay) -> Result<(), SledStorageError> {
        // Encode everything up front so a bad record cannot leave earlier trees written
        let mut batches = Vec::new();
        for (collection, changes) in overlay.into_changes() {
            let tree = self.collection_tree(&collection)?;
            let mut batch = Batch::default();
            for (id, change) in changes {
                match change {
                    Some(record) => batch.insert(id.to_bytes().to_vec(), serde_json::to_vec(&record)?),
                    None => batch.remove(id.to_bytes().to_vec()),
                }
            }
            batches.push((collection, tree, batch));
        }
        for (collection, tree, batch) in batches {
            debug!("applying batch to {collection}");
            tree.apply_batch(batch)?;
        }
        Ok(())
    }
}
