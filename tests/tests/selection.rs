mod common;
use common::*;

use unitary::{
    error::RetrievalError,
    policy::{AccessDenied, ContextData, PolicyAgent},
    CollectionId, Config, HandlerRegistry, Operation, Record, Selection,
};
use unitary_storage_memory::MemoryStorageEngine;

#[derive(Clone)]
struct Owner(String);

impl ContextData for Owner {}

/// Everyone may write notes; each owner only sees their own. Ledgers are off limits.
#[derive(Clone)]
struct OwnerAgent;

impl PolicyAgent for OwnerAgent {
    type ContextData = Owner;

    fn can_write(&self, _cdata: &Owner, collection: &CollectionId, _operation: Operation) -> bool { collection != "ledger" }

    fn can_read(&self, _cdata: &Owner, collection: &CollectionId) -> bool { collection != "ledger" }

    fn check_read_record(&self, cdata: &Owner, record: &Record) -> bool { record.get_str("owner") == Some(cdata.0.as_str()) }
}

fn note(owner: &str, topic: &str) -> Record { Record::new("note").with("owner", owner).with("topic", topic) }

#[tokio::test]
async fn rows_are_filtered_per_principal() -> Result<(), anyhow::Error> {
    let harness = harness_with(MemoryStorageEngine::new(), OwnerAgent, Config::default(), HandlerRegistry::new());
    let ada = harness.runtime.context(Owner("ada".into()));
    let bob = harness.runtime.context(Owner("bob".into()));

    let mut trx = ada.begin();
    trx.unit_of_work().register_new_all(vec![note("ada", "rust"), note("ada", "sled"), note("bob", "rust")]);
    trx.commit().await?;

    assert_eq!(ada.select_all("note").await?.len(), 2);
    assert_eq!(bob.select_all("note").await?.len(), 1);
    assert_eq!(harness.engine.count(&"note".into()), 3);

    let rust = ada.select(Selection::new("note").filter("topic", "rust")).await?;
    assert_eq!(rust.len(), 1);
    assert_eq!(rust[0].get_str("owner"), Some("ada"));

    assert_eq!(ada.select(Selection::new("note").limit(1)).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn select_by_id() -> Result<(), anyhow::Error> {
    let harness = harness_with(MemoryStorageEngine::new(), OwnerAgent, Config::default(), HandlerRegistry::new());
    let ada = harness.runtime.context(Owner("ada".into()));

    let mut trx = ada.begin();
    let notes = trx.insert(vec![note("ada", "rust"), note("ada", "sled")]).await?;
    trx.commit().await?;

    let id = notes[1].id.expect("id");
    let found = ada.select(Selection::new("note").ids([id])).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_str("topic"), Some("sled"));
    Ok(())
}

#[tokio::test]
async fn uncommitted_writes_are_invisible() -> Result<(), anyhow::Error> {
    let harness = harness_with(MemoryStorageEngine::new(), OwnerAgent, Config::default(), HandlerRegistry::new());
    let ada = harness.runtime.context(Owner("ada".into()));

    let mut trx = ada.begin();
    trx.insert(vec![note("ada", "rust")]).await?;
    assert!(ada.select_all("note").await?.is_empty());
    trx.commit().await?;
    assert_eq!(ada.select_all("note").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn denied_collections_are_an_error() {
    let harness = harness_with(MemoryStorageEngine::new(), OwnerAgent, Config::default(), HandlerRegistry::new());
    let ada = harness.runtime.context(Owner("ada".into()));

    match ada.select_all("ledger").await {
        Err(RetrievalError::AccessDenied(AccessDenied::Read(collection))) => assert_eq!(collection, CollectionId::from("ledger")),
        other => panic!("expected access denied, got {other:?}"),
    }
}
