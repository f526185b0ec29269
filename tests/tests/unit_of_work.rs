mod common;
use common::*;

use unitary::{
    error::{CommitError, MutationError},
    storage::codes,
    unit_of_work::WriteCall,
    CollectionId, Config, FlushMode, HandlerRegistry, Operation, Record,
};
use unitary_storage_memory::MemoryStorageEngine;

fn call(collection: &str, operation: Operation, count: usize) -> WriteCall { WriteCall { collection: collection.into(), operation, count } }

#[tokio::test]
async fn empty_commit_never_touches_storage() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), HandlerRegistry::new());

    let report = ctx.begin().commit().await?;

    assert!(report.is_noop());
    assert_eq!(harness.engine.transactions_started(), 0);
    assert!(harness.reporter.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn one_write_call_per_collection() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), HandlerRegistry::new());

    let mut trx = ctx.begin();
    trx.unit_of_work().register_new_all((0..150).map(contact));
    trx.unit_of_work().register_new_all((0..50).map(opportunity));
    let report = trx.commit().await?;

    assert_eq!(report.writes, vec![call("contact", Operation::Insert, 150), call("opportunity", Operation::Insert, 50)]);
    assert_eq!(report.inserted_ids(&"contact".into()).len(), 150);
    assert_eq!(harness.engine.transactions_started(), 1);
    assert_eq!(harness.engine.count(&"contact".into()), 150);
    assert_eq!(harness.engine.count(&"opportunity".into()), 50);
    Ok(())
}

#[tokio::test]
async fn per_type_mode_follows_declared_order() -> Result<(), anyhow::Error> {
    let config = Config { flush_mode: FlushMode::PerType, type_order: vec!["opportunity".into(), "account".into()], ..Default::default() };
    let (_harness, ctx) = permissive(config, HandlerRegistry::new());

    let mut trx = ctx.begin();
    trx.unit_of_work().register_new_all((0..2).map(contact));
    trx.unit_of_work().register_new(account("acme"));
    trx.unit_of_work().register_new(opportunity(0));
    let report = trx.commit().await?;

    assert_eq!(
        report.writes,
        vec![call("opportunity", Operation::Insert, 1), call("account", Operation::Insert, 1), call("contact", Operation::Insert, 2)]
    );
    Ok(())
}

#[tokio::test]
async fn inserts_then_updates_then_deletes() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), HandlerRegistry::new());

    let mut trx = ctx.begin();
    let seeded = trx.insert(vec![account("acme"), account("globex")]).await?;
    trx.commit().await?;
    let (acme, globex) = (seeded[0].id.expect("id"), seeded[1].id.expect("id"));

    let mut trx = ctx.begin();
    trx.unit_of_work().register_deleted(Record::existing("account", globex));
    trx.unit_of_work().register_dirty(Record::existing("account", acme).with("tier", "gold"));
    trx.unit_of_work().register_new(contact(0));
    let report = trx.commit().await?;

    assert_eq!(
        report.writes,
        vec![call("contact", Operation::Insert, 1), call("account", Operation::Update, 1), call("account", Operation::Delete, 1)]
    );
    let accounts = ctx.select_all("account").await?;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].get_str("tier"), Some("gold"));
    assert_eq!(harness.engine.count(&"contact".into()), 1);
    Ok(())
}

#[tokio::test]
async fn last_registered_update_wins() -> Result<(), anyhow::Error> {
    let (_harness, ctx) = permissive(Config::default(), HandlerRegistry::new());

    let mut trx = ctx.begin();
    let id = trx.insert(vec![account("acme")]).await?[0].id.expect("id");
    trx.commit().await?;

    let mut trx = ctx.begin();
    trx.unit_of_work().register_dirty(Record::existing("account", id).with("tier", "silver"));
    trx.unit_of_work().register_dirty(Record::existing("account", id).with("tier", "gold"));
    let report = trx.commit().await?;

    assert_eq!(report.writes, vec![call("account", Operation::Update, 1)]);
    assert_eq!(ctx.select_all("account").await?[0].get_str("tier"), Some("gold"));
    Ok(())
}

#[tokio::test]
async fn rejected_group_rolls_back_the_whole_transaction() -> Result<(), anyhow::Error> {
    let engine = MemoryStorageEngine::new().require_field("opportunity", "amount");
    let harness = harness_with(engine, unitary::policy::PermissiveAgent::new(), Config::default(), HandlerRegistry::new());
    let ctx = harness.runtime.context(unitary::policy::DEFAULT_CONTEXT);

    let mut trx = ctx.begin();
    trx.insert(vec![account("acme")]).await?;
    trx.unit_of_work().register_new_all((0..3).map(contact));
    trx.unit_of_work().register_new(opportunity(0).with("amount", 10));
    trx.unit_of_work().register_new(opportunity(1));

    let err = trx.commit().await.expect_err("opportunity 1 has no amount");
    let reference = err.reference().expect("failure was reported");
    match err {
        MutationError::Commit { error: CommitError::Write(write), .. } => {
            assert_eq!(write.collection, CollectionId::from("opportunity"));
            assert_eq!(write.operation, Operation::Insert);
            assert_eq!(write.code(), codes::REQUIRED_FIELD_MISSING);
            assert_eq!(write.record_failures().len(), 1);
            assert_eq!(write.record_failures()[0].index, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    // contacts were written before the failure, but the storage transaction never committed
    for collection in ["account", "contact", "opportunity"] {
        assert_eq!(harness.engine.count(&collection.into()), 0, "{collection} should be empty");
    }

    let entries = harness.reporter.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reference, reference);
    assert_eq!(entries[0].code, codes::REQUIRED_FIELD_MISSING);
    assert_eq!(entries[0].collection, Some(CollectionId::from("opportunity")));
    assert_eq!(entries[0].component, "UnitOfWork");
    Ok(())
}

#[tokio::test]
async fn deleting_a_missing_record_is_not_found() -> Result<(), anyhow::Error> {
    let (_harness, ctx) = permissive(Config::default(), HandlerRegistry::new());

    let mut trx = ctx.begin();
    let missing = unitary::EntityId::new();
    trx.unit_of_work().register_deleted(Record::existing("account", missing));
    let err = trx.commit().await.expect_err("nothing to delete");

    match err {
        MutationError::Commit { error, .. } => {
            assert_eq!(error.code(), codes::NOT_FOUND);
            assert_eq!(error.ids(), &[missing]);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
