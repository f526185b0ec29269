mod common;
use common::*;

use anyhow::anyhow;
use unitary::{
    dispatch::DispatchConfig, error::MutationError, Config, HandlerRegistry, Operation, Record, TriggerContext, TriggerHandler, TriggerPhase,
};

struct ContactHandler;

impl TriggerHandler for ContactHandler {
    fn before_insert(&self, cx: &mut TriggerContext<'_>) -> anyhow::Result<()> {
        let mut missing = Vec::new();
        for (index, record) in cx.records_mut().iter_mut().enumerate() {
            match record.get_str("email").map(str::to_lowercase) {
                Some(email) => record.set("email", email),
                None => missing.push(index),
            }
        }
        for index in missing {
            cx.add_field_error(index, "email", "email is required");
        }
        Ok(())
    }

    fn after_insert(&self, cx: &mut TriggerContext<'_>) -> anyhow::Result<()> {
        let audits: Vec<Record> =
            cx.records().iter().map(|r| Record::new("audit").with("subject", r.id.map(|id| id.to_string())).with("action", "created")).collect();
        cx.unit_of_work().register_new_all(audits);
        Ok(())
    }
}

struct AccountHandler;

impl TriggerHandler for AccountHandler {
    fn before_update(&self, _cx: &mut TriggerContext<'_>) -> anyhow::Result<()> { Err(anyhow!("pricing service unavailable")) }

    fn before_delete(&self, cx: &mut TriggerContext<'_>) -> anyhow::Result<()> {
        let locked: Vec<usize> =
            cx.records().iter().enumerate().filter(|(_, r)| r.get("locked") == Some(&serde_json::Value::Bool(true))).map(|(i, _)| i).collect();
        for index in locked {
            cx.add_error(index, "locked accounts cannot be deleted");
        }
        Ok(())
    }
}

fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("contact", || ContactHandler).register("account", || AccountHandler);
    registry
}

#[tokio::test]
async fn after_insert_work_is_flushed_on_commit() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), registry());

    let mut trx = ctx.begin();
    let contacts =
        trx.insert(vec![Record::new("contact").with("email", "Ada@Example.com"), Record::new("contact").with("email", "bob@example.com")]).await?;
    assert_eq!(contacts[0].get_str("email"), Some("ada@example.com"));
    assert_eq!(trx.unit_of_work().buffer().len(), 2);

    let report = trx.commit().await?;
    assert_eq!(report.writes.len(), 1);
    assert_eq!(report.writes[0].operation, Operation::Insert);
    assert_eq!(report.writes[0].count, 2);

    let audits = ctx.select_all("audit").await?;
    assert_eq!(audits.len(), 2);
    let first = contacts[0].id.expect("id").to_string();
    assert!(audits.iter().any(|a| a.get_str("subject") == Some(first.as_str())));
    assert_eq!(harness.engine.count(&"contact".into()), 2);
    Ok(())
}

#[tokio::test]
async fn record_errors_block_the_save() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), registry());

    let mut trx = ctx.begin();
    let err = trx.insert(vec![Record::new("contact").with("email", "ada@example.com"), Record::new("contact")]).await.expect_err("missing email");
    match err {
        MutationError::Validation(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].index, 1);
            assert_eq!(errors[0].field.as_deref(), Some("email"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(trx.is_rollback_only());
    assert!(matches!(trx.commit().await, Err(MutationError::RollbackOnly)));

    assert_eq!(harness.engine.count(&"contact".into()), 0);
    assert_eq!(harness.engine.count(&"audit".into()), 0);
    // validation is an expected outcome, not an error log entry
    assert!(harness.reporter.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn bypassed_collections_skip_their_handler() -> Result<(), anyhow::Error> {
    let config = Config { dispatch: DispatchConfig { enabled: true, bypass: ["contact".into()].into_iter().collect() }, ..Default::default() };
    let (harness, ctx) = permissive(config, registry());

    let mut trx = ctx.begin();
    trx.insert(vec![Record::new("contact")]).await?;
    let report = trx.commit().await?;

    assert!(report.is_noop());
    assert_eq!(harness.engine.count(&"contact".into()), 1);
    assert_eq!(harness.engine.count(&"audit".into()), 0);
    Ok(())
}

#[tokio::test]
async fn handler_failures_are_reported() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), registry());

    let mut trx = ctx.begin();
    let id = trx.insert(vec![Record::new("account").with("name", "acme")]).await?[0].id.expect("id");
    trx.commit().await?;

    let mut trx = ctx.begin();
    let err = trx.update(vec![Record::existing("account", id).with("tier", "gold")]).await.expect_err("handler fails");
    match &err {
        MutationError::Handler { collection, phase, cause } => {
            assert_eq!(collection.as_str(), "account");
            assert_eq!(*phase, TriggerPhase::BeforeUpdate);
            assert!(cause.to_string().contains("pricing service"));
        }
        other => panic!("unexpected error: {other}"),
    }
    trx.rollback().await;

    let entries = harness.reporter.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].code, "HANDLER_FAILED");
    assert_eq!(entries[0].method, "before update");
    assert_eq!(entries[0].collection.as_ref().map(|c| c.as_str()), Some("account"));
    assert_eq!(entries[0].operation, Some(Operation::Update));
    assert_eq!(entries[0].ids, vec![id]);
    assert_eq!(ctx.select_all("account").await?[0].get("tier"), None);
    Ok(())
}

#[tokio::test]
async fn before_delete_sees_stored_records() -> Result<(), anyhow::Error> {
    let (harness, ctx) = permissive(Config::default(), registry());

    let mut trx = ctx.begin();
    let seeded = trx.insert(vec![Record::new("account").with("name", "acme").with("locked", true), Record::new("account").with("name", "globex")]).await?;
    trx.commit().await?;
    let (locked, open) = (seeded[0].id.expect("id"), seeded[1].id.expect("id"));

    let mut trx = ctx.begin();
    let err = trx.delete(vec![Record::existing("account", locked)]).await.expect_err("locked");
    assert!(matches!(err, MutationError::Validation(ref errors) if errors[0].id == Some(locked)));
    trx.rollback().await;

    let mut trx = ctx.begin();
    let removed = trx.delete(vec![Record::existing("account", open)]).await?;
    assert_eq!(removed[0].get_str("name"), Some("globex"));
    trx.commit().await?;

    assert_eq!(harness.engine.count(&"account".into()), 1);
    Ok(())
}
