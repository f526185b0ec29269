mod common;
use common::*;

use unitary::{
    policy::{GrantPolicyAgent, Principal},
    unit_of_work::WriteCall,
    Config, FlushMode, HandlerRegistry, Operation,
};
use unitary_storage_memory::MemoryStorageEngine;

#[tokio::test]
async fn runtime_honours_config_file() -> Result<(), anyhow::Error> {
    let path = std::env::temp_dir().join(format!("unitary-config-{}.json", ulid::Ulid::new()));
    std::fs::write(
        &path,
        r#"{
            "flush_mode": "per_type",
            "type_order": ["opportunity"],
            "grants": { "sales": [{ "collection": "*", "operations": ["insert"] }] }
        }"#,
    )?;
    let config = Config::from_path(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(config.flush_mode, FlushMode::PerType);

    let agent = GrantPolicyAgent::from_grants(&config.grants);
    let harness = harness_with(MemoryStorageEngine::new(), agent, config, HandlerRegistry::new());
    let ctx = harness.runtime.context(Principal::new("ada", "sales"));

    let mut trx = ctx.begin();
    trx.unit_of_work().register_new(account("acme"));
    trx.unit_of_work().register_new(opportunity(0));
    let report = trx.commit().await?;

    assert_eq!(
        report.writes,
        vec![
            WriteCall { collection: "opportunity".into(), operation: Operation::Insert, count: 1 },
            WriteCall { collection: "account".into(), operation: Operation::Insert, count: 1 },
        ]
    );
    Ok(())
}

#[test]
fn missing_config_file_is_an_error() {
    assert!(Config::from_path(std::env::temp_dir().join("unitary-does-not-exist.json")).is_err());
}
