//! # Unitary
//!
//! Unitary buffers the record writes of one logical transaction and flushes them to storage
//! in a few large, authorized, ordered calls instead of many small ones.
//!
//! ## Core Concepts
//!
//! - **Record**: a map of fields belonging to a collection, with an id once stored
//! - **Unit of work**: the per-transaction buffer of pending inserts, updates and deletes
//! - **Policy agent**: decides whether a principal may read or write a collection
//! - **Trigger handler**: business logic run before and after each primary write
//! - **Error log**: durable record of flush failures, written outside the failing transaction
//!
//! ## Flush order
//!
//! A commit writes every buffered insert, then every update, then every delete. Within a
//! phase each collection gets exactly one write call. In the default `All` mode a phase is
//! authorized for every collection before any of it is written; in `PerType` mode each
//! collection is authorized right before its own write, following the configured type order.
//!
//! ## Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use unitary::{policy::{PermissiveAgent, DEFAULT_CONTEXT}, Record, Runtime};
//! # use unitary_storage_memory::MemoryStorageEngine;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Runtime::new(Arc::new(MemoryStorageEngine::new()), PermissiveAgent::new());
//! let ctx = runtime.context(DEFAULT_CONTEXT);
//!
//! let mut trx = ctx.begin();
//! let account = trx.insert(vec![Record::new("account").with("name", "Acme")]).await?;
//!
//! // Follow-up writes are buffered and flushed together on commit
//! let account_id = account[0].id.map(|id| id.to_string());
//! trx.unit_of_work().register_new_all((0..150).map(|n| Record::new("contact").with("account", account_id.clone()).with("n", n)));
//! let report = trx.commit().await?;
//!
//! assert_eq!(report.records_written(), 150);
//! assert_eq!(ctx.select_all("contact").await?.len(), 150);
//! # Ok(())
//! # }
//! ```

pub use unitary_core as core;
pub use unitary_proto as proto;
// Record fields are JSON values
pub use serde_json;

// Re-export commonly used types
pub use unitary_core::{
    buffer,
    config::{self, Config},
    context::Context,
    dispatch::{self, HandlerRegistry, TriggerContext, TriggerHandler, TriggerPhase},
    error, error_log, policy,
    runtime::{Runtime, RuntimeBuilder},
    selector::Selection,
    storage,
    transaction::Transaction,
    unit_of_work::{self, CommitReport, FlushMode, UnitOfWork},
};
pub use unitary_proto::{CollectionId, EntityId, Operation, Record};
