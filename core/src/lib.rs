pub mod buffer;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod error_log;
pub mod policy;
pub mod runtime;
pub mod selector;
pub mod storage;
pub mod transaction;
pub mod unit_of_work;

pub use context::Context;
pub use runtime::Runtime;
pub use transaction::Transaction;
pub use unit_of_work::UnitOfWork;

pub use unitary_proto as proto;
pub use unitary_proto::{CollectionId, EntityId, Operation, Record};
