//! Sled-backed storage engine.
//!
//! Each collection lives in its own tree named `collection_<name>`, keyed by the 16 byte record id,
//! with records stored as JSON. Staged writes are applied with one batch per tree on commit, so a
//! commit is atomic within a collection but not across collections.

mod database;
mod engine;
mod error;

pub use database::Database;
pub use engine::SledStorageEngine;
pub use error::SledStorageError;
