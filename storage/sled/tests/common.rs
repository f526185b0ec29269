use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use unitary_core::{
    policy::{PermissiveAgent, DEFAULT_CONTEXT},
    Context, Runtime,
};
use unitary_storage_sled::SledStorageEngine;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    // if LOG_LEVEL env var is set, use it
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt().with_max_level(Level::from_str(&level).unwrap()).with_test_writer().init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init();
    }
}

#[allow(unused)]
pub fn setup(engine: SledStorageEngine) -> (Arc<SledStorageEngine>, Context) {
    let engine = Arc::new(engine);
    let runtime = Runtime::new(engine.clone(), PermissiveAgent::new());
    (engine, runtime.context(DEFAULT_CONTEXT))
}
