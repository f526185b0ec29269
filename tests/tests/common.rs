use std::sync::{Arc, Mutex};

use tracing::Level;
use unitary::{
    error::ReportError,
    error_log::{ErrorLogEntry, ErrorReporter},
    policy::{PermissiveAgent, PolicyAgent, DEFAULT_CONTEXT},
    Config, Context, HandlerRegistry, Record, Runtime,
};
use unitary_storage_memory::MemoryStorageEngine;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init(); }

#[allow(unused)]
pub fn account(name: &str) -> Record { Record::new("account").with("name", name) }

#[allow(unused)]
pub fn contact(n: usize) -> Record { Record::new("contact").with("name", format!("contact {n}")) }

#[allow(unused)]
pub fn opportunity(n: usize) -> Record { Record::new("opportunity").with("name", format!("opportunity {n}")) }

/// Collects reported entries synchronously, so tests need not wait on a background task.
#[derive(Clone, Default)]
pub struct CollectingReporter(Arc<Mutex<Vec<ErrorLogEntry>>>);

#[allow(unused)]
impl CollectingReporter {
    pub fn entries(&self) -> Vec<ErrorLogEntry> { self.0.lock().unwrap().clone() }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, entry: ErrorLogEntry) -> Result<(), ReportError> {
        self.0.lock().unwrap().push(entry);
        Ok(())
    }
}

#[allow(unused)]
pub struct Harness<PA: PolicyAgent> {
    pub engine: Arc<MemoryStorageEngine>,
    pub runtime: Runtime<MemoryStorageEngine, PA>,
    pub reporter: CollectingReporter,
}

#[allow(unused)]
pub fn harness_with<PA: PolicyAgent>(engine: MemoryStorageEngine, agent: PA, config: Config, registry: HandlerRegistry) -> Harness<PA> {
    let engine = Arc::new(engine);
    let reporter = CollectingReporter::default();
    let runtime = Runtime::builder(engine.clone(), agent).config(config).registry(registry).reporter(reporter.clone()).build();
    Harness { engine, runtime, reporter }
}

#[allow(unused)]
pub fn permissive(config: Config, registry: HandlerRegistry) -> (Harness<PermissiveAgent>, Context) {
    let harness = harness_with(MemoryStorageEngine::new(), PermissiveAgent::new(), config, registry);
    let ctx = harness.runtime.context(DEFAULT_CONTEXT);
    (harness, ctx)
}
