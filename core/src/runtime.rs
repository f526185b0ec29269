use std::sync::Arc;

use tracing::info;

use crate::{
    config::Config,
    context::Context,
    dispatch::HandlerRegistry,
    error_log::{ChannelReporter, ErrorLogSink, ErrorLogSubscriber, ErrorReporter, StorageErrorLog, TracingReporter},
    policy::PolicyAgent,
    storage::StorageEngine,
};

/// Everything a transaction needs that outlives it: storage, policy, handlers, config and
/// the error reporter. Cheap to clone.
pub struct Runtime<SE: StorageEngine, PA: PolicyAgent>(pub(crate) Arc<RuntimeInner<SE, PA>>);

impl<SE: StorageEngine, PA: PolicyAgent> Clone for Runtime<SE, PA> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

pub struct RuntimeInner<SE: StorageEngine, PA: PolicyAgent> {
    pub storage: Arc<SE>,
    pub policy_agent: PA,
    pub registry: HandlerRegistry,
    pub config: Config,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    error_log: Option<ErrorLogSubscriber>,
}

impl<SE: StorageEngine, PA: PolicyAgent> std::ops::Deref for Runtime<SE, PA> {
    type Target = RuntimeInner<SE, PA>;
    fn deref(&self) -> &Self::Target { &self.0 }
}

impl<SE: StorageEngine, PA: PolicyAgent> Runtime<SE, PA> {
    /// A runtime with default configuration, no handlers, and failures reported to the tracing log only.
    pub fn new(storage: Arc<SE>, policy_agent: PA) -> Self { Self::builder(storage, policy_agent).build() }

    pub fn builder(storage: Arc<SE>, policy_agent: PA) -> RuntimeBuilder<SE, PA> { RuntimeBuilder::new(storage, policy_agent) }

    /// A context acting as `cdata`. Transactions begin from here.
    pub fn context(&self, cdata: PA::ContextData) -> Context { Context::new(self.clone(), cdata) }

    /// The background error log task, if one was configured.
    pub fn error_log(&self) -> Option<&ErrorLogSubscriber> { self.0.error_log.as_ref() }
}

pub struct RuntimeBuilder<SE: StorageEngine, PA: PolicyAgent> {
    storage: Arc<SE>,
    policy_agent: PA,
    registry: HandlerRegistry,
    config: Config,
    reporter: Option<Arc<dyn ErrorReporter>>,
    error_log: Option<ErrorLogSubscriber>,
    durable_error_log: bool,
}

impl<SE: StorageEngine, PA: PolicyAgent> RuntimeBuilder<SE, PA> {
    pub fn new(storage: Arc<SE>, policy_agent: PA) -> Self {
        Self {
            storage,
            policy_agent,
            registry: HandlerRegistry::new(),
            config: Config::default(),
            reporter: None,
            error_log: None,
            durable_error_log: false,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use a custom reporter. Replaces any error log set earlier.
    pub fn reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self.error_log = None;
        self.durable_error_log = false;
        self
    }

    /// Report failures through a channel drained into `sink` by a background task.
    /// Must be called from within a tokio runtime.
    pub fn error_log<S: ErrorLogSink>(mut self, sink: S) -> Self {
        let (reporter, receiver) = ChannelReporter::channel();
        self.error_log = Some(ErrorLogSubscriber::spawn(receiver, sink));
        self.reporter = Some(Arc::new(reporter));
        self.durable_error_log = false;
        self
    }

    /// Persist failures into the configured error log collection of this runtime's own storage.
    /// The subscriber is spawned by `build`, which must then run within a tokio runtime.
    pub fn durable_error_log(mut self) -> Self {
        self.durable_error_log = true;
        self
    }

    pub fn build(self) -> Runtime<SE, PA> {
        let Self { storage, policy_agent, registry, config, mut reporter, mut error_log, durable_error_log } = self;

        if durable_error_log {
            let sink = StorageErrorLog::new(storage.clone(), config.error_log.collection.clone());
            let (channel, receiver) = ChannelReporter::channel();
            error_log = Some(ErrorLogSubscriber::spawn(receiver, sink));
            reporter = Some(Arc::new(channel));
            info!("error log persisted to {}", config.error_log.collection);
        }
        let reporter = reporter.unwrap_or_else(|| Arc::new(TracingReporter));

        Runtime(Arc::new(RuntimeInner { storage, policy_agent, registry, config, reporter, error_log }))
    }
}
