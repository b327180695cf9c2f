//! Pipeline observability
//!
//! Producers record lifecycle events through an [`ExecutionContext`]; the [`EventBus`]
//! delivers them synchronously to the registered subscribers:
//! - Log - one human-readable line per event
//! - File (JSONL) - one file per run under the configured output directory
//! - Metrics - in-memory aggregation queried through [`MetricsAggregator`]
//!
//! [`Observability`] is the service that wires these together. Applications usually
//! build one at startup and pass it down; [`Observability::global`] offers a
//! process-wide instance for code that cannot be handed one.

use eyre::{Result, bail};
use once_cell::sync::OnceCell;
use std::fmt::Display;
use std::sync::Arc;

pub mod bus;
pub mod context;
pub mod event;
pub mod scope;

pub use bus::EventBus;
pub use context::ExecutionContext;
pub use event::{Describe, Event, EventFilter, EventType, OutputInfo, now_secs, short_type_name};
pub use scope::StepScope;

use crate::config::{ObservabilityConfig, ObservabilitySink};
use crate::subscriber::{LoggingSubscriber, MetricsAggregator, PersistenceSubscriber, RunMetrics, Subscriber};

static GLOBAL: OnceCell<Observability> = OnceCell::new();

/// Event bus plus the default subscribers built from configuration
pub struct Observability {
    bus: Arc<EventBus>,
    metrics: Arc<MetricsAggregator>,
    persistence: Option<Arc<PersistenceSubscriber>>,
}

impl Observability {
    /// Build the bus and register the configured sinks in order: log, file, metrics
    ///
    /// A sink that cannot be constructed is logged and left out; the rest still work.
    pub fn new(config: &ObservabilityConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let mut persistence = None;

        if config.has_sink(ObservabilitySink::Log) {
            bus.register(Arc::new(LoggingSubscriber::default()));
        }

        if config.has_sink(ObservabilitySink::File) {
            let filter = EventFilter::from_names(&config.persist_event_types);
            match PersistenceSubscriber::new(config.resolved_output_dir(), filter) {
                Ok(sub) => {
                    let sub = Arc::new(sub);
                    bus.register(sub.clone());
                    persistence = Some(sub);
                }
                Err(e) => {
                    log::error!("File sink disabled: {:#}", e);
                }
            }
        }

        if config.has_sink(ObservabilitySink::Metrics) {
            bus.register(metrics.clone());
        }

        log::debug!("Initialized observability with subscribers {:?}", bus.subscriber_names());

        Self {
            bus,
            metrics,
            persistence,
        }
    }

    /// Process-wide instance, built from the default configuration on first use
    /// unless [`Observability::init_global`] ran first
    pub fn global() -> &'static Observability {
        GLOBAL.get_or_init(|| Self::new(&ObservabilityConfig::default()))
    }

    /// Build the process-wide instance from `config`; fails if it already exists
    pub fn init_global(config: &ObservabilityConfig) -> Result<&'static Observability> {
        let mut created = false;
        let instance = GLOBAL.get_or_init(|| {
            created = true;
            Self::new(config)
        });
        if !created {
            bail!("Global observability is already initialized");
        }
        Ok(instance)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn persistence(&self) -> Option<&Arc<PersistenceSubscriber>> {
        self.persistence.as_ref()
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        self.bus.register(subscriber);
    }

    /// Context for a new top-level run
    pub fn context(&self, run_id: Option<&str>) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.bus), run_id, None)
    }

    /// Run `f` as a timed step of `ctx`, or of a fresh run when no context is given
    pub fn run_step<T, E, F>(&self, ctx: Option<&ExecutionContext>, step: &str, f: F) -> Result<T, E>
    where
        T: Describe,
        E: Display,
        F: FnOnce(&ExecutionContext) -> Result<T, E>,
    {
        match ctx {
            Some(ctx) => ctx.run_step(step, f),
            None => self.context(None).run_step(step, f),
        }
    }

    /// Release what is held for a finished run and return its aggregate
    pub fn finish_run(&self, run_id: &str) -> Option<RunMetrics> {
        if let Some(persistence) = &self.persistence {
            persistence.forget(run_id);
        }
        self.metrics.clear_run(run_id)
    }
}
