//! pipetrace - observability for document-processing pipelines
//!
//! Pipeline stages report what they do through an [`ExecutionContext`]:
//!
//! ```no_run
//! use pipetrace::{Observability, ObservabilityConfig};
//!
//! let obs = Observability::new(&ObservabilityConfig::default());
//! let ctx = obs.context(Some("p1"));
//!
//! ctx.record_step_start("load");
//! let docs = vec!["a.pdf", "b.pdf"];
//! ctx.record_step_end("load", &docs);
//! ctx.record_metric("embed", "latency_ms", 120.5);
//!
//! let parsed: eyre::Result<usize> = ctx.run_step("parse", |_| Ok(docs.len()));
//! assert_eq!(parsed.unwrap(), 2);
//! assert_eq!(obs.metrics().get_metric_values("p1", "latency_ms"), vec![120.5]);
//! ```
//!
//! Every event goes through the [`EventBus`] to the configured subscribers: a log line,
//! an append to `<output_dir>/<run_id>.jsonl`, and the in-memory [`MetricsAggregator`].

pub mod config;
pub mod observability;
pub mod subscriber;

pub use config::{Config, LogLevel, ObservabilityConfig, ObservabilitySink};
pub use observability::{
    Describe, Event, EventBus, EventFilter, EventType, ExecutionContext, Observability, OutputInfo, StepScope,
};
pub use subscriber::{LoggingSubscriber, MetricsAggregator, PersistenceSubscriber, RunMetrics, StepStats, Subscriber};
