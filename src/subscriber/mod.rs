//! Event subscribers
//!
//! A subscriber declares which event types it wants through an [`EventFilter`] and
//! consumes matching events in [`Subscriber::handle`]. The bus isolates failures:
//! an `Err` or a panic from one subscriber is logged and never reaches the publisher
//! or the subscribers registered after it.

use eyre::Result;

use crate::observability::{Event, EventFilter, EventType};

pub mod logging;
pub mod metrics;
pub mod persistence;

pub use logging::LoggingSubscriber;
pub use metrics::{MetricSample, MetricsAggregator, RunMetrics, StepSample, StepStats};
pub use persistence::{PersistenceSubscriber, read_events};

/// A registered consumer of events
pub trait Subscriber: Send + Sync {
    /// Identity used when the bus reports a failure
    fn name(&self) -> &str;

    fn filter(&self) -> &EventFilter;

    fn should_handle(&self, event_type: &EventType) -> bool {
        self.filter().accepts(event_type)
    }

    fn handle(&self, event: &Event) -> Result<()>;
}

/// Lock a mutex, recovering the data if a panicking subscriber poisoned it
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
