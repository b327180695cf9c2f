//! Logging subscriber
//!
//! Renders one human-readable line per event through the `log` facade.

use eyre::Result;

use super::Subscriber;
use crate::observability::{Event, EventFilter, EventType};

pub struct LoggingSubscriber {
    filter: EventFilter,
}

impl LoggingSubscriber {
    pub fn new(filter: EventFilter) -> Self {
        Self { filter }
    }

    /// The line logged for an event, and the level it is logged at
    pub fn render(event: &Event) -> (log::Level, String) {
        let run_id = &event.run_id;
        let step = &event.step;

        match &event.event_type {
            EventType::StepStart => (log::Level::Info, format!("Run {}: Step '{}' started", run_id, step)),
            EventType::StepEnd => (
                log::Level::Info,
                format!(
                    "Run {}: Step '{}' completed in {:.2}s",
                    run_id,
                    step,
                    event.duration.unwrap_or(0.0)
                ),
            ),
            EventType::Error => (
                log::Level::Error,
                format!(
                    "Run {}: Error in step '{}': {}",
                    run_id,
                    step,
                    event.error.as_deref().unwrap_or("Unknown error")
                ),
            ),
            EventType::Metric => (
                log::Level::Info,
                format!(
                    "Run {}: Metric '{}' = {} in step '{}'",
                    run_id,
                    event.metric_name.as_deref().unwrap_or("unknown"),
                    event.metric_value.unwrap_or(0.0),
                    step
                ),
            ),
            EventType::Other(kind) => (
                log::Level::Debug,
                format!("Run {}: Event '{}' in step '{}'", run_id, kind, step),
            ),
        }
    }
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self::new(EventFilter::All)
    }
}

impl Subscriber for LoggingSubscriber {
    fn name(&self) -> &str {
        "LoggingSubscriber"
    }

    fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn handle(&self, event: &Event) -> Result<()> {
        let (level, line) = Self::render(event);
        log::log!(target: "pipetrace::events", level, "{}", line);
        Ok(())
    }
}
