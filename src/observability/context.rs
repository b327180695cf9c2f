//! Run correlation
//!
//! An [`ExecutionContext`] stamps every event it publishes with its run id and
//! optional parent id, and keeps the start instant of each step so `step_end`
//! events carry a duration without the caller tracking time.
//!
//! Per step: `not-started -> started -> ended`, with `started -> errored` leaving the
//! step open so it can still be ended. Starting an open step again resets its clock.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::bus::EventBus;
use super::event::{Describe, Event, short_type_name};
use crate::subscriber::lock;

#[derive(Debug, Clone, Copy)]
struct StepClock {
    started: Instant,
    open: bool,
}

pub struct ExecutionContext {
    run_id: String,
    parent_id: Option<String>,
    created_at: Instant,
    bus: Arc<EventBus>,
    steps: Mutex<HashMap<String, StepClock>>,
}

impl ExecutionContext {
    /// New context; a UUID v4 run id is generated when none is given
    pub fn new(bus: Arc<EventBus>, run_id: Option<&str>, parent_id: Option<&str>) -> Self {
        Self {
            run_id: run_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            parent_id: parent_id.map(|id| id.to_string()),
            created_at: Instant::now(),
            bus,
            steps: Mutex::new(HashMap::new()),
        }
    }

    /// Nested run whose events point back at this one through `parent_id`
    pub fn child(&self, run_id: Option<&str>) -> Self {
        Self::new(Arc::clone(&self.bus), run_id, Some(&self.run_id))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn record_step_start(&self, step: &str) {
        lock(&self.steps).insert(
            step.to_string(),
            StepClock {
                started: Instant::now(),
                open: true,
            },
        );

        self.bus
            .publish(Event::step_start(&self.run_id, self.parent_id(), step));
    }

    /// Close a step; a step that was never started is timed from context creation
    pub fn record_step_end<O: Describe + ?Sized>(&self, step: &str, output: &O) {
        let started = {
            let mut steps = lock(&self.steps);
            match steps.get_mut(step) {
                Some(clock) => {
                    clock.open = false;
                    clock.started
                }
                None => self.created_at,
            }
        };
        let duration = started.elapsed().as_secs_f64();

        self.bus.publish(Event::step_end(
            &self.run_id,
            self.parent_id(),
            step,
            duration,
            output.describe(),
        ));
    }

    /// Document an error; the step stays open
    ///
    /// The classification label is the error's type name without module path.
    pub fn record_error<E: Display + ?Sized>(&self, step: &str, error: &E) {
        self.record_error_kind(step, &error.to_string(), &short_type_name::<E>());
    }

    pub fn record_error_kind(&self, step: &str, message: &str, kind: &str) {
        self.bus
            .publish(Event::error(&self.run_id, self.parent_id(), step, message, kind));
    }

    pub fn record_metric(&self, step: &str, name: &str, value: f64) {
        self.bus
            .publish(Event::metric(&self.run_id, self.parent_id(), step, name, value));
    }

    /// Time since the step started, only while it is open
    pub fn get_step_timing(&self, step: &str) -> Option<Duration> {
        lock(&self.steps)
            .get(step)
            .filter(|clock| clock.open)
            .map(|clock| clock.started.elapsed())
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("parent_id", &self.parent_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{EventType, OutputInfo};
    use crate::subscriber::{MetricsAggregator, Subscriber};
    use eyre::Result;
    use std::thread;

    struct Capture {
        filter: crate::observability::EventFilter,
        events: Mutex<Vec<Event>>,
    }

    impl Subscriber for Capture {
        fn name(&self) -> &str {
            "Capture"
        }
        fn filter(&self) -> &crate::observability::EventFilter {
            &self.filter
        }
        fn handle(&self, event: &Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn setup() -> (Arc<EventBus>, Arc<Capture>) {
        let bus = Arc::new(EventBus::new());
        let capture = Arc::new(Capture {
            filter: Default::default(),
            events: Mutex::new(Vec::new()),
        });
        bus.register(capture.clone());
        (bus, capture)
    }

    #[test]
    fn test_generates_run_id() {
        let (bus, _) = setup();
        let a = ExecutionContext::new(Arc::clone(&bus), None, None);
        let b = ExecutionContext::new(bus, None, None);
        assert_ne!(a.run_id(), b.run_id());
        assert!(uuid::Uuid::parse_str(a.run_id()).is_ok());
    }

    #[test]
    fn test_events_carry_run_and_parent() {
        let (bus, capture) = setup();
        let parent = ExecutionContext::new(bus, Some("outer"), None);
        let child = parent.child(Some("inner"));

        parent.record_step_start("load");
        child.record_metric("embed", "tokens", 12.0);

        let events = capture.events.lock().unwrap();
        assert_eq!(events[0].run_id, "outer");
        assert_eq!(events[0].parent_id, None);
        assert_eq!(events[1].run_id, "inner");
        assert_eq!(events[1].parent_id.as_deref(), Some("outer"));
    }

    #[test]
    fn test_step_end_measures_from_start() {
        let (bus, capture) = setup();
        let ctx = ExecutionContext::new(bus, Some("p1"), None);

        ctx.record_step_start("load");
        thread::sleep(Duration::from_millis(20));
        ctx.record_step_end("load", &vec![1, 2, 3]);

        let events = capture.events.lock().unwrap();
        let end = &events[1];
        assert_eq!(end.event_type, EventType::StepEnd);
        assert!(end.duration.unwrap() >= 0.02);
        assert!(matches!(end.output_info, Some(OutputInfo::Sequence { length: 3, .. })));
    }

    #[test]
    fn test_step_end_without_start_uses_creation_time() {
        let (bus, capture) = setup();
        let ctx = ExecutionContext::new(bus, Some("p1"), None);

        thread::sleep(Duration::from_millis(20));
        ctx.record_step_end("never_started", &());

        let events = capture.events.lock().unwrap();
        assert!(events[0].duration.unwrap() >= 0.02);
        assert!(events[0].output_info.is_none());
    }

    #[test]
    fn test_restart_resets_clock() {
        let (bus, capture) = setup();
        let ctx = ExecutionContext::new(bus, Some("p1"), None);

        ctx.record_step_start("load");
        thread::sleep(Duration::from_millis(50));
        ctx.record_step_start("load");
        ctx.record_step_end("load", &());

        let events = capture.events.lock().unwrap();
        assert!(events[2].duration.unwrap() < 0.05);
    }

    #[test]
    fn test_step_timing_only_while_open() {
        let (bus, _) = setup();
        let ctx = ExecutionContext::new(bus, Some("p1"), None);

        assert!(ctx.get_step_timing("load").is_none());
        ctx.record_step_start("load");
        assert!(ctx.get_step_timing("load").is_some());

        ctx.record_error("load", "transient");
        assert!(ctx.get_step_timing("load").is_some());

        ctx.record_step_end("load", &());
        assert!(ctx.get_step_timing("load").is_none());
    }

    #[test]
    fn test_record_error_labels_kind() {
        let (bus, capture) = setup();
        let ctx = ExecutionContext::new(bus, Some("p1"), None);

        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.pdf");
        ctx.record_error("load", &err);
        ctx.record_error_kind("parse", "bad table", "TableError");

        let events = capture.events.lock().unwrap();
        assert_eq!(events[0].event_type, EventType::Error);
        assert_eq!(events[0].error.as_deref(), Some("missing.pdf"));
        assert_eq!(events[0].error_kind.as_deref(), Some("Error"));
        assert_eq!(events[1].error_kind.as_deref(), Some("TableError"));
    }

    #[test]
    fn test_metric_reaches_aggregator() {
        let bus = Arc::new(EventBus::new());
        let aggregator = Arc::new(MetricsAggregator::new());
        bus.register(aggregator.clone());

        let ctx = ExecutionContext::new(bus, Some("p1"), None);
        ctx.record_metric("embed", "latency_ms", 120.5);

        assert_eq!(aggregator.get_metric_values("p1", "latency_ms"), vec![120.5]);
    }

    #[test]
    fn test_context_shared_across_threads() {
        let bus = Arc::new(EventBus::new());
        let aggregator = Arc::new(MetricsAggregator::new());
        bus.register(aggregator.clone());
        let ctx = Arc::new(ExecutionContext::new(bus, Some("shared"), None));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    let step = format!("chunk-{}", i);
                    ctx.record_step_start(&step);
                    ctx.record_step_end(&step, &());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.get_step_durations("shared").len(), 4);
    }
}
