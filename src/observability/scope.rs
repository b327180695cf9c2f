//! Scoped step timing
//!
//! [`StepScope`] emits `step_start` when created and guarantees a closing event on
//! every exit path: `finish` emits `step_end` and `fail` emits `error`. Dropping the
//! guard without either emits an `error` of kind `panic` while unwinding, or of kind
//! `abandoned` otherwise (typically an early `?` return). Only `finish` counts as a
//! completed step.
//!
//! Failures are only documented here; they are always handed back to the caller.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use super::context::ExecutionContext;
use super::event::Describe;

#[must_use = "dropping the scope immediately records the step as abandoned"]
pub struct StepScope<'a> {
    ctx: &'a ExecutionContext,
    step: String,
    closed: bool,
}

impl<'a> StepScope<'a> {
    pub fn new(ctx: &'a ExecutionContext, step: &str) -> Self {
        ctx.record_step_start(step);
        Self {
            ctx,
            step: step.to_string(),
            closed: false,
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn context(&self) -> &'a ExecutionContext {
        self.ctx
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.ctx.get_step_timing(&self.step)
    }

    pub fn metric(&self, name: &str, value: f64) {
        self.ctx.record_metric(&self.step, name, value);
    }

    /// End the step, describing its output
    pub fn finish<O: Describe + ?Sized>(mut self, output: &O) {
        self.closed = true;
        self.ctx.record_step_end(&self.step, output);
    }

    /// Record the step's failure; the caller keeps ownership of the error
    pub fn fail<E: Display + ?Sized>(mut self, error: &E) {
        self.closed = true;
        self.ctx.record_error(&self.step, error);
    }
}

impl Drop for StepScope<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if thread::panicking() {
            self.ctx
                .record_error_kind(&self.step, "step panicked before completing", "panic");
        } else {
            self.ctx
                .record_error_kind(&self.step, "step exited without finishing", "abandoned");
        }
    }
}

impl ExecutionContext {
    /// Open a timed scope for `step`
    pub fn step(&self, step: &str) -> StepScope<'_> {
        StepScope::new(self, step)
    }

    /// Run `f` as `step`: `Ok` ends the step with the result described, `Err` is
    /// recorded as an error and returned unchanged
    pub fn run_step<T, E, F>(&self, step: &str, f: F) -> Result<T, E>
    where
        T: Describe,
        E: Display,
        F: FnOnce(&ExecutionContext) -> Result<T, E>,
    {
        let scope = self.step(step);
        match f(self) {
            Ok(value) => {
                scope.finish(&value);
                Ok(value)
            }
            Err(e) => {
                scope.fail(&e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{Event, EventBus, EventFilter, EventType};
    use crate::subscriber::Subscriber;
    use eyre::{Result, eyre};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{Arc, Mutex};

    struct Capture {
        filter: EventFilter,
        events: Mutex<Vec<Event>>,
    }

    impl Subscriber for Capture {
        fn name(&self) -> &str {
            "Capture"
        }
        fn filter(&self) -> &EventFilter {
            &self.filter
        }
        fn handle(&self, event: &Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn context() -> (ExecutionContext, Arc<Capture>) {
        let bus = Arc::new(EventBus::new());
        let capture = Arc::new(Capture {
            filter: EventFilter::All,
            events: Mutex::new(Vec::new()),
        });
        bus.register(capture.clone());
        (ExecutionContext::new(bus, Some("p1"), None), capture)
    }

    fn types(capture: &Capture) -> Vec<EventType> {
        capture.events.lock().unwrap().iter().map(|e| e.event_type.clone()).collect()
    }

    #[test]
    fn test_run_step_ok() {
        let (ctx, capture) = context();
        let result: Result<Vec<u8>> = ctx.run_step("load", |_| Ok(vec![1, 2, 3]));

        assert_eq!(result.unwrap(), vec![1, 2, 3]);
        assert_eq!(types(&capture), vec![EventType::StepStart, EventType::StepEnd]);
    }

    #[test]
    fn test_run_step_err_is_returned_unchanged() {
        let (ctx, capture) = context();
        let result: Result<(), String> = ctx.run_step("parse", |_| Err("bad header".to_string()));

        assert_eq!(result.unwrap_err(), "bad header");
        assert_eq!(types(&capture), vec![EventType::StepStart, EventType::Error]);

        let events = capture.events.lock().unwrap();
        assert_eq!(events[1].error.as_deref(), Some("bad header"));
        assert_eq!(events[1].error_kind.as_deref(), Some("String"));
    }

    #[test]
    fn test_run_step_with_eyre_report() {
        let (ctx, capture) = context();
        let result: Result<u32> = ctx.run_step("embed", |_| Err(eyre!("rate limited")));

        assert_eq!(result.unwrap_err().to_string(), "rate limited");
        let events = capture.events.lock().unwrap();
        assert_eq!(events[1].error_kind.as_deref(), Some("Report"));
    }

    #[test]
    fn test_nested_steps_share_context() {
        let (ctx, capture) = context();
        let result: Result<usize> = ctx.run_step("outer", |ctx| {
            let inner: Result<usize> = ctx.run_step("inner", |_| Ok(2));
            inner.map(|n| n + 1)
        });

        assert_eq!(result.unwrap(), 3);
        let steps: Vec<String> = capture.events.lock().unwrap().iter().map(|e| e.step.clone()).collect();
        assert_eq!(steps, vec!["outer", "inner", "inner", "outer"]);
    }

    #[test]
    fn test_scope_finish_ends_step() {
        let (ctx, capture) = context();
        let scope = ctx.step("load");
        scope.metric("docs", 4.0);
        scope.finish(&vec!["a", "b"]);
        assert_eq!(
            types(&capture),
            vec![EventType::StepStart, EventType::Metric, EventType::StepEnd]
        );
    }

    #[test]
    fn test_scope_dropped_without_finish_is_abandoned() {
        let (ctx, capture) = context();
        {
            let _scope = ctx.step("load");
        }
        assert_eq!(types(&capture), vec![EventType::StepStart, EventType::Error]);
        let events = capture.events.lock().unwrap();
        assert_eq!(events[1].error_kind.as_deref(), Some("abandoned"));
    }

    fn parse_header(ctx: &ExecutionContext, header: &str) -> Result<u32> {
        let scope = ctx.step("parse");
        let version: u32 = header.trim_start_matches('v').parse()?;
        scope.finish(&version);
        Ok(version)
    }

    #[test]
    fn test_early_return_is_not_a_completion() {
        let (ctx, capture) = context();
        let agg = Arc::new(crate::subscriber::MetricsAggregator::new());
        ctx.bus().register(agg.clone());

        assert!(parse_header(&ctx, "bad header").is_err());
        assert_eq!(types(&capture), vec![EventType::StepStart, EventType::Error]);
        assert_eq!(
            capture.events.lock().unwrap()[1].error_kind.as_deref(),
            Some("abandoned")
        );
        assert!(agg.get_step_durations("p1").is_empty());

        assert_eq!(parse_header(&ctx, "v1").unwrap(), 1);
        assert_eq!(agg.get_step_durations("p1")["parse"].len(), 1);
    }

    #[test]
    fn test_scope_records_panic() {
        let (ctx, capture) = context();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = ctx.step("explode");
            panic!("boom");
        }));

        assert!(outcome.is_err());
        let events = capture.events.lock().unwrap();
        assert_eq!(events.last().unwrap().event_type, EventType::Error);
        assert_eq!(events.last().unwrap().error_kind.as_deref(), Some("panic"));
    }

    #[test]
    fn test_fail_then_step_still_open() {
        let (ctx, _) = context();
        let scope = ctx.step("retry");
        scope.fail("first attempt failed");
        assert!(ctx.get_step_timing("retry").is_some());
        ctx.record_step_end("retry", &());
        assert!(ctx.get_step_timing("retry").is_none());
    }
}
