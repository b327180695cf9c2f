//! In-memory metrics aggregation
//!
//! Accumulates step durations and named metric values per run. All mutation and all
//! reads go through one lock; readers always get an owned copy.
//!
//! Entries live until [`MetricsAggregator::clear_run`] or [`MetricsAggregator::clear`]
//! is called; nothing is evicted automatically.

use eyre::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::{Subscriber, lock};
use crate::observability::{Event, EventFilter, EventType, now_secs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSample {
    pub duration: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub step: String,
    pub timestamp: f64,
}

/// Everything recorded for one run, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub steps: IndexMap<String, Vec<StepSample>>,
    pub metrics: IndexMap<String, Vec<MetricSample>>,
}

/// Summary of one step's recorded durations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStats {
    pub count: usize,
    pub total: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl StepStats {
    fn from_durations(durations: &[f64]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        let total: f64 = durations.iter().sum();
        Some(Self {
            count: durations.len(),
            total,
            mean: total / durations.len() as f64,
            min: durations.iter().copied().fold(f64::INFINITY, f64::min),
            max: durations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

pub struct MetricsAggregator {
    filter: EventFilter,
    runs: Mutex<IndexMap<String, RunMetrics>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            filter: EventFilter::only([EventType::Metric, EventType::StepEnd]),
            runs: Mutex::new(IndexMap::new()),
        }
    }

    /// Build an aggregate from already-published events, e.g. a persisted run log
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let aggregator = Self::new();
        for event in events {
            if aggregator.should_handle(&event.event_type) {
                aggregator.record(event);
            }
        }
        aggregator
    }

    fn record(&self, event: &Event) {
        let timestamp = event.timestamp.unwrap_or_else(now_secs);
        let mut runs = lock(&self.runs);
        let run = runs.entry(event.run_id.clone()).or_default();

        match event.event_type {
            EventType::Metric => {
                let name = event.metric_name.clone().unwrap_or_else(|| "unknown".to_string());
                run.metrics.entry(name).or_default().push(MetricSample {
                    value: event.metric_value.unwrap_or(0.0),
                    step: event.step.clone(),
                    timestamp,
                });
            }
            EventType::StepEnd => {
                run.steps.entry(event.step.clone()).or_default().push(StepSample {
                    duration: event.duration.unwrap_or(0.0),
                    timestamp,
                });
            }
            _ => {}
        }
    }

    /// Step name -> durations in recording order; empty for an unknown run
    pub fn get_step_durations(&self, run_id: &str) -> IndexMap<String, Vec<f64>> {
        let runs = lock(&self.runs);
        runs.get(run_id)
            .map(|run| {
                run.steps
                    .iter()
                    .map(|(step, samples)| (step.clone(), samples.iter().map(|s| s.duration).collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Values of one metric in recording order; empty if nothing was recorded
    pub fn get_metric_values(&self, run_id: &str, metric_name: &str) -> Vec<f64> {
        let runs = lock(&self.runs);
        runs.get(run_id)
            .and_then(|run| run.metrics.get(metric_name))
            .map(|samples| samples.iter().map(|s| s.value).collect())
            .unwrap_or_default()
    }

    /// Mean duration of a step, `None` when there is no data
    pub fn get_average_duration(&self, run_id: &str, step: &str) -> Option<f64> {
        let durations = self.get_step_durations(run_id).swap_remove(step)?;
        StepStats::from_durations(&durations).map(|stats| stats.mean)
    }

    /// Per-step summary for a run, in first-seen step order
    pub fn step_stats(&self, run_id: &str) -> IndexMap<String, StepStats> {
        self.get_step_durations(run_id)
            .into_iter()
            .filter_map(|(step, durations)| StepStats::from_durations(&durations).map(|stats| (step, stats)))
            .collect()
    }

    /// Independent copy of the whole aggregate
    pub fn export_metrics(&self) -> IndexMap<String, RunMetrics> {
        lock(&self.runs).clone()
    }

    pub fn run_ids(&self) -> Vec<String> {
        lock(&self.runs).keys().cloned().collect()
    }

    /// Remove and return a run's data
    pub fn clear_run(&self, run_id: &str) -> Option<RunMetrics> {
        lock(&self.runs).shift_remove(run_id)
    }

    pub fn clear(&self) {
        lock(&self.runs).clear();
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscriber for MetricsAggregator {
    fn name(&self) -> &str {
        "MetricsAggregator"
    }

    fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn handle(&self, event: &Event) -> Result<()> {
        self.record(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn step_end(run: &str, step: &str, duration: f64) -> Event {
        Event::step_end(run, None, step, duration, None).at(100.0)
    }

    #[test]
    fn test_filter_accepts_metric_and_step_end_only() {
        let agg = MetricsAggregator::new();
        assert!(agg.should_handle(&EventType::Metric));
        assert!(agg.should_handle(&EventType::StepEnd));
        assert!(!agg.should_handle(&EventType::StepStart));
        assert!(!agg.should_handle(&EventType::Error));
    }

    #[test]
    fn test_step_durations_in_order() {
        let agg = MetricsAggregator::new();
        agg.handle(&step_end("p1", "load", 0.3)).unwrap();
        agg.handle(&step_end("p1", "parse", 0.1)).unwrap();
        agg.handle(&step_end("p1", "load", 0.5)).unwrap();

        let durations = agg.get_step_durations("p1");
        assert_eq!(durations.keys().map(String::as_str).collect::<Vec<_>>(), vec!["load", "parse"]);
        assert_eq!(durations["load"], vec![0.3, 0.5]);
        assert!(agg.get_step_durations("unknown").is_empty());
    }

    #[test]
    fn test_metric_values() {
        let agg = MetricsAggregator::new();
        agg.handle(&Event::metric("p1", None, "embed", "latency_ms", 120.5)).unwrap();
        agg.handle(&Event::metric("p1", None, "embed", "latency_ms", 80.0)).unwrap();

        assert_eq!(agg.get_metric_values("p1", "latency_ms"), vec![120.5, 80.0]);
        assert!(agg.get_metric_values("p1", "tokens").is_empty());
        assert!(agg.get_metric_values("p2", "latency_ms").is_empty());
    }

    #[test]
    fn test_average_duration() {
        let agg = MetricsAggregator::new();
        assert_eq!(agg.get_average_duration("p1", "load"), None);

        agg.handle(&step_end("p1", "load", 1.0)).unwrap();
        agg.handle(&step_end("p1", "load", 2.0)).unwrap();
        assert_eq!(agg.get_average_duration("p1", "load"), Some(1.5));
        assert_eq!(agg.get_average_duration("p1", "parse"), None);
    }

    #[test]
    fn test_zero_duration_is_data_not_missing() {
        let agg = MetricsAggregator::new();
        agg.handle(&step_end("p1", "noop", 0.0)).unwrap();
        assert_eq!(agg.get_average_duration("p1", "noop"), Some(0.0));
    }

    #[test]
    fn test_export_is_independent_copy() {
        let agg = MetricsAggregator::new();
        agg.handle(&step_end("p1", "load", 1.0)).unwrap();

        let mut exported = agg.export_metrics();
        exported["p1"].steps["load"].push(StepSample {
            duration: 99.0,
            timestamp: 0.0,
        });
        exported.insert("ghost".to_string(), RunMetrics::default());

        assert_eq!(agg.get_step_durations("p1")["load"], vec![1.0]);
        assert_eq!(agg.run_ids(), vec!["p1"]);
    }

    #[test]
    fn test_step_stats() {
        let agg = MetricsAggregator::new();
        for d in [0.2, 0.4, 0.6] {
            agg.handle(&step_end("p1", "load", d)).unwrap();
        }
        let all = agg.step_stats("p1");
        let stats = &all["load"];
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 0.4).abs() < 1e-9);
        assert_eq!(stats.min, 0.2);
        assert_eq!(stats.max, 0.6);
    }

    #[test]
    fn test_clear_run() {
        let agg = MetricsAggregator::new();
        agg.handle(&step_end("p1", "load", 1.0)).unwrap();
        agg.handle(&step_end("p2", "load", 2.0)).unwrap();

        assert!(agg.clear_run("p1").is_some());
        assert!(agg.get_step_durations("p1").is_empty());
        assert_eq!(agg.run_ids(), vec!["p2"]);

        agg.clear();
        assert!(agg.export_metrics().is_empty());
    }

    #[test]
    fn test_replay_ignores_unrelated_events() {
        let events = vec![
            Event::step_start("p1", None, "load").at(1.0),
            step_end("p1", "load", 0.25),
            Event::error("p1", None, "load", "boom", "Error").at(2.0),
            Event::metric("p1", None, "load", "docs", 3.0).at(3.0),
        ];
        let agg = MetricsAggregator::replay(&events);

        assert_eq!(agg.get_step_durations("p1")["load"], vec![0.25]);
        assert_eq!(agg.get_metric_values("p1", "docs"), vec![3.0]);
    }

    #[test]
    fn test_concurrent_runs_are_independent() {
        let agg = Arc::new(MetricsAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    let run = format!("run-{}", i);
                    for _ in 0..50 {
                        agg.handle(&step_end(&run, "work", i as f64)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..4 {
            let durations = agg.get_step_durations(&format!("run-{}", i));
            assert_eq!(durations["work"].len(), 50);
            assert!(durations["work"].iter().all(|d| *d == i as f64));
        }
    }
}
