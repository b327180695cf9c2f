//! Run report command
//!
//! Replays a persisted run into a fresh aggregator and prints per-step statistics,
//! metric values and errors.

use colored::*;
use eyre::{Context, Result, bail};
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

use pipetrace::subscriber::persistence::run_log_path;
use pipetrace::subscriber::read_events;
use pipetrace::{Config, Event, EventType, MetricsAggregator, StepStats};

use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub parent_id: Option<String>,
    pub events: usize,
    pub steps: IndexMap<String, StepStats>,
    pub metrics: IndexMap<String, Vec<f64>>,
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub step: String,
    pub kind: String,
    pub message: String,
}

pub fn run(run_id: &str, step_pattern: Option<&str>, format: OutputFormat, config: &Config) -> Result<()> {
    let output_dir = config.observability.resolved_output_dir();
    let Some(log_file) = locate_run_log(&output_dir, run_id) else {
        bail!(
            "No events recorded for run {} (looked in {})",
            run_id,
            run_log_path(&output_dir, run_id).display()
        );
    };

    let step_filter = step_pattern
        .map(Regex::new)
        .transpose()
        .context("Invalid step pattern")?;

    let events = read_events(&log_file)?;
    let report = build_report(run_id, &events, step_filter.as_ref());

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Text => print_text(&report),
    }

    Ok(())
}

/// Log file for `run_id`, also accepting the file's stem as shown on disk
fn locate_run_log(output_dir: &Path, run_id: &str) -> Option<PathBuf> {
    [run_log_path(output_dir, run_id), output_dir.join(format!("{}.jsonl", run_id))]
        .into_iter()
        .find(|path| path.is_file())
}

/// Summarize `events`, keyed by the run id they carry; `requested` is used only
/// when there are no events to take it from
pub fn build_report(requested: &str, events: &[Event], step_filter: Option<&Regex>) -> RunReport {
    let run_id = events.first().map(|e| e.run_id.as_str()).unwrap_or(requested);

    let selected: Vec<&Event> = events
        .iter()
        .filter(|e| step_filter.is_none_or(|re| re.is_match(&e.step)))
        .collect();

    let aggregator = MetricsAggregator::replay(selected.iter().copied());
    let exported = aggregator.export_metrics();

    let metrics = exported
        .get(run_id)
        .map(|run| {
            run.metrics
                .iter()
                .map(|(name, samples)| (name.clone(), samples.iter().map(|s| s.value).collect()))
                .collect()
        })
        .unwrap_or_default();

    let errors = selected
        .iter()
        .filter(|e| e.event_type == EventType::Error)
        .map(|e| ErrorEntry {
            step: e.step.clone(),
            kind: e.error_kind.clone().unwrap_or_else(|| "error".to_string()),
            message: e.error.clone().unwrap_or_default(),
        })
        .collect();

    RunReport {
        run_id: run_id.to_string(),
        parent_id: events.iter().find_map(|e| e.parent_id.clone()),
        events: selected.len(),
        steps: aggregator.step_stats(run_id),
        metrics,
        errors,
    }
}

fn print_text(report: &RunReport) {
    println!("{} {}", "Run".bold(), report.run_id.cyan());
    if let Some(parent) = &report.parent_id {
        println!("  parent: {}", parent.dimmed());
    }
    println!("  events: {}", report.events);
    println!();

    println!("{}", "Steps".bold());
    if report.steps.is_empty() {
        println!("  {}", "no completed steps".dimmed());
    } else {
        let width = report.steps.keys().map(|s| s.chars().count()).max().unwrap_or(4).max(4);
        println!(
            "  {:<width$}  {:>5}  {:>9}  {:>9}  {:>9}  {:>9}",
            "step",
            "count",
            "total",
            "mean",
            "min",
            "max",
            width = width
        );
        for (step, stats) in &report.steps {
            println!(
                "  {:<width$}  {:>5}  {:>8.3}s  {:>8.3}s  {:>8.3}s  {:>8.3}s",
                step,
                stats.count,
                stats.total,
                stats.mean,
                stats.min,
                stats.max,
                width = width
            );
        }
    }
    println!();

    if !report.metrics.is_empty() {
        println!("{}", "Metrics".bold());
        for (name, values) in &report.metrics {
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            println!("  {} = [{}]", name.blue(), rendered.join(", "));
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("{}", "Errors".bold().red());
        let max = super::get_terminal_width().saturating_sub(8);
        for error in &report.errors {
            let line = format!("{} {}: {}", error.step, error.kind, error.message);
            println!("  {} {}", "✗".red(), super::truncate(&line, max));
        }
    }
}
