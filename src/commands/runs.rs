//! List persisted runs

use chrono::{DateTime, Local};
use colored::*;
use eyre::Result;
use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

use pipetrace::Config;
use pipetrace::subscriber::persistence::run_id_from_file_stem;
use pipetrace::subscriber::read_events;

use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub events: usize,
    pub modified: Option<String>,
}

pub fn run(format: OutputFormat, config: &Config) -> Result<()> {
    let output_dir = config.observability.resolved_output_dir();
    let runs = discover_runs(&output_dir);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&runs)?),
        OutputFormat::Text => {
            println!("{} {}", "Runs in".bold(), output_dir.display());
            println!();
            if runs.is_empty() {
                println!("  {}", "No runs recorded".dimmed());
            }
            for run in &runs {
                println!(
                    "  {} {} events {}",
                    run.run_id.cyan(),
                    run.events,
                    run.modified.as_deref().unwrap_or("-").dimmed()
                );
            }
        }
    }

    Ok(())
}

/// Runs found in `output_dir`, most recently modified first
pub fn discover_runs(output_dir: &Path) -> Vec<RunSummary> {
    let mut runs: Vec<(Option<DateTime<Local>>, RunSummary)> = WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .filter_map(|entry| {
            let stem = entry.path().file_stem()?.to_str()?.to_string();
            let events = read_events(entry.path()).unwrap_or_default();
            // The file name is an encoding of the id; the events carry the id itself
            let run_id = events
                .first()
                .map(|e| e.run_id.clone())
                .or_else(|| run_id_from_file_stem(&stem))
                .unwrap_or(stem);
            let modified: Option<DateTime<Local>> = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::from);

            Some((
                modified,
                RunSummary {
                    run_id,
                    events: events.len(),
                    modified: modified.map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string()),
                },
            ))
        })
        .collect();

    runs.sort_by(|a, b| b.0.cmp(&a.0));
    runs.into_iter().map(|(_, summary)| summary).collect()
}
