//! Live event observation command
//!
//! Tails a run's event log, similar to `tail -f`.

use colored::*;
use eyre::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::Duration;

use pipetrace::subscriber::persistence::run_log_path;
use pipetrace::subscriber::read_events;
use pipetrace::{Config, Event};

use super::format_event;

pub fn run(run_id: &str, filter: Option<&str>, last: usize, config: &Config) -> Result<()> {
    let log_file = run_log_path(&config.observability.resolved_output_dir(), run_id);

    println!("{} Observing run {} (Ctrl+C to stop)...", "👁".blue(), run_id.cyan());
    if let Some(f) = filter {
        println!("  Filter: {}", f.cyan());
    }
    println!();

    if last > 0 && log_file.exists() {
        show_recent_events(&log_file, last, filter)?;
        println!("{}", "--- Live tail ---".dimmed());
        println!();
    }

    tail_events(&log_file, filter)
}

fn matches_filter(event: &Event, filter: Option<&str>) -> bool {
    match filter {
        Some(f) => event.event_type.as_str().to_lowercase().contains(&f.to_lowercase()),
        None => true,
    }
}

fn show_recent_events(log_file: &Path, count: usize, filter: Option<&str>) -> Result<()> {
    let events: Vec<Event> = read_events(log_file)?
        .into_iter()
        .filter(|e| matches_filter(e, filter))
        .collect();

    let start = events.len().saturating_sub(count);
    for event in &events[start..] {
        println!("{}", format_event(event));
    }

    Ok(())
}

fn tail_events(log_file: &Path, filter: Option<&str>) -> Result<()> {
    while !log_file.exists() {
        // Wait for the run's first event
        thread::sleep(Duration::from_secs(1));
    }

    let file = File::open(log_file).context("Failed to open event log")?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::End(0))?;

    let mut line = String::new();
    loop {
        match reader.read_line(&mut line) {
            Ok(0) => {
                thread::sleep(Duration::from_millis(100));
            }
            Ok(_) => {
                // A partially written line has no newline yet; keep it and read on
                if !line.ends_with('\n') {
                    continue;
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    match serde_json::from_str::<Event>(trimmed) {
                        Ok(event) if matches_filter(&event, filter) => println!("{}", format_event(&event)),
                        Ok(_) => {}
                        Err(e) => log::warn!("Skipping malformed event line: {}", e),
                    }
                }
                line.clear();
            }
            Err(e) => {
                log::warn!("Error reading event log: {}", e);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}
