//! File persistence subscriber
//!
//! Appends every accepted event to `<output_dir>/<run_id>.jsonl`, one JSON object per line.
//! Appends to the same run are serialized by a per-file lock; different runs write in parallel.
//!
//! Run ids are percent-encoded into file names (see [`run_file_name`]), so distinct ids
//! always land in distinct files.

use eyre::{Context, Result};
use lazy_regex::regex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{Subscriber, lock};
use crate::observability::{Event, EventFilter};

pub struct PersistenceSubscriber {
    output_dir: PathBuf,
    filter: EventFilter,
    file_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PersistenceSubscriber {
    /// Create the subscriber, creating `output_dir` if needed
    pub fn new(output_dir: impl Into<PathBuf>, filter: EventFilter) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .context(format!("Failed to create event directory {}", output_dir.display()))?;

        Ok(Self {
            output_dir,
            filter,
            file_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Log file for a run
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        run_log_path(&self.output_dir, run_id)
    }

    /// Drop the write lock kept for a finished run
    ///
    /// Call this only once nothing publishes to the run any more: a writer arriving
    /// after `forget` creates a fresh lock for the same file.
    pub fn forget(&self, run_id: &str) -> bool {
        let path = self.path_for(run_id);
        lock(&self.file_locks).remove(&path).is_some()
    }

    /// Number of per-file locks currently held
    pub fn tracked_files(&self) -> usize {
        lock(&self.file_locks).len()
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.file_locks);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

impl Subscriber for PersistenceSubscriber {
    fn name(&self) -> &str {
        "PersistenceSubscriber"
    }

    fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn handle(&self, event: &Event) -> Result<()> {
        let path = self.path_for(&event.run_id);
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        let file_lock = self.file_lock(&path);
        let _guard = lock(&*file_lock);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open {}", path.display()))?;
        // One write per line, so appends never interleave mid-line
        file.write_all(line.as_bytes())
            .context(format!("Failed to append to {}", path.display()))?;

        Ok(())
    }
}

/// Log file for a run id inside `output_dir`
pub fn run_log_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(format!("{}.jsonl", run_file_name(run_id)))
}

/// Encode a run id as a file stem
///
/// Bytes outside `[A-Za-z0-9._-]`, `%` itself and a leading `.` are written as `%XX`.
/// The empty id becomes `%`, which no other id can produce. The mapping is one-to-one
/// and reversed by [`run_id_from_file_stem`].
pub fn run_file_name(run_id: &str) -> String {
    if run_id.is_empty() {
        return "%".to_string();
    }

    let mut name = regex!(r"[^A-Za-z0-9._-]")
        .replace_all(run_id, |caps: &regex::Captures| {
            caps[0].bytes().map(|b| format!("%{:02X}", b)).collect::<String>()
        })
        .into_owned();
    if name.starts_with('.') {
        name.replace_range(..1, "%2E");
    }
    name
}

/// Recover the run id from a file stem written by [`run_file_name`]
pub fn run_id_from_file_stem(stem: &str) -> Option<String> {
    if stem == "%" {
        return Some(String::new());
    }

    let mut bytes = Vec::with_capacity(stem.len());
    let mut rest = stem.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        if b == b'%' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(b);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

/// Read a persisted run log
///
/// Blank lines are skipped. Lines that do not parse are skipped with a warning;
/// unknown fields and unknown event types load normally.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    let mut events = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => log::warn!("Skipping malformed line {} in {}: {}", index + 1, path.display(), e),
        }
    }

    Ok(events)
}
