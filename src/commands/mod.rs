pub mod completions;
pub mod config;
pub mod demo;
pub mod observe;
pub mod report;
pub mod runs;

use chrono::{DateTime, Local};
use colored::*;
use terminal_size::{Width, terminal_size};

use pipetrace::{Event, EventType, OutputInfo};

/// Get terminal width, defaulting to 100 if not available
pub fn get_terminal_width() -> usize {
    terminal_size().map(|(Width(w), _)| w as usize).unwrap_or(100)
}

/// Truncate to `max` characters, marking the cut with an ellipsis
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

/// Local wall-clock rendering of an event timestamp
pub fn format_timestamp(timestamp: f64) -> String {
    let secs = timestamp.floor() as i64;
    let nanos = ((timestamp - timestamp.floor()) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn describe_output(info: &OutputInfo) -> String {
    match info {
        OutputInfo::Sequence { type_name, length } => format!("{}[{}]", type_name, length),
        OutputInfo::Object { type_name, attributes } => format!("{}{{{}}}", type_name, attributes.join(", ")),
        OutputInfo::Scalar { type_name } => type_name.clone(),
    }
}

/// One colored display line for an event
pub fn format_event(event: &Event) -> String {
    let kind = event.event_type.as_str();
    let kind_colored = match event.event_type {
        EventType::StepStart => kind.cyan(),
        EventType::StepEnd => kind.green(),
        EventType::Error => kind.red(),
        EventType::Metric => kind.blue(),
        EventType::Other(_) => kind.normal(),
    };

    let mut parts = vec![
        event.timestamp.map(format_timestamp).unwrap_or_default().dimmed().to_string(),
        kind_colored.to_string(),
        event.step.bold().to_string(),
    ];

    match event.event_type {
        EventType::StepEnd => {
            parts.push(format!("{:.3}s", event.duration.unwrap_or(0.0)));
            if let Some(info) = &event.output_info {
                parts.push(describe_output(info).dimmed().to_string());
            }
        }
        EventType::Error => {
            let message = event.error.as_deref().unwrap_or("Unknown error");
            let kind = event.error_kind.as_deref().unwrap_or("error");
            parts.push(format!("{}: {}", kind, truncate(message, get_terminal_width() / 2)));
        }
        EventType::Metric => {
            parts.push(format!(
                "{}={}",
                event.metric_name.as_deref().unwrap_or("unknown"),
                event.metric_value.unwrap_or(0.0)
            ));
        }
        _ => {}
    }

    if let Some(parent) = &event.parent_id {
        let short: String = parent.chars().take(8).collect();
        parts.push(format!("(parent {})", short).dimmed().to_string());
    }

    parts.join(" ")
}
