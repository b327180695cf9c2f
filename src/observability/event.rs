//! Pipeline events and the lightweight output descriptors they carry

use chrono::Utc;
use indexmap::IndexMap;
use lazy_regex::regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

/// Current wall-clock time in seconds since the Unix epoch
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Event type tag
///
/// The four lifecycle tags are known; anything else is carried through as `Other`
/// so persisted logs written by newer producers still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    StepStart,
    StepEnd,
    Error,
    Metric,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::StepStart => "step_start",
            EventType::StepEnd => "step_end",
            EventType::Error => "error",
            EventType::Metric => "metric",
            EventType::Other(s) => s,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "step_start" => EventType::StepStart,
            "step_end" => EventType::StepEnd,
            "error" => EventType::Error,
            "metric" => EventType::Metric,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which event types a subscriber accepts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Wildcard
    #[default]
    All,
    Only(HashSet<EventType>),
}

impl EventFilter {
    pub fn only<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        EventFilter::Only(types.into_iter().map(Into::into).collect())
    }

    /// Build a filter from configured type names; `*` anywhere means wildcard
    pub fn from_names(names: &[String]) -> Self {
        if names.is_empty() || names.iter().any(|n| n == "*") {
            EventFilter::All
        } else {
            EventFilter::only(names.iter().map(String::as_str))
        }
    }

    pub fn accepts(&self, event_type: &EventType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(types) => types.contains(event_type),
        }
    }
}

/// Shape of a step's output, recorded instead of the output itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputInfo {
    Sequence { type_name: String, length: usize },
    Object { type_name: String, attributes: Vec<String> },
    Scalar { type_name: String },
}

impl OutputInfo {
    pub fn sequence<T: ?Sized>(length: usize) -> Self {
        OutputInfo::Sequence {
            type_name: short_type_name::<T>(),
            length,
        }
    }

    pub fn object<T: ?Sized>(attributes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        OutputInfo::Object {
            type_name: short_type_name::<T>(),
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn scalar<T: ?Sized>() -> Self {
        OutputInfo::Scalar {
            type_name: short_type_name::<T>(),
        }
    }
}

/// Type name with module paths stripped: `alloc::vec::Vec<alloc::string::String>` -> `Vec<String>`
pub fn short_type_name<T: ?Sized>() -> String {
    strip_module_paths(std::any::type_name::<T>())
}

pub(crate) fn strip_module_paths(name: &str) -> String {
    regex!(r"\b[a-z_][a-z0-9_]*::").replace_all(name, "").into_owned()
}

/// Describe a step output without serializing it
///
/// Returning `None` means the step produced nothing worth describing.
pub trait Describe {
    fn describe(&self) -> Option<OutputInfo>;
}

impl Describe for () {
    fn describe(&self) -> Option<OutputInfo> {
        None
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe(&self) -> Option<OutputInfo> {
        self.as_ref().and_then(Describe::describe)
    }
}

impl<T: Describe + ?Sized> Describe for &T {
    fn describe(&self) -> Option<OutputInfo> {
        (**self).describe()
    }
}

impl<T: Describe + ?Sized> Describe for Box<T> {
    fn describe(&self) -> Option<OutputInfo> {
        (**self).describe()
    }
}

macro_rules! describe_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl Describe for $t {
                fn describe(&self) -> Option<OutputInfo> {
                    Some(OutputInfo::scalar::<$t>())
                }
            }
        )*
    };
}

describe_scalar!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String, str);

impl<T> Describe for Vec<T> {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::sequence::<Self>(self.len()))
    }
}

impl<T> Describe for [T] {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::sequence::<Self>(self.len()))
    }
}

impl<T, const N: usize> Describe for [T; N] {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::sequence::<Self>(N))
    }
}

impl<T> Describe for VecDeque<T> {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::sequence::<Self>(self.len()))
    }
}

impl<K: fmt::Display, V> Describe for HashMap<K, V> {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::object::<Self>(self.keys().map(|k| k.to_string())))
    }
}

impl<K: fmt::Display, V> Describe for BTreeMap<K, V> {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::object::<Self>(self.keys().map(|k| k.to_string())))
    }
}

impl<K: fmt::Display, V> Describe for IndexMap<K, V> {
    fn describe(&self) -> Option<OutputInfo> {
        Some(OutputInfo::object::<Self>(self.keys().map(|k| k.to_string())))
    }
}

impl Describe for serde_json::Value {
    fn describe(&self) -> Option<OutputInfo> {
        use serde_json::Value;

        let info = match self {
            Value::Null => return None,
            Value::Array(items) => OutputInfo::Sequence {
                type_name: "array".to_string(),
                length: items.len(),
            },
            Value::Object(map) => OutputInfo::Object {
                type_name: "object".to_string(),
                attributes: map.keys().cloned().collect(),
            },
            Value::String(_) => OutputInfo::Scalar {
                type_name: "string".to_string(),
            },
            Value::Number(_) => OutputInfo::Scalar {
                type_name: "number".to_string(),
            },
            Value::Bool(_) => OutputInfo::Scalar {
                type_name: "bool".to_string(),
            },
        };
        Some(info)
    }
}

/// One pipeline occurrence
///
/// Built through the per-type constructors so payload fields only appear on the
/// event types they belong to. `parent_id` is always written (as `null` when unset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_info: Option<OutputInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

impl Event {
    /// Bare event of any type, without payload
    pub fn new(event_type: impl Into<EventType>, run_id: &str, parent_id: Option<&str>, step: &str) -> Self {
        Self {
            event_type: event_type.into(),
            run_id: run_id.to_string(),
            parent_id: parent_id.map(|p| p.to_string()),
            step: step.to_string(),
            timestamp: None,
            duration: None,
            output_info: None,
            error: None,
            error_kind: None,
            metric_name: None,
            metric_value: None,
        }
    }

    pub fn step_start(run_id: &str, parent_id: Option<&str>, step: &str) -> Self {
        Self::new(EventType::StepStart, run_id, parent_id, step)
    }

    pub fn step_end(
        run_id: &str,
        parent_id: Option<&str>,
        step: &str,
        duration: f64,
        output_info: Option<OutputInfo>,
    ) -> Self {
        Self {
            duration: Some(duration),
            output_info,
            ..Self::new(EventType::StepEnd, run_id, parent_id, step)
        }
    }

    pub fn error(run_id: &str, parent_id: Option<&str>, step: &str, message: &str, kind: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            error_kind: Some(kind.to_string()),
            ..Self::new(EventType::Error, run_id, parent_id, step)
        }
    }

    pub fn metric(run_id: &str, parent_id: Option<&str>, step: &str, name: &str, value: f64) -> Self {
        Self {
            metric_name: Some(name.to_string()),
            metric_value: Some(value),
            ..Self::new(EventType::Metric, run_id, parent_id, step)
        }
    }

    /// Set the timestamp explicitly; the bus leaves it untouched
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
