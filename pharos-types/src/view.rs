//! Rendered snapshots of watcher state.
//!
//! Views are plain values: building one copies everything it needs out of the
//! live watcher, so a renderer never holds a lock while formatting.

use crate::Status;

/// Placeholder shown for a watcher that has never produced a measurement.
pub const UNKNOWN_VALUE: &str = "unknown";

/// Format a measurement for display: fixed four decimals, or `"unknown"`.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => UNKNOWN_VALUE.to_string(),
    }
}

/// The consumer-facing state of a single watcher.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatcherView {
    /// Addressing key derived from the name.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    pub status: Status,
    /// Formatted measurement (see [`format_value`]).
    pub value: String,
    /// Last raw probe output, empty if none was captured.
    pub detail: String,
    /// How long the watcher has held `status` (see [`crate::format_elapsed`]).
    pub duration: String,
    /// Unix timestamp in milliseconds of the last processed check.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub last_updated_ms: Option<u64>,
}

/// A named group of watcher views.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SetView {
    pub name: String,
    /// Worst status among the set's watchers.
    pub status: Status,
    pub watchers: Vec<WatcherView>,
}

impl SetView {
    /// Count watchers currently in the given status.
    pub fn count(&self, status: Status) -> usize {
        self.watchers.iter().filter(|w| w.status == status).count()
    }
}

/// Everything a dashboard page renders.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DashboardView {
    pub page_tag: String,
    pub sets: Vec<SetView>,
}

impl DashboardView {
    /// Worst status across every set.
    pub fn status(&self) -> Status {
        self.sets.iter().map(|s| s.status).max().unwrap_or_default()
    }
}
