//! Threshold-based status classification.

use serde::Deserialize;

use pharos_types::Status;

/// Threshold triple, in seconds, used to classify a measured duration.
///
/// `min < warn < crit` is expected but not enforced; [`classify`] has a fixed
/// precedence that stays well-defined for any ordering.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f64; 3]")]
pub struct Thresholds {
    /// Values at or below this are suspiciously fast (degenerate probe).
    pub min: f64,
    /// Values at or above this are a warning.
    pub warn: f64,
    /// Values at or above this are critical.
    pub crit: f64,
}

impl Thresholds {
    pub fn new(min: f64, warn: f64, crit: f64) -> Self {
        Self { min, warn, crit }
    }

    /// Classify a value against this triple.
    ///
    /// Checked in order `min`, `crit`, `warn`: a value that is both `<= min`
    /// and `>= crit` is a warning.
    pub fn classify_value(&self, value: f64) -> Status {
        if value <= self.min {
            Status::Warning
        } else if value >= self.crit {
            Status::Critical
        } else if value >= self.warn {
            Status::Warning
        } else {
            Status::Ok
        }
    }
}

impl From<[f64; 3]> for Thresholds {
    fn from([min, warn, crit]: [f64; 3]) -> Self {
        Self { min, warn, crit }
    }
}

impl From<(f64, f64, f64)> for Thresholds {
    fn from((min, warn, crit): (f64, f64, f64)) -> Self {
        Self { min, warn, crit }
    }
}

/// Map a check result to a status.
///
/// A failed check is always critical. Without thresholds (or without a value
/// to compare) a successful check is OK.
pub fn classify(success: bool, value: Option<f64>, thresholds: Option<&Thresholds>) -> Status {
    if !success {
        return Status::Critical;
    }

    match (thresholds, value) {
        (Some(t), Some(v)) => t.classify_value(v),
        _ => Status::Ok,
    }
}
