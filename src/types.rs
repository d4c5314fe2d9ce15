//! Core data types shared by the acquisition, processing and pipeline layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Sensor Reading
// ============================================================================

/// Wire format a line was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// `{"ph": 7.1, "heavyMetal": 230}`
    Json,
    /// `7.1,230`
    Csv,
    /// `pH Value: 7.1 (Neutral)`
    Labeled,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Json => write!(f, "JSON"),
            WireFormat::Csv => write!(f, "CSV"),
            WireFormat::Labeled => write!(f, "labeled"),
        }
    }
}

/// One parsed measurement line.
///
/// `values` is aligned with the configured parameter list. A labeled line may
/// only carry some parameters, the others are `None`. Every present value is
/// finite and inside its parameter's absolute range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub values: Vec<Option<f64>>,
    pub format: WireFormat,
    /// Parenthetical label printed by the device, e.g. `Acidic`
    pub qualifier: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl SensorReading {
    /// Value of the parameter at `index`, if the line carried it.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// Number of parameters this reading carries.
    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

// ============================================================================
// Averaged Reading
// ============================================================================

/// Qualitative band of the primary parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusBand {
    Low,
    Mid,
    High,
}

/// Derived status: band plus its configured label (`Acidic`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub band: StatusBand,
    pub label: String,
}

/// Window statistics for a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterStats {
    pub key: String,
    pub unit: String,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

/// Result of one acquisition window.
///
/// Parameters with no samples in the window are omitted rather than
/// reported as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedReading {
    pub status: Status,
    pub parameters: Vec<ParameterStats>,
    /// Readings that went into the average
    pub readings: usize,
    pub window_started: DateTime<Utc>,
    pub window_ended: DateTime<Utc>,
}

impl AveragedReading {
    /// Mean of the parameter with the given key.
    pub fn mean(&self, key: &str) -> Option<f64> {
        self.stats(key).map(|s| s.mean)
    }

    pub fn stats(&self, key: &str) -> Option<&ParameterStats> {
        self.parameters.iter().find(|s| s.key == key)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Success,
    Warning,
    Error,
    Info,
}

impl std::fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyLevel::Success => write!(f, "success"),
            NotifyLevel::Warning => write!(f, "warning"),
            NotifyLevel::Error => write!(f, "error"),
            NotifyLevel::Info => write!(f, "info"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_out_of_bounds_is_none() {
        let reading = SensorReading {
            values: vec![Some(7.0), None],
            format: WireFormat::Labeled,
            qualifier: None,
            received_at: Utc::now(),
        };
        assert_eq!(reading.value(0), Some(7.0));
        assert_eq!(reading.value(1), None);
        assert_eq!(reading.value(5), None);
        assert_eq!(reading.present_count(), 1);
    }

    #[test]
    fn test_notify_level_serializes_lowercase() {
        let json = serde_json::to_string(&NotifyLevel::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
