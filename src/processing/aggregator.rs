//! Window aggregation: per-parameter mean/min/max and the status band.

use crate::acquisition::window::WindowReport;
use crate::config::{ParameterSpec, StationConfig, StatusConfig};
use crate::config::defaults::{STATUS_LOWER, STATUS_UPPER};
use crate::types::{AveragedReading, ParameterStats, SensorReading, Status, StatusBand};

// ============================================================================
// Status Bands
// ============================================================================

/// Thresholds mapping the primary parameter onto a qualitative band.
///
/// Boundaries belong to the lower band: `v <= lower` is low,
/// `lower < v <= upper` is mid, `v > upper` is high.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusBands {
    /// Key of the parameter the status is derived from
    pub parameter: String,
    pub lower: f64,
    pub upper: f64,
    pub low_label: String,
    pub mid_label: String,
    pub high_label: String,
}

impl StatusBands {
    pub fn from_config(config: &StatusConfig) -> Self {
        Self {
            parameter: config.parameter.clone(),
            lower: config.lower,
            upper: config.upper,
            low_label: config.low_label.clone(),
            mid_label: config.mid_label.clone(),
            high_label: config.high_label.clone(),
        }
    }

    pub fn band(&self, value: f64) -> StatusBand {
        if value <= self.lower {
            StatusBand::Low
        } else if value <= self.upper {
            StatusBand::Mid
        } else {
            StatusBand::High
        }
    }

    pub fn classify(&self, value: f64) -> Status {
        let band = self.band(value);
        let label = match band {
            StatusBand::Low => &self.low_label,
            StatusBand::Mid => &self.mid_label,
            StatusBand::High => &self.high_label,
        };
        Status {
            band,
            label: label.clone(),
        }
    }
}

impl Default for StatusBands {
    fn default() -> Self {
        Self {
            parameter: "ph".to_string(),
            lower: STATUS_LOWER,
            upper: STATUS_UPPER,
            low_label: "Acidic".to_string(),
            mid_label: "Neutral".to_string(),
            high_label: "Alkaline".to_string(),
        }
    }
}

// ============================================================================
// Averaging
// ============================================================================

/// Reduce one window's readings to an [`AveragedReading`].
///
/// Each parameter is averaged over the readings that carry it; parameters
/// with no samples are left out. Returns `None` when `readings` is empty or
/// none of them carries the status parameter, so no NaN ever leaves here.
/// Window bounds default to the first and last receive times.
pub fn average(readings: &[SensorReading], parameters: &[ParameterSpec], bands: &StatusBands) -> Option<AveragedReading> {
    let primary = parameters.iter().position(|p| p.key == bands.parameter)?;

    let stats: Vec<ParameterStats> = parameters
        .iter()
        .enumerate()
        .filter_map(|(index, spec)| parameter_stats(readings, index, spec))
        .collect();

    let primary_mean = stats.iter().find(|s| s.key == parameters[primary].key)?.mean;

    let window_started = readings.iter().map(|r| r.received_at).min()?;
    let window_ended = readings.iter().map(|r| r.received_at).max()?;

    Some(AveragedReading {
        status: bands.classify(primary_mean),
        parameters: stats,
        readings: readings.len(),
        window_started,
        window_ended,
    })
}

fn parameter_stats(readings: &[SensorReading], index: usize, spec: &ParameterSpec) -> Option<ParameterStats> {
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut samples = 0usize;

    for value in readings.iter().filter_map(|r| r.value(index)) {
        sum += value;
        min = min.min(value);
        max = max.max(value);
        samples += 1;
    }

    if samples == 0 {
        return None;
    }
    Some(ParameterStats {
        key: spec.key.clone(),
        unit: spec.unit.clone(),
        mean: sum / samples as f64,
        min,
        max,
        samples,
    })
}

// ============================================================================
// Safety Warnings
// ============================================================================

/// Which side of the safe range a mean fell on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafeBound {
    Below(f64),
    Above(f64),
}

/// A parameter whose window mean left its safe range.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyWarning {
    pub key: String,
    pub label: String,
    pub unit: String,
    pub mean: f64,
    pub bound: SafeBound,
}

impl std::fmt::Display for SafetyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = if self.unit.is_empty() {
            String::new()
        } else {
            format!(" {}", self.unit)
        };
        match self.bound {
            SafeBound::Below(limit) => write!(
                f,
                "{} average {:.2}{unit} is below the safe minimum of {limit}{unit}",
                self.label, self.mean
            ),
            SafeBound::Above(limit) => write!(
                f,
                "{} average {:.2}{unit} is above the safe maximum of {limit}{unit}",
                self.label, self.mean
            ),
        }
    }
}

/// Parameters whose mean is outside the configured safe range.
pub fn safety_warnings(reading: &AveragedReading, parameters: &[ParameterSpec]) -> Vec<SafetyWarning> {
    parameters
        .iter()
        .filter_map(|spec| {
            let mean = reading.mean(&spec.key)?;
            let bound = match (spec.safe_min, spec.safe_max) {
                (Some(lo), _) if mean < lo => SafeBound::Below(lo),
                (_, Some(hi)) if mean > hi => SafeBound::Above(hi),
                _ => return None,
            };
            Some(SafetyWarning {
                key: spec.key.clone(),
                label: if spec.label.is_empty() { spec.key.clone() } else { spec.label.clone() },
                unit: spec.unit.clone(),
                mean,
                bound,
            })
        })
        .collect()
}

// ============================================================================
// Aggregator
// ============================================================================

/// Parameter set and status bands bundled for repeated use by the monitor.
#[derive(Debug, Clone)]
pub struct Aggregator {
    parameters: Vec<ParameterSpec>,
    bands: StatusBands,
}

impl Aggregator {
    pub fn new(parameters: Vec<ParameterSpec>, bands: StatusBands) -> Self {
        Self { parameters, bands }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        Self::new(config.parameter_set(), StatusBands::from_config(&config.status))
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn average(&self, readings: &[SensorReading]) -> Option<AveragedReading> {
        average(readings, &self.parameters, &self.bands)
    }

    /// Average a window, stamping it with the window's own start and end.
    pub fn average_window(&self, report: &WindowReport) -> Option<AveragedReading> {
        let mut averaged = self.average(&report.readings)?;
        averaged.window_started = report.started;
        averaged.window_ended = report.ended;
        Some(averaged)
    }

    pub fn safety_warnings(&self, reading: &AveragedReading) -> Vec<SafetyWarning> {
        safety_warnings(reading, &self.parameters)
    }
}
