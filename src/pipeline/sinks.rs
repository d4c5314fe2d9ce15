//! Output seams of the pipeline.
//!
//! The pipeline never renders anything itself. Averaged readings, user
//! notifications and connection status text go to these sinks; a UI, a form
//! filler or the CLI plugs in behind them.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::StationInfo;
use crate::types::{AveragedReading, NotifyLevel};

/// Receives one averaged reading per completed window.
pub trait ReadingSink: Send + Sync {
    fn display_averaged_reading(&self, reading: &AveragedReading);
}

/// Receives user-facing notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, level: NotifyLevel);
}

/// Receives the connection status line.
pub trait StatusSink: Send + Sync {
    fn set_status_text(&self, text: &str);
}

// ============================================================================
// Tracing Sinks
// ============================================================================

/// Routes every sink through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSinks;

impl ReadingSink for TracingSinks {
    fn display_averaged_reading(&self, reading: &AveragedReading) {
        info!(
            status = %reading.status.label,
            readings = reading.readings,
            "Averaged reading"
        );
        for p in &reading.parameters {
            info!(
                parameter = %p.key,
                mean = format_args!("{:.2}", p.mean),
                min = format_args!("{:.2}", p.min),
                max = format_args!("{:.2}", p.max),
                samples = p.samples,
                unit = %p.unit,
                "  window stats"
            );
        }
    }
}

impl NotificationSink for TracingSinks {
    fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Error => error!(level = %level, "{message}"),
            NotifyLevel::Warning => warn!(level = %level, "{message}"),
            NotifyLevel::Success | NotifyLevel::Info => info!(level = %level, "{message}"),
        }
    }
}

impl StatusSink for TracingSinks {
    fn set_status_text(&self, text: &str) {
        info!(status = %text, "Connection status");
    }
}

// ============================================================================
// JSON Lines Sink
// ============================================================================

#[derive(Serialize)]
struct JsonLine<'a> {
    station: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    location: &'a str,
    #[serde(flatten)]
    reading: &'a AveragedReading,
}

/// Writes each averaged reading as one JSON object per line.
///
/// The CLI points this at stdout so readings can be piped into other tools
/// while logs go to stderr.
pub struct JsonLinesSink {
    station: StationInfo,
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(station: StationInfo, out: Box<dyn Write + Send>) -> Self {
        Self {
            station,
            out: Mutex::new(out),
        }
    }

    pub fn stdout(station: StationInfo) -> Self {
        Self::new(station, Box::new(std::io::stdout()))
    }
}

impl ReadingSink for JsonLinesSink {
    fn display_averaged_reading(&self, reading: &AveragedReading) {
        let line = JsonLine {
            station: &self.station.name,
            location: &self.station.location,
            reading,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize averaged reading");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{json}").and_then(|()| out.flush()) {
            warn!(error = %e, "Failed to write averaged reading");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParameterStats, Status, StatusBand};
    use chrono::Utc;
    use std::sync::Arc;

    /// Writer that keeps what was written for inspection.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_sink_writes_one_line_per_reading() {
        let buf = SharedBuf::default();
        let station = StationInfo {
            name: "RIVER-01".to_string(),
            location: "Intake".to_string(),
        };
        let sink = JsonLinesSink::new(station, Box::new(buf.clone()));
        let reading = AveragedReading {
            status: Status {
                band: StatusBand::Mid,
                label: "Neutral".to_string(),
            },
            parameters: vec![ParameterStats {
                key: "ph".to_string(),
                unit: String::new(),
                mean: 7.0,
                min: 6.0,
                max: 8.0,
                samples: 2,
            }],
            readings: 2,
            window_started: Utc::now(),
            window_ended: Utc::now(),
        };

        sink.display_averaged_reading(&reading);
        sink.display_averaged_reading(&reading);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["station"], "RIVER-01");
        assert_eq!(value["location"], "Intake");
        assert_eq!(value["status"]["label"], "Neutral");
        assert_eq!(value["parameters"][0]["mean"], 7.0);
    }
}
