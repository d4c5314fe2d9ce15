//! Monitoring loop shared by every input mode.
//!
//! Repeats window -> average -> sink until cancelled, the device is lost, or
//! (in single-shot mode) after the first window. Serial, replay and
//! simulated transports all run through the same [`MonitoringLoop`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::{DeviceSession, SessionError};
use super::sinks::{NotificationSink, ReadingSink, TracingSinks};
use crate::acquisition::device::DeviceTransport;
use crate::acquisition::window::{WindowEnd, WindowReport};
use crate::config::StationConfig;
use crate::processing::Aggregator;
use crate::types::NotifyLevel;

/// Counters accumulated over one monitoring run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub windows: u64,
    /// Windows that produced an averaged reading
    pub averaged: u64,
    pub empty_windows: u64,
    pub readings: u64,
    pub lines_rejected: u64,
    pub safety_warnings: u64,
    pub device_errors: u64,
}

impl std::fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Monitor: {} windows ({} averaged, {} empty), {} readings, {} lines rejected, {} safety warnings, {} device errors",
            self.windows,
            self.averaged,
            self.empty_windows,
            self.readings,
            self.lines_rejected,
            self.safety_warnings,
            self.device_errors
        )
    }
}

/// How the loop paces itself.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Stop after a single window
    pub once: bool,
    pub inter_window_delay: Duration,
}

impl MonitorOptions {
    pub fn from_config(config: &StationConfig) -> Self {
        Self {
            once: false,
            inter_window_delay: Duration::from_secs(config.acquisition.inter_window_delay_secs),
        }
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from_config(&StationConfig::default())
    }
}

/// Drives a [`DeviceSession`] window after window.
pub struct MonitoringLoop<T: DeviceTransport> {
    session: Arc<DeviceSession<T>>,
    aggregator: Aggregator,
    readings: Arc<dyn ReadingSink>,
    notifier: Arc<dyn NotificationSink>,
    options: MonitorOptions,
    cancel_token: CancellationToken,
}

impl<T: DeviceTransport> MonitoringLoop<T> {
    pub fn new(session: Arc<DeviceSession<T>>, aggregator: Aggregator, cancel_token: CancellationToken) -> Self {
        Self {
            session,
            aggregator,
            readings: Arc::new(TracingSinks),
            notifier: Arc::new(TracingSinks),
            options: MonitorOptions::default(),
            cancel_token,
        }
    }

    pub fn with_options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reading_sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.readings = sink;
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = sink;
        self
    }

    /// Run until cancellation, device loss, or the single window in `once` mode.
    ///
    /// Connects first if the session is not connected yet. Open failures and
    /// reconnect-required conditions are returned to the caller.
    pub async fn run(self) -> Result<MonitorStats, SessionError> {
        let mut stats = MonitorStats::default();

        if !self.session.is_connected() {
            self.session.connect().await?;
        }

        info!(
            transport = self.session.transport_name(),
            once = self.options.once,
            delay_secs = self.options.inter_window_delay.as_secs(),
            "Monitoring started"
        );

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }

            match self.session.start_reading(&self.cancel_token).await {
                Ok(report) => {
                    stats.windows += 1;
                    let end = report.end.clone();
                    self.handle_report(&report, &mut stats);
                    if matches!(end, WindowEnd::EndOfStream | WindowEnd::Cancelled) {
                        break;
                    }
                }
                Err(SessionError::Busy) => {
                    warn!("Another window is already reading, skipping this cycle");
                }
                Err(e) => {
                    info!("{stats}");
                    return Err(e);
                }
            }

            if self.options.once {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                () = tokio::time::sleep(self.options.inter_window_delay) => {}
            }
        }

        info!("{stats}");
        Ok(stats)
    }

    /// Emit exactly one outcome for a finished window.
    fn handle_report(&self, report: &WindowReport, stats: &mut MonitorStats) {
        stats.readings += report.readings.len() as u64;
        stats.lines_rejected += report.lines_rejected as u64;
        if matches!(report.end, WindowEnd::DeviceError(_)) {
            stats.device_errors += 1;
        }

        match self.aggregator.average_window(report) {
            Some(averaged) => {
                stats.averaged += 1;
                self.readings.display_averaged_reading(&averaged);

                for warning in self.aggregator.safety_warnings(&averaged) {
                    stats.safety_warnings += 1;
                    self.notifier.notify(&warning.to_string(), NotifyLevel::Warning);
                }
            }
            None => {
                stats.empty_windows += 1;
                match report.end {
                    // The session already reported the lost device
                    WindowEnd::EndOfStream => {}
                    WindowEnd::Cancelled => self.notifier.notify("Reading stopped", NotifyLevel::Info),
                    _ => self.notifier.notify(
                        &format!(
                            "No valid data received in {}s window ({} lines seen, {} rejected)",
                            self.session.window_duration().as_secs(),
                            report.lines_seen,
                            report.lines_rejected
                        ),
                        NotifyLevel::Warning,
                    ),
                }
            }
        }
    }
}
