//! Acquisition Window
//!
//! One bounded collection cycle: take the device's read lock, pull chunks
//! through the framer and parser until the window ends, give the lock back.
//!
//! ```text
//! try_acquire ──► loop { cancelled? ── read_chunk (≤ deadline) ── frame ── parse } ──► drop lock
//!                   │
//!                   └─ ends on: Deadline | LineQuota | Cancelled | EndOfStream | DeviceError
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::device::{ChunkEvent, DeviceHandle, ReadLock};
use super::framer::LineFramer;
use super::parser::ReadingParser;
use crate::config::{AcquisitionConfig, StationConfig};
use crate::pipeline::SessionError;
use crate::types::SensorReading;

/// Why a window stopped collecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEnd {
    Deadline,
    LineQuota,
    Cancelled,
    /// The device stream ended; the connection is gone.
    EndOfStream,
    /// A read failed. Carries the device's message unmodified.
    DeviceError(String),
}

impl std::fmt::Display for WindowEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowEnd::Deadline => write!(f, "deadline reached"),
            WindowEnd::LineQuota => write!(f, "reading quota reached"),
            WindowEnd::Cancelled => write!(f, "cancelled"),
            WindowEnd::EndOfStream => write!(f, "device stream ended"),
            WindowEnd::DeviceError(msg) => write!(f, "device error: {msg}"),
        }
    }
}

/// Everything one window collected.
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub readings: Vec<SensorReading>,
    pub end: WindowEnd,
    /// Complete lines framed during the window
    pub lines_seen: usize,
    pub lines_rejected: usize,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
}

impl WindowReport {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Collects readings from a device for a bounded time.
#[derive(Debug, Clone)]
pub struct AcquisitionWindow {
    parser: Arc<ReadingParser>,
    duration: Duration,
    max_readings: Option<usize>,
    max_line_bytes: usize,
}

impl AcquisitionWindow {
    pub fn new(parser: Arc<ReadingParser>, config: &AcquisitionConfig) -> Self {
        Self {
            parser,
            duration: Duration::from_secs(config.window_secs),
            max_readings: config.max_readings_per_window,
            max_line_bytes: config.max_line_bytes,
        }
    }

    pub fn from_config(config: &StationConfig) -> Result<Self, regex::Error> {
        let parser = ReadingParser::from_config(config)?;
        Ok(Self::new(Arc::new(parser), &config.acquisition))
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn parser(&self) -> &ReadingParser {
        &self.parser
    }

    /// Run one window on `handle`.
    ///
    /// Fails only with [`SessionError::Busy`] when another window holds the
    /// read lock. Device trouble ends the window early and is reported in
    /// [`WindowReport::end`] together with whatever was collected so far.
    pub async fn collect(&self, handle: &DeviceHandle, cancel: &CancellationToken) -> Result<WindowReport, SessionError> {
        let mut lock = handle.try_acquire().ok_or(SessionError::Busy)?;
        debug!(device = handle.label(), window_secs = self.duration.as_secs(), "Read lock acquired");
        let report = self.run(&mut lock, cancel).await;
        drop(lock);
        Ok(report)
    }

    async fn run(&self, lock: &mut ReadLock, cancel: &CancellationToken) -> WindowReport {
        let started = Utc::now();
        let deadline = Instant::now() + self.duration;
        let mut framer = LineFramer::with_max_line_bytes(self.max_line_bytes);
        let mut readings = Vec::new();
        let mut lines_seen = 0usize;
        let mut lines_rejected = 0usize;

        let end = 'window: loop {
            if cancel.is_cancelled() {
                break WindowEnd::Cancelled;
            }
            // A source that is always ready never lets `timeout_at` see the deadline
            if Instant::now() >= deadline {
                break WindowEnd::Deadline;
            }

            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break 'window WindowEnd::Cancelled,
                result = tokio::time::timeout_at(deadline, lock.read_chunk()) => match result {
                    Err(_) => break 'window WindowEnd::Deadline,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Device read failed, ending window");
                        break 'window WindowEnd::DeviceError(e.to_string());
                    }
                    Ok(Ok(event)) => event,
                },
            };

            // Let stop requests and other tasks run between chunks
            tokio::task::yield_now().await;

            let bytes = match event {
                ChunkEvent::Data(bytes) => bytes,
                ChunkEvent::Idle => continue,
                ChunkEvent::Eof => break WindowEnd::EndOfStream,
            };

            for line in framer.feed(&bytes) {
                lines_seen += 1;
                match self.parser.classify(&line) {
                    Ok(reading) => {
                        trace!(format = %reading.format, line = %line, "Reading accepted");
                        readings.push(reading);
                        if self.max_readings.is_some_and(|max| readings.len() >= max) {
                            break 'window WindowEnd::LineQuota;
                        }
                    }
                    Err(reason) => {
                        lines_rejected += 1;
                        trace!(reason = %reason, line = %line, "Line dropped");
                    }
                }
            }
        };

        let report = WindowReport {
            readings,
            end,
            lines_seen,
            lines_rejected,
            started,
            ended: Utc::now(),
        };
        debug!(
            end = %report.end,
            readings = report.readings.len(),
            lines_seen = report.lines_seen,
            lines_rejected = report.lines_rejected,
            "Acquisition window finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::device::ByteSource;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;

    /// Plays back scripted events, then stays idle.
    struct Scripted {
        events: VecDeque<io::Result<ChunkEvent>>,
    }

    #[async_trait]
    impl ByteSource for Scripted {
        async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
            match self.events.pop_front() {
                Some(event) => event,
                None => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(ChunkEvent::Idle)
                }
            }
        }
    }

    fn handle(events: Vec<io::Result<ChunkEvent>>) -> DeviceHandle {
        DeviceHandle::new(Box::new(Scripted { events: events.into() }), "scripted")
    }

    fn data(s: &str) -> io::Result<ChunkEvent> {
        Ok(ChunkEvent::Data(s.as_bytes().to_vec()))
    }

    fn window() -> AcquisitionWindow {
        AcquisitionWindow::from_config(&StationConfig::default())
            .unwrap()
            .with_duration(Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_runs_to_deadline() {
        let h = handle(vec![data("pH Value: 7.0 (Neutral)\r\npH Val"), data("ue: 7.2 (Neutral)\r\n")]);
        let report = window().collect(&h, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.end, WindowEnd::Deadline);
        assert_eq!(report.readings.len(), 2);
        assert_eq!(report.readings[1].value(0), Some(7.2));
        assert!(!h.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_quota_ends_window_early() {
        let mut config = StationConfig::default();
        config.acquisition.max_readings_per_window = Some(2);
        let w = AcquisitionWindow::from_config(&config).unwrap();
        let h = handle(vec![data("7.0,100\n7.1,110\n7.2,120\n")]);
        let report = w.collect(&h, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.end, WindowEnd::LineQuota);
        assert_eq!(report.readings.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_error_keeps_partial_readings() {
        let h = handle(vec![
            data("7.0,100\n"),
            Err(io::Error::new(io::ErrorKind::Other, "Input/output error")),
        ]);
        let report = window().collect(&h, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.end, WindowEnd::DeviceError("Input/output error".to_string()));
        assert_eq!(report.readings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_ends_window() {
        let h = handle(vec![data("7.0,100\n"), Ok(ChunkEvent::Eof)]);
        let report = window().collect(&h, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.end, WindowEnd::EndOfStream);
        assert_eq!(report.readings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_window_reads_nothing() {
        let h = handle(vec![data("7.0,100\n")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = window().collect(&h, &cancel).await.unwrap();
        assert_eq!(report.end, WindowEnd::Cancelled);
        assert!(report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_lines_are_counted() {
        let h = handle(vec![data("=== Boot ===\nInitializing...\npH Value: 99 (x)\n7.0,100\n")]);
        let report = window().collect(&h, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.lines_seen, 4);
        assert_eq!(report.lines_rejected, 3);
        assert_eq!(report.readings.len(), 1);
    }

    /// Returns a complete line on every read without ever waiting.
    struct Flooding;

    #[async_trait]
    impl ByteSource for Flooding {
        async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
            Ok(ChunkEvent::Data(b"noise\n".to_vec()))
        }
    }

    #[tokio::test]
    async fn test_deadline_ends_window_on_always_ready_source() {
        let h = DeviceHandle::new(Box::new(Flooding), "flooding");
        let w = window().with_duration(Duration::from_millis(200));

        let report = tokio::time::timeout(Duration::from_secs(5), w.collect(&h, &CancellationToken::new()))
            .await
            .expect("window overran its deadline")
            .unwrap();

        assert_eq!(report.end, WindowEnd::Deadline);
        assert!(report.lines_rejected > 0);
        assert!(report.readings.is_empty());
        assert!(!h.is_locked());
    }

    #[tokio::test]
    async fn test_cancel_from_other_task_reaches_busy_window() {
        let h = DeviceHandle::new(Box::new(Flooding), "flooding");
        let w = window().with_duration(Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let stopper = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        });

        let report = tokio::time::timeout(Duration::from_secs(5), w.collect(&h, &cancel))
            .await
            .expect("stop request never reached the window")
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(report.end, WindowEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_busy_when_lock_held() {
        let h = handle(vec![]);
        let _held = h.try_acquire().unwrap();
        let err = window().collect(&h, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Busy));
    }
}
