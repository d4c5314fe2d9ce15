//! Device Session - connection lifecycle for one sensor device.
//!
//! Owns the opened device handle and the [`ConnectionState`] machine. All
//! methods take `&self`, so one session can be shared (`Arc`) between the
//! monitoring loop and whatever issues stop/disconnect requests.
//!
//! Guarantees:
//! - at most one acquisition window holds the device at any time
//! - every state transition emits exactly one status text
//! - a lost device is never reopened behind the caller's back

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sinks::{NotificationSink, StatusSink, TracingSinks};
use super::state::ConnectionState;
use crate::acquisition::device::{DeviceError, DeviceHandle, DeviceTransport};
use crate::acquisition::window::{AcquisitionWindow, WindowEnd, WindowReport};
use crate::config::SerialSettings;
use crate::types::NotifyLevel;

/// Session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Could not open device: {0}")]
    DeviceOpen(#[from] DeviceError),

    #[error("Not connected to a device")]
    NotConnected,

    #[error("A read is already in progress")]
    Busy,

    #[error("Device connection was lost, reconnect required")]
    ReconnectRequired,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    handle: Option<DeviceHandle>,
    /// Cancels the running window, if any
    window_cancel: Option<CancellationToken>,
    /// Bumped on every connect/disconnect so a window that outlives its
    /// connection does not touch the new state.
    epoch: u64,
    opening: bool,
    /// Set when the device vanished mid-window; cleared by `connect`
    lost: bool,
}

/// Stateful connection to one sensor device.
pub struct DeviceSession<T: DeviceTransport> {
    transport: T,
    settings: SerialSettings,
    window: AcquisitionWindow,
    inner: Mutex<Inner>,
    status: Arc<dyn StatusSink>,
    notifier: Arc<dyn NotificationSink>,
}

impl<T: DeviceTransport> DeviceSession<T> {
    pub fn new(transport: T, settings: SerialSettings, window: AcquisitionWindow) -> Self {
        Self {
            transport,
            settings,
            window,
            inner: Mutex::new(Inner::default()),
            status: Arc::new(TracingSinks),
            notifier: Arc::new(TracingSinks),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = sink;
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = sink;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Length of each acquisition window.
    pub fn window_duration(&self) -> Duration {
        self.window.duration()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Connect / Disconnect
    // ========================================================================

    /// Open the device. No-op when already connected.
    pub async fn connect(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            if inner.state.is_connected() {
                return Ok(());
            }
            if inner.opening {
                return Err(SessionError::Busy);
            }
            inner.opening = true;
        }

        info!(transport = self.transport.name(), port = %self.settings.port, "Opening device");
        let opened = self.transport.open(&self.settings).await;

        let mut inner = self.lock();
        inner.opening = false;
        match opened {
            Ok(source) => {
                let handle = DeviceHandle::new(source, self.transport.name());
                inner.handle = Some(handle);
                inner.state = ConnectionState::Connected;
                inner.epoch += 1;
                inner.lost = false;
                drop(inner);
                self.status.set_status_text(&format!("Connected ({})", self.transport.name()));
                Ok(())
            }
            Err(e) => {
                drop(inner);
                warn!(error = %e, "Failed to open device");
                self.notifier.notify(&format!("Failed to connect: {e}"), NotifyLevel::Error);
                Err(SessionError::DeviceOpen(e))
            }
        }
    }

    /// Cancel any running window, wait for it to give up the device, then
    /// close the device.
    pub async fn disconnect(&self) {
        let (handle, cancel) = {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Disconnected {
                return;
            }
            inner.epoch += 1;
            (inner.handle.take(), inner.window_cancel.take())
        };

        if let Some(token) = cancel {
            debug!("Cancelling in-flight window before disconnect");
            token.cancel();
        }
        if let Some(handle) = handle {
            handle.close().await;
        }

        self.lock().state = ConnectionState::Disconnected;
        self.status.set_status_text("Disconnected");
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Run one acquisition window.
    ///
    /// The window stops early when `parent` or [`stop_reading`](Self::stop_reading)
    /// cancels it. A window that ends because the device vanished still
    /// returns its partial readings; the session is then disconnected and
    /// further calls fail with [`SessionError::ReconnectRequired`].
    pub async fn start_reading(&self, parent: &CancellationToken) -> Result<WindowReport, SessionError> {
        let (handle, token, epoch) = {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Reading => return Err(SessionError::Busy),
                ConnectionState::Disconnected if inner.lost => return Err(SessionError::ReconnectRequired),
                ConnectionState::Disconnected => return Err(SessionError::NotConnected),
                ConnectionState::Connected => {}
            }
            let handle = inner.handle.clone().ok_or(SessionError::NotConnected)?;
            let token = parent.child_token();
            inner.state = ConnectionState::Reading;
            inner.window_cancel = Some(token.clone());
            (handle, token, inner.epoch)
        };
        self.status.set_status_text(&format!(
            "Reading ({}s window)",
            self.window_duration().as_secs()
        ));

        let result = self.window.collect(&handle, &token).await;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            // Disconnected while the window ran; disconnect() owns the state
            return result;
        }
        inner.window_cancel = None;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                inner.state = ConnectionState::Connected;
                drop(inner);
                self.status.set_status_text("Connected");
                return Err(e);
            }
        };

        if report.end == WindowEnd::EndOfStream {
            inner.state = ConnectionState::Disconnected;
            inner.handle = None;
            inner.lost = true;
            inner.epoch += 1;
            drop(inner);
            warn!(transport = self.transport.name(), "Device stream ended during window");
            self.status.set_status_text("Disconnected (device lost)");
            self.notifier
                .notify("Device disconnected. Reconnect to continue reading.", NotifyLevel::Error);
            return Ok(report);
        }

        let text = match &report.end {
            WindowEnd::DeviceError(message) => message.clone(),
            WindowEnd::Cancelled => "Connected (reading stopped)".to_string(),
            WindowEnd::Deadline | WindowEnd::LineQuota | WindowEnd::EndOfStream => {
                format!("Connected ({} readings collected)", report.readings.len())
            }
        };
        inner.state = ConnectionState::Connected;
        drop(inner);
        self.status.set_status_text(&text);
        Ok(report)
    }

    /// Ask the running window to stop. Returns `false` if none was running.
    pub fn stop_reading(&self) -> bool {
        let inner = self.lock();
        match &inner.window_cancel {
            Some(token) => {
                info!("Stop requested for running window");
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::device::{ByteSource, ChunkEvent};
    use crate::config::StationConfig;
    use async_trait::async_trait;
    use std::io;

    struct IdleSource;

    #[async_trait]
    impl ByteSource for IdleSource {
        async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(ChunkEvent::Idle)
        }
    }

    struct IdleTransport;

    #[async_trait]
    impl DeviceTransport for IdleTransport {
        async fn open(&self, _settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError> {
            Ok(Box::new(IdleSource))
        }
        fn name(&self) -> &str {
            "idle"
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl DeviceTransport for FailingTransport {
        async fn open(&self, _settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError> {
            Err(DeviceError::PermissionDenied("/dev/ttyUSB0".to_string()))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    fn session<T: DeviceTransport>(transport: T) -> DeviceSession<T> {
        let window = AcquisitionWindow::from_config(&StationConfig::default())
            .unwrap()
            .with_duration(Duration::from_secs(1));
        DeviceSession::new(transport, SerialSettings::default(), window)
    }

    #[tokio::test]
    async fn test_read_before_connect_is_not_connected() {
        let s = session(IdleTransport);
        let err = s.start_reading(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
    }

    #[tokio::test]
    async fn test_open_failure_stays_disconnected() {
        let s = session(FailingTransport);
        let err = s.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceOpen(DeviceError::PermissionDenied(_))));
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_returns_to_connected() {
        let s = session(IdleTransport);
        s.connect().await.unwrap();
        s.connect().await.unwrap();
        assert_eq!(s.state(), ConnectionState::Connected);

        let report = s.start_reading(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.end, WindowEnd::Deadline);
        assert_eq!(s.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let s = session(IdleTransport);
        s.connect().await.unwrap();
        s.disconnect().await;
        s.disconnect().await;
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(!s.stop_reading());
    }
}
