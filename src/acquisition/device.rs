//! Device abstraction for sensor byte streams.
//!
//! A [`DeviceTransport`] opens a [`ByteSource`] (real serial port, replayed
//! capture, simulator). The opened source lives inside a [`DeviceHandle`]
//! whose read lock admits one acquisition window at a time.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::SerialSettings;

/// Errors raised while opening or talking to a device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Permission denied opening {0}")]
    PermissionDenied(String),

    #[error("Failed to open {port}: {message}")]
    Open { port: String, message: String },

    #[error("Device I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DeviceError {
    /// Classify an I/O error raised while opening `port`.
    pub fn from_open_io(port: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => DeviceError::NotFound(port.to_string()),
            io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied(port.to_string()),
            _ => DeviceError::Open {
                port: port.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// One step of a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    Data(Vec<u8>),
    /// No data arrived within the source's poll interval.
    Idle,
    /// The device went away or the stream ended.
    Eof,
}

/// An opened device producing raw bytes.
#[async_trait]
pub trait ByteSource: Send {
    /// Next chunk from the device.
    ///
    /// Must be cancel-safe: a read abandoned at the window deadline may lose
    /// that chunk but must leave the source usable.
    async fn read_chunk(&mut self) -> io::Result<ChunkEvent>;

    /// Called once each time an acquisition window gives up the read lock.
    fn release(&mut self) {}

    /// Close the underlying device. Reads after this return `Eof`.
    async fn close(&mut self) {}
}

/// Opens byte sources from serial settings.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn open(&self, settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError>;

    /// Human-readable name for logging (e.g. "serial", "stdin", "simulated").
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: DeviceTransport + ?Sized> DeviceTransport for Box<T> {
    async fn open(&self, settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError> {
        (**self).open(settings).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ============================================================================
// Device Handle & Read Lock
// ============================================================================

/// Shared handle to an opened device.
#[derive(Clone)]
pub struct DeviceHandle {
    source: Arc<Mutex<Box<dyn ByteSource>>>,
    label: Arc<str>,
}

impl DeviceHandle {
    pub fn new(source: Box<dyn ByteSource>, label: &str) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            label: Arc::from(label),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the read lock without waiting. `None` if a window holds it.
    pub fn try_acquire(&self) -> Option<ReadLock> {
        Arc::clone(&self.source)
            .try_lock_owned()
            .ok()
            .map(|guard| ReadLock { guard })
    }

    pub fn is_locked(&self) -> bool {
        self.source.try_lock().is_err()
    }

    /// Wait for any running window to release the lock, then close the device.
    pub async fn close(&self) {
        let mut source = self.source.lock().await;
        source.close().await;
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("label", &self.label)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Exclusive read access to a device for the length of one window.
///
/// Dropping the lock calls [`ByteSource::release`] and frees the handle for
/// the next window, whichever way the window ended.
pub struct ReadLock {
    guard: OwnedMutexGuard<Box<dyn ByteSource>>,
}

impl ReadLock {
    pub async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
        self.guard.read_chunk().await
    }
}

impl Drop for ReadLock {
    fn drop(&mut self) {
        self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ByteSource for CountingSource {
        async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
            Ok(ChunkEvent::Idle)
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = DeviceHandle::new(Box::new(CountingSource { releases: releases.clone() }), "test");

        let lock = handle.try_acquire();
        assert!(lock.is_some());
        assert!(handle.is_locked());
        assert!(handle.try_acquire().is_none());

        drop(lock);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!handle.is_locked());
        assert!(handle.try_acquire().is_some());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_open_io_error_classification() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(DeviceError::from_open_io("/dev/ttyUSB0", &err), DeviceError::PermissionDenied(p) if p == "/dev/ttyUSB0"));

        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(matches!(DeviceError::from_open_io("x", &err), DeviceError::NotFound(_)));

        let err = io::Error::new(io::ErrorKind::Other, "busy");
        assert!(matches!(DeviceError::from_open_io("x", &err), DeviceError::Open { .. }));
    }
}
