//! Replay transport: stdin or a captured serial log.
//!
//! Used with captures recorded by `hydrosense monitor` or piped from another
//! process: `cat capture.log | hydrosense run --stdin`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use super::device::{ByteSource, ChunkEvent, DeviceError, DeviceTransport};
use crate::config::SerialSettings;

/// Where replayed bytes come from.
#[derive(Debug, Clone)]
pub enum ReplayInput {
    Stdin,
    File(PathBuf),
}

/// Opens a replay stream instead of hardware. Serial settings are ignored.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    input: ReplayInput,
    chunk_size: usize,
    pacing: Option<Duration>,
}

impl ReplayTransport {
    pub fn stdin(chunk_size: usize) -> Self {
        Self {
            input: ReplayInput::Stdin,
            chunk_size,
            pacing: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            input: ReplayInput::File(path.into()),
            chunk_size,
            pacing: None,
        }
    }

    /// Delay between chunks, so a file replays at roughly device speed
    /// instead of filling one window at once.
    pub fn with_pacing(mut self, delay: Duration) -> Self {
        self.pacing = (!delay.is_zero()).then_some(delay);
        self
    }
}

#[async_trait]
impl DeviceTransport for ReplayTransport {
    async fn open(&self, _settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError> {
        match &self.input {
            ReplayInput::Stdin => {
                info!("Replaying sensor stream from stdin");
                Ok(Box::new(
                    ReaderSource::new(tokio::io::stdin(), self.chunk_size).with_pacing(self.pacing),
                ))
            }
            ReplayInput::File(path) => {
                let label = path.display().to_string();
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| DeviceError::from_open_io(&label, &e))?;
                info!(path = %label, "Replaying sensor stream from file");
                Ok(Box::new(ReaderSource::new(file, self.chunk_size).with_pacing(self.pacing)))
            }
        }
    }

    fn name(&self) -> &str {
        match self.input {
            ReplayInput::Stdin => "stdin",
            ReplayInput::File(_) => "replay",
        }
    }
}

/// Byte source over any async reader.
pub struct ReaderSource<R> {
    reader: Option<R>,
    buf: Vec<u8>,
    pacing: Option<Duration>,
    yielded_first: bool,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            buf: vec![0u8; chunk_size.max(1)],
            pacing: None,
            yielded_first: false,
        }
    }

    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for ReaderSource<R> {
    async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
        // No delay before the first chunk
        if let Some(delay) = self.pacing.filter(|_| self.yielded_first) {
            tokio::time::sleep(delay).await;
        }

        let Some(reader) = self.reader.as_mut() else {
            return Ok(ChunkEvent::Eof);
        };
        let n = reader.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(ChunkEvent::Eof);
        }
        self.yielded_first = true;
        Ok(ChunkEvent::Data(self.buf[..n].to_vec()))
    }

    async fn close(&mut self) {
        self.reader = None;
    }
}
