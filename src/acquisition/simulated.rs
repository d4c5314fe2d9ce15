//! Simulated pH/TDS sensor board.
//!
//! Produces the same labeled text an Arduino sketch prints, including the
//! boot banner, so the whole ingestion path can run without hardware.
//! Lines are occasionally split across two chunks to mimic USB packetisation.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::info;

use super::device::{ByteSource, ChunkEvent, DeviceError, DeviceTransport};
use crate::config::defaults::{SIMULATED_LINE_INTERVAL_MS, STATUS_LOWER, STATUS_UPPER};
use crate::config::SerialSettings;

const BANNER: &[&str] = &["=== HydroSense Simulator ===", "Initializing sensors...", "Ready"];

/// Drift bounds of the simulated readings.
const PH_RANGE: (f64, f64) = (6.5, 8.5);
const TDS_RANGE: (f64, f64) = (150.0, 350.0);

/// Opens a synthetic sensor stream.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    interval: Duration,
    seed: Option<u64>,
    /// Stop after this many measurement lines (`None` = endless)
    line_limit: Option<usize>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(SIMULATED_LINE_INTERVAL_MS),
            seed: None,
            line_limit: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_line_limit(mut self, limit: usize) -> Self {
        self.line_limit = Some(limit);
        self
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    async fn open(&self, _settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError> {
        let rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        info!(interval_ms = self.interval.as_millis() as u64, "Simulated sensor opened");
        Ok(Box::new(SimulatedSource {
            rng,
            interval: self.interval,
            line_limit: self.line_limit,
            lines_sent: 0,
            banner_sent: false,
            ph: (PH_RANGE.0 + PH_RANGE.1) / 2.0,
            tds: (TDS_RANGE.0 + TDS_RANGE.1) / 2.0,
            next_is_ph: true,
            pending: Vec::new(),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

struct SimulatedSource {
    rng: StdRng,
    interval: Duration,
    line_limit: Option<usize>,
    lines_sent: usize,
    banner_sent: bool,
    ph: f64,
    tds: f64,
    next_is_ph: bool,
    /// Second half of a line split across chunks
    pending: Vec<u8>,
    closed: bool,
}

impl SimulatedSource {
    fn noise(&mut self, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * sigma
    }

    fn next_line(&mut self) -> String {
        if self.next_is_ph {
            self.ph = (self.ph + self.noise(0.08)).clamp(PH_RANGE.0, PH_RANGE.1);
            self.next_is_ph = false;
            let label = if self.ph <= STATUS_LOWER {
                "Acidic"
            } else if self.ph <= STATUS_UPPER {
                "Neutral"
            } else {
                "Alkaline"
            };
            format!("pH Value: {:.2} ({label})\r\n", self.ph)
        } else {
            self.tds = (self.tds + self.noise(6.0)).clamp(TDS_RANGE.0, TDS_RANGE.1);
            self.next_is_ph = true;
            format!("TDS: {:.0} ppm\r\n", self.tds)
        }
    }
}

#[async_trait]
impl ByteSource for SimulatedSource {
    async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
        if self.closed {
            return Ok(ChunkEvent::Eof);
        }
        if !self.pending.is_empty() {
            return Ok(ChunkEvent::Data(std::mem::take(&mut self.pending)));
        }
        if !self.banner_sent {
            self.banner_sent = true;
            let banner: String = BANNER.iter().map(|l| format!("{l}\r\n")).collect();
            return Ok(ChunkEvent::Data(banner.into_bytes()));
        }
        if self.line_limit.is_some_and(|limit| self.lines_sent >= limit) {
            return Ok(ChunkEvent::Eof);
        }

        tokio::time::sleep(self.interval).await;

        let mut bytes = self.next_line().into_bytes();
        self.lines_sent += 1;
        if self.rng.gen_bool(0.25) {
            let cut = self.rng.gen_range(1..bytes.len());
            self.pending = bytes.split_off(cut);
        }
        Ok(ChunkEvent::Data(bytes))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
