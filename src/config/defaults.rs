//! System-wide default constants.
//!
//! Centralises the magic numbers of the ingestion pipeline.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Config Discovery
// ============================================================================

/// Environment variable naming an explicit station config file.
pub const CONFIG_ENV_VAR: &str = "HYDROSENSE_CONFIG";

/// Config file looked up in the current working directory.
pub const LOCAL_CONFIG_FILE: &str = "station.toml";

// ============================================================================
// Serial Link
// ============================================================================

/// Baud rate used by the Arduino pH/TDS sketches.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Per-read timeout of the blocking serial port (ms).
///
/// Short enough that a silent device still yields control back to the
/// acquisition loop several times per second.
pub const SERIAL_READ_TIMEOUT_MS: u64 = 200;

// ============================================================================
// Acquisition Window
// ============================================================================

/// Duration of one acquisition window (seconds).
pub const WINDOW_SECS: u64 = 10;

/// Delay between consecutive windows in continuous mode (seconds).
pub const INTER_WINDOW_DELAY_SECS: u64 = 5;

/// Bytes requested from the device per read.
pub const CHUNK_SIZE: usize = 256;

/// Longest line the framer will buffer before discarding it.
pub const MAX_LINE_BYTES: usize = 4_096;

// ============================================================================
// Parser
// ============================================================================

/// Lines shorter than this are ignored.
pub const MIN_LINE_LEN: usize = 3;

/// Substrings of device boot banners and chatter that never carry data.
pub const NOISE_MARKERS: &[&str] = &["===", "Initializing", "Ready", "Calibrat"];

// ============================================================================
// Status Bands
// ============================================================================

/// pH at or below this is reported as acidic.
pub const STATUS_LOWER: f64 = 6.5;

/// pH above this is reported as alkaline.
pub const STATUS_UPPER: f64 = 7.5;

// ============================================================================
// Tooling
// ============================================================================

/// Default duration of the raw monitor subcommand (seconds).
pub const MONITOR_SECS: u64 = 15;

/// Interval between synthetic readings from the simulated device (ms).
pub const SIMULATED_LINE_INTERVAL_MS: u64 = 500;
