//! HydroSense: water-quality sensor ingestion
//!
//! Turns the byte stream of a serial sensor device into averaged,
//! status-labelled water-quality readings.
//!
//! ## Architecture
//!
//! - **Acquisition**: device transports (serial, replay, simulator), line
//!   framing, multi-format reading parser, bounded acquisition windows
//! - **Processing**: per-window averaging, status bands, safety warnings
//! - **Pipeline**: connection lifecycle (`DeviceSession`), the monitoring
//!   loop and the output sinks
//! - **Config**: per-station TOML configuration

pub mod config;
pub mod types;
pub mod acquisition;
pub mod processing;
pub mod pipeline;

// Re-export station configuration
pub use config::StationConfig;

// Re-export commonly used types
pub use types::{AveragedReading, NotifyLevel, ParameterStats, SensorReading, Status, StatusBand, WireFormat};

// Re-export the pipeline entry points
pub use pipeline::{DeviceSession, MonitoringLoop, SessionError};
