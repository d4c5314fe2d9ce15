//! Ingestion Pipeline Module
//!
//! ```text
//! DeviceSession::connect ──► MonitoringLoop
//!                               │ every cycle:
//!                               ├─ DeviceSession::start_reading (AcquisitionWindow)
//!                               ├─ Aggregator::average_window
//!                               └─ ReadingSink / NotificationSink
//! ```

mod state;
pub mod session;
pub mod sinks;
pub mod processing_loop;

pub use processing_loop::{MonitorOptions, MonitorStats, MonitoringLoop};
pub use session::{DeviceSession, SessionError};
pub use sinks::{JsonLinesSink, NotificationSink, ReadingSink, StatusSink, TracingSinks};
pub use state::ConnectionState;
