//! Station Configuration Module
//!
//! Per-station configuration loaded from TOML files: serial link settings,
//! acquisition window timing, parser filters, the measured parameter set and
//! the status bands.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `HYDROSENSE_CONFIG` environment variable (path to TOML file)
//! 3. `station.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The loaded value is passed explicitly to the session and the monitoring
//! loop; there is no process-wide config singleton.

mod station_config;
pub mod defaults;
pub mod validation;

pub use station_config::*;
