//! Station Configuration - serial link, acquisition timing, parser and
//! parameter definitions as operator-tunable TOML values.
//!
//! Each struct implements `Default` with values matching the Arduino
//! pH/TDS setup, so an absent config file gives a working pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitoring station.
///
/// Load with [`StationConfig::load()`] which searches:
/// 1. `$HYDROSENSE_CONFIG` env var
/// 2. `./station.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    /// Built-in parameter set, used when `parameters` is empty
    #[serde(default)]
    pub preset: ParameterPreset,

    /// Station identification
    #[serde(default)]
    pub station: StationInfo,

    /// Serial port settings
    #[serde(default)]
    pub serial: SerialSettings,

    /// Acquisition window timing
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Line filtering
    #[serde(default)]
    pub parser: ParserConfig,

    /// Status band derivation
    #[serde(default)]
    pub status: StatusConfig,

    /// Explicit parameter definitions (overrides `preset`)
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl StationConfig {
    /// Load configuration using the standard search order:
    /// 1. `$HYDROSENSE_CONFIG` environment variable
    /// 2. `./station.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), station = %config.station.name, "Loaded station config from HYDROSENSE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from HYDROSENSE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "HYDROSENSE_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(station = %config.station.name, "Loaded station config from ./station.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./station.toml, using defaults");
                }
            }
        }

        info!("No station.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are reported as warnings only.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// The effective parameter list: explicit `[[parameters]]` or the preset.
    pub fn parameter_set(&self) -> Vec<ParameterSpec> {
        if self.parameters.is_empty() {
            self.preset.parameters()
        } else {
            self.parameters.clone()
        }
    }

    /// Validate the whole config, collecting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let parameters = self.parameter_set();

        if parameters.is_empty() {
            errors.push("parameters: at least one parameter must be defined".to_string());
        }

        let mut seen = HashSet::new();
        for p in &parameters {
            if p.key.trim().is_empty() {
                errors.push("parameters: key must not be empty".to_string());
                continue;
            }
            if !seen.insert(p.key.as_str()) {
                errors.push(format!("parameters.{}: duplicate key", p.key));
            }
            Self::check_range(p.min, p.max, &format!("parameters.{}", p.key), &mut errors);
            if let Some(safe_min) = p.safe_min {
                if !safe_min.is_finite() || safe_min < p.min || safe_min > p.max {
                    errors.push(format!(
                        "parameters.{}: safe_min ({safe_min}) must lie within [{}, {}]",
                        p.key, p.min, p.max
                    ));
                }
            }
            if let Some(safe_max) = p.safe_max {
                if !safe_max.is_finite() || safe_max < p.min || safe_max > p.max {
                    errors.push(format!(
                        "parameters.{}: safe_max ({safe_max}) must lie within [{}, {}]",
                        p.key, p.min, p.max
                    ));
                }
            }
        }

        let s = &self.status;
        if !parameters.iter().any(|p| p.key == s.parameter) {
            errors.push(format!(
                "status.parameter '{}' is not a configured parameter",
                s.parameter
            ));
        }
        if !s.lower.is_finite() || !s.upper.is_finite() {
            errors.push(format!(
                "status: thresholds must be finite (got lower={}, upper={})",
                s.lower, s.upper
            ));
        } else if s.lower > s.upper {
            errors.push(format!(
                "status.lower ({:.2}) must be <= status.upper ({:.2})",
                s.lower, s.upper
            ));
        }

        let a = &self.acquisition;
        if a.window_secs == 0 {
            errors.push("acquisition.window_secs must be > 0".to_string());
        }
        if a.chunk_size == 0 {
            errors.push("acquisition.chunk_size must be > 0".to_string());
        }
        if a.max_line_bytes == 0 {
            errors.push("acquisition.max_line_bytes must be > 0".to_string());
        }
        if a.max_readings_per_window == Some(0) {
            errors.push("acquisition.max_readings_per_window must be > 0 when set".to_string());
        }

        let serial = &self.serial;
        if serial.baud_rate == 0 {
            errors.push("serial.baud_rate must be > 0".to_string());
        }
        if !(5..=8).contains(&serial.data_bits) {
            errors.push(format!("serial.data_bits = {} must be 5-8", serial.data_bits));
        }
        if !(1..=2).contains(&serial.stop_bits) {
            errors.push(format!("serial.stop_bits = {} must be 1 or 2", serial.stop_bits));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_range(min: f64, max: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, catch them explicitly
        if !min.is_finite() || !max.is_finite() {
            errors.push(format!("{name}: range must be finite (got min={min}, max={max})"));
            return;
        }
        if min >= max {
            errors.push(format!("{name}: min ({min}) must be < max ({max})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Station Info
// ============================================================================

/// Identification metadata, shown in logs and attached to averaged readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationInfo {
    #[serde(default = "default_station_name")]
    pub name: String,

    /// Sampling location (river, tank, well)
    #[serde(default)]
    pub location: String,
}

fn default_station_name() -> String {
    "DEFAULT".to_string()
}

impl Default for StationInfo {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            location: String::new(),
        }
    }
}

// ============================================================================
// Serial Settings
// ============================================================================

/// Parity bit setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// How to open the sensor's serial device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`. Empty means "pick the
    /// first USB serial port found".
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default)]
    pub flow_control: FlowControl,

    /// Blocking read timeout (ms). A timeout is not an error, it just hands
    /// control back to the acquisition loop.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 { defaults::DEFAULT_BAUD_RATE }
fn default_data_bits() -> u8 { 8 }
fn default_stop_bits() -> u8 { 1 }
fn default_read_timeout_ms() -> u64 { defaults::SERIAL_READ_TIMEOUT_MS }

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

// ============================================================================
// Acquisition Config
// ============================================================================

/// Acquisition window timing and buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Length of one collection window (seconds).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Pause between windows in continuous mode (seconds).
    #[serde(default = "default_inter_window_delay_secs")]
    pub inter_window_delay_secs: u64,

    /// Stop a window early once this many readings were accepted.
    #[serde(default)]
    pub max_readings_per_window: Option<usize>,

    /// Bytes requested per device read.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Longest unterminated line kept by the framer.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_window_secs() -> u64 { defaults::WINDOW_SECS }
fn default_inter_window_delay_secs() -> u64 { defaults::INTER_WINDOW_DELAY_SECS }
fn default_chunk_size() -> usize { defaults::CHUNK_SIZE }
fn default_max_line_bytes() -> usize { defaults::MAX_LINE_BYTES }

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            inter_window_delay_secs: default_inter_window_delay_secs(),
            max_readings_per_window: None,
            chunk_size: default_chunk_size(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

// ============================================================================
// Parser Config
// ============================================================================

/// Line pre-filters applied before any format matcher runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_min_line_len")]
    pub min_line_len: usize,

    /// Case-insensitive substrings marking banner/noise lines.
    #[serde(default = "default_noise_markers")]
    pub noise_markers: Vec<String>,
}

fn default_min_line_len() -> usize { defaults::MIN_LINE_LEN }
fn default_noise_markers() -> Vec<String> {
    defaults::NOISE_MARKERS.iter().map(|s| (*s).to_string()).collect()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_line_len: default_min_line_len(),
            noise_markers: default_noise_markers(),
        }
    }
}

// ============================================================================
// Status Config
// ============================================================================

/// Thresholds turning the primary parameter into a qualitative band.
///
/// `value <= lower` is the low band, `lower < value <= upper` the mid band,
/// anything above `upper` the high band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_parameter")]
    pub parameter: String,

    #[serde(default = "default_status_lower")]
    pub lower: f64,

    #[serde(default = "default_status_upper")]
    pub upper: f64,

    #[serde(default = "default_low_label")]
    pub low_label: String,

    #[serde(default = "default_mid_label")]
    pub mid_label: String,

    #[serde(default = "default_high_label")]
    pub high_label: String,
}

fn default_status_parameter() -> String { "ph".to_string() }
fn default_status_lower() -> f64 { defaults::STATUS_LOWER }
fn default_status_upper() -> f64 { defaults::STATUS_UPPER }
fn default_low_label() -> String { "Acidic".to_string() }
fn default_mid_label() -> String { "Neutral".to_string() }
fn default_high_label() -> String { "Alkaline".to_string() }

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            parameter: default_status_parameter(),
            lower: default_status_lower(),
            upper: default_status_upper(),
            low_label: default_low_label(),
            mid_label: default_mid_label(),
            high_label: default_high_label(),
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// One measured quantity reported by the sensor board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// JSON key and stable identifier (`ph`, `heavyMetal`, ...)
    pub key: String,

    /// Human-readable name
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub unit: String,

    /// Absolute physical range; values outside it are discarded.
    pub min: f64,
    pub max: f64,

    /// Safe range; averages outside it raise a warning.
    #[serde(default)]
    pub safe_min: Option<f64>,
    #[serde(default)]
    pub safe_max: Option<f64>,

    /// JSON lines must carry this key to be accepted.
    #[serde(default)]
    pub required: bool,

    /// Labels recognised in `Label: value` lines, tried in order.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ParameterSpec {
    pub fn new(key: &str, label: &str, unit: &str, min: f64, max: f64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            min,
            max,
            safe_min: None,
            safe_max: None,
            required: false,
            aliases: Vec::new(),
        }
    }

    pub fn safe(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.safe_min = min;
        self.safe_max = max;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Whether `value` is finite and inside the absolute range.
    pub fn in_range(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Built-in parameter sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterPreset {
    /// pH + TDS board (two CSV fields)
    #[default]
    Simple,
    /// Seven-parameter lab board
    Multi,
}

impl ParameterPreset {
    pub fn parameters(self) -> Vec<ParameterSpec> {
        match self {
            ParameterPreset::Simple => simple_parameters(),
            ParameterPreset::Multi => multi_parameters(),
        }
    }
}

fn ph_parameter() -> ParameterSpec {
    ParameterSpec::new("ph", "pH", "", 0.0, 14.0)
        .safe(Some(6.5), Some(8.5))
        .required()
        .aliases(&["pH Value", "pH"])
}

/// pH and TDS (reported as heavy metal, ppm).
pub fn simple_parameters() -> Vec<ParameterSpec> {
    vec![
        ph_parameter(),
        ParameterSpec::new("heavyMetal", "Heavy Metal (TDS)", "ppm", 0.0, 10_000.0)
            .safe(None, Some(500.0))
            .aliases(&["TDS", "Heavy Metal"]),
    ]
}

/// The full lab parameter set.
pub fn multi_parameters() -> Vec<ParameterSpec> {
    vec![
        ph_parameter(),
        ParameterSpec::new("hydrogenSulfide", "Hydrogen Sulfide", "mg/L", 0.0, 100.0)
            .aliases(&["Hydrogen Sulfide", "H2S"]),
        ParameterSpec::new("turbidity", "Turbidity", "NTU", 0.0, 4_000.0)
            .aliases(&["Turbidity", "NTU"]),
        ParameterSpec::new("nitrogen", "Nitrogen", "mg/L", 0.0, 500.0)
            .aliases(&["Nitrogen", "N"]),
        ParameterSpec::new("copper", "Copper", "mg/L", 0.0, 100.0)
            .aliases(&["Copper", "Cu"]),
        ParameterSpec::new("dissolvedOxygen", "Dissolved Oxygen", "mg/L", 0.0, 50.0)
            .aliases(&["Dissolved Oxygen", "DO"]),
        ParameterSpec::new("temperature", "Temperature", "°C", -10.0, 100.0)
            .aliases(&["Temperature", "Temp"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = StationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.parameter_set().len(), 2);
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn test_multi_preset_has_seven_fields() {
        let config: StationConfig = toml::from_str("preset = \"multi\"").unwrap();
        assert_eq!(config.parameter_set().len(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_parameters_override_preset() {
        let toml_str = r#"
preset = "multi"

[[parameters]]
key = "ph"
min = 0.0
max = 14.0
required = true
aliases = ["pH"]
"#;
        let config = StationConfig::from_toml_str(toml_str).unwrap();
        let params = config.parameter_set();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].key, "ph");
    }

    #[test]
    fn test_status_parameter_must_exist() {
        let mut config = StationConfig::default();
        config.status.parameter = "salinity".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("salinity"));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut config = StationConfig::default();
        config.parameters = simple_parameters();
        config.parameters[1].min = 50.0;
        config.parameters[1].max = 10.0;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.contains("heavyMetal")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_toml_roundtrip_keeps_serial_settings() {
        let mut config = StationConfig::default();
        config.serial.port = "/dev/ttyACM0".to_string();
        config.serial.parity = Parity::Even;
        let text = config.to_toml().unwrap();
        let back = StationConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.serial.port, "/dev/ttyACM0");
        assert_eq!(back.serial.parity, Parity::Even);
    }

    #[test]
    fn test_in_range_rejects_nan() {
        let ph = ph_parameter();
        assert!(ph.in_range(7.0));
        assert!(ph.in_range(0.0));
        assert!(ph.in_range(14.0));
        assert!(!ph.in_range(14.01));
        assert!(!ph.in_range(f64::NAN));
    }
}
