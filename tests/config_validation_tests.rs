//! Config Validation Tests
//!
//! Typo detection on raw TOML, semantic validation of `StationConfig`, and
//! loading from files on disk. These exercise the config layer independently
//! from the rest of the pipeline.

use std::io::Write;

use hydrosense::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use hydrosense::config::{ConfigError, ParameterSpec, StationConfig};

fn validation_errors(config: &StationConfig) -> Vec<String> {
    match config.validate() {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation errors, got {other:?}"),
    }
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_baud_rate_warns_with_suggestion() {
    let toml_str = r#"
[serial]
baud_rat = 9600
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("baud_rat"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("serial.baud_rate"));
}

#[test]
fn typo_in_parameter_table_warns() {
    let toml_str = r#"
[[parameters]]
key = "ph"
min = 0.0
max = 14.0
alises = ["pH"]
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "parameters.alises");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("parameters.aliases"));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
preset = "multi"

[station]
name = "RIVER-01"
location = "North intake"

[serial]
port = "/dev/ttyUSB0"
baud_rate = 115200

[acquisition]
window_secs = 10
inter_window_delay_secs = 5

[status]
parameter = "ph"
lower = 6.5
upper = 7.5
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "Unexpected warnings: {warnings:?}");
}

#[test]
fn unknown_section_warns() {
    let warnings = validate_unknown_keys("[dashboard]\nport = 8080\n");
    assert!(warnings.iter().any(|w| w.field == "dashboard"));
}

#[test]
fn suggest_correction_returns_none_for_garbage() {
    let known = known_config_keys();
    assert!(suggest_correction("zzzzzzzzzzzzzzzz", &known).is_none());
}

#[test]
fn unknown_keys_never_fail_parsing() {
    let config = StationConfig::from_toml_str("[serial]\nbaud_rat = 1\n").unwrap();
    assert_eq!(config.serial.baud_rate, 9600);
}

// ============================================================================
// Semantic Validation
// ============================================================================

#[test]
fn all_defaults_pass_validation() {
    assert!(StationConfig::default().validate().is_ok());
}

#[test]
fn inverted_status_thresholds_are_rejected() {
    let mut config = StationConfig::default();
    config.status.lower = 8.0;
    config.status.upper = 6.0;
    let errors = validation_errors(&config);
    assert!(errors.iter().any(|e| e.contains("status.lower")));
}

#[test]
fn equal_status_thresholds_are_allowed() {
    let mut config = StationConfig::default();
    config.status.lower = 7.0;
    config.status.upper = 7.0;
    assert!(config.validate().is_ok());
}

#[test]
fn status_parameter_must_exist() {
    let mut config = StationConfig::default();
    config.status.parameter = "turbidity".to_string();
    let errors = validation_errors(&config);
    assert!(errors.iter().any(|e| e.contains("'turbidity' is not a configured parameter")));
}

#[test]
fn duplicate_and_inverted_parameters_all_reported() {
    let mut config = StationConfig::default();
    config.parameters = vec![
        ParameterSpec::new("ph", "pH", "", 0.0, 14.0),
        ParameterSpec::new("ph", "pH again", "", 0.0, 14.0),
        ParameterSpec::new("turbidity", "Turbidity", "NTU", 100.0, 10.0),
    ];
    let errors = validation_errors(&config);
    assert!(errors.iter().any(|e| e.contains("duplicate key")));
    assert!(errors.iter().any(|e| e.contains("parameters.turbidity")));
}

#[test]
fn zero_window_and_bad_serial_framing_are_rejected() {
    let mut config = StationConfig::default();
    config.acquisition.window_secs = 0;
    config.serial.data_bits = 9;
    config.serial.stop_bits = 3;
    let errors = validation_errors(&config);
    assert_eq!(errors.len(), 3, "{errors:?}");
}

// ============================================================================
// Loading From Disk
// ============================================================================

#[test]
fn load_from_file_reads_station_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[station]
name = "LAKE-02"

[serial]
port = "COM3"

[acquisition]
window_secs = 30
max_readings_per_window = 50
"#
    )
    .unwrap();

    let config = StationConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.station.name, "LAKE-02");
    assert_eq!(config.serial.port, "COM3");
    assert_eq!(config.acquisition.window_secs, 30);
    assert_eq!(config.acquisition.max_readings_per_window, Some(50));
    assert_eq!(config.parameter_set().len(), 2);
}

#[test]
fn load_from_file_reports_path_on_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[serial\nport = ").unwrap();

    let err = StationConfig::load_from_file(file.path()).unwrap_err();
    match err {
        ConfigError::Parse(path, _) => assert_eq!(path, file.path()),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = StationConfig::load_from_file(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

#[test]
fn config_roundtrip_preserves_values() {
    let mut config = StationConfig::default();
    config.station.name = "WELL-07".to_string();
    config.acquisition.window_secs = 20;
    config.status.upper = 7.8;

    let toml_str = config.to_toml().unwrap();
    let parsed = StationConfig::from_toml_str(&toml_str).unwrap();
    assert_eq!(parsed.station.name, "WELL-07");
    assert_eq!(parsed.acquisition.window_secs, 20);
    assert!((parsed.status.upper - 7.8).abs() < f64::EPSILON);
}
