//! Reading Parser
//!
//! Turns one framed text line into a [`SensorReading`]. Sensor boards print
//! their values in one of three shapes:
//!
//! - JSON object: `{"ph": 7.12, "heavyMetal": 231}`
//! - CSV, one field per configured parameter: `7.12,231`
//! - Labeled text: `pH Value: 7.12 (Neutral)` / `TDS: 231 ppm`
//!
//! The matchers are tried in that order. The first one that recognises the
//! line's structure decides it, even if it then rejects a value as out of
//! range. Banner lines and chatter are filtered before any matcher runs.

use chrono::Utc;
use regex::Regex;
use thiserror::Error;

use crate::config::{ParameterSpec, ParserConfig, StationConfig};
use crate::types::{SensorReading, WireFormat};

/// Why a line did not produce a reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseReject {
    #[error("line too short ({len} chars)")]
    TooShort { len: usize },

    #[error("noise line (matched '{marker}')")]
    Noise { marker: String },

    #[error("{parameter} = {value} is outside the valid range")]
    OutOfRange { parameter: String, value: f64 },

    #[error("no known format matched")]
    Unrecognized,
}

/// Result of running a single format matcher over a line.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Structure not recognised, the next matcher gets the line.
    NoMatch,
    /// Structure recognised but the content is unusable.
    Rejected(ParseReject),
    Accepted(SensorReading),
}

const NUMBER: &str = r"[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?";

/// Labeled-format regex for one parameter.
#[derive(Debug)]
struct LabeledPattern {
    index: usize,
    regex: Regex,
}

/// Line parser for a fixed parameter set.
///
/// Holds only compiled patterns and settings; parsing never mutates it, so a
/// single parser is shared freely between windows.
#[derive(Debug)]
pub struct ReadingParser {
    parameters: Vec<ParameterSpec>,
    min_line_len: usize,
    /// Lower-cased markers paired with the configured spelling
    noise_markers: Vec<(String, String)>,
    labeled: Vec<LabeledPattern>,
}

impl ReadingParser {
    pub fn new(parameters: Vec<ParameterSpec>, config: &ParserConfig) -> Result<Self, regex::Error> {
        let labeled = parameters
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                Ok(LabeledPattern {
                    index,
                    regex: Regex::new(&labeled_pattern(spec))?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let noise_markers = config
            .noise_markers
            .iter()
            .filter(|m| !m.is_empty())
            .map(|m| (m.to_lowercase(), m.clone()))
            .collect();

        Ok(Self {
            parameters,
            min_line_len: config.min_line_len,
            noise_markers,
            labeled,
        })
    }

    /// Parser for the effective parameter set of a station config.
    pub fn from_config(config: &StationConfig) -> Result<Self, regex::Error> {
        Self::new(config.parameter_set(), &config.parser)
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Parse a line, dropping the reason for a rejection.
    pub fn parse(&self, line: &str) -> Option<SensorReading> {
        self.classify(line).ok()
    }

    /// Parse a line and report why it was rejected.
    pub fn classify(&self, line: &str) -> Result<SensorReading, ParseReject> {
        let line = line.trim();

        let len = line.chars().count();
        if len < self.min_line_len {
            return Err(ParseReject::TooShort { len });
        }

        let lowered = line.to_lowercase();
        if let Some((_, marker)) = self.noise_markers.iter().find(|(m, _)| lowered.contains(m.as_str())) {
            return Err(ParseReject::Noise { marker: marker.clone() });
        }

        for format in [WireFormat::Json, WireFormat::Csv, WireFormat::Labeled] {
            match self.match_format(format, line) {
                MatchOutcome::NoMatch => continue,
                MatchOutcome::Rejected(reason) => return Err(reason),
                MatchOutcome::Accepted(reading) => return Ok(reading),
            }
        }

        Err(ParseReject::Unrecognized)
    }

    /// Run a single matcher, bypassing the pre-filters.
    pub fn match_format(&self, format: WireFormat, line: &str) -> MatchOutcome {
        match format {
            WireFormat::Json => self.match_json(line),
            WireFormat::Csv => self.match_csv(line),
            WireFormat::Labeled => self.match_labeled(line),
        }
    }

    // ========================================================================
    // Matchers
    // ========================================================================

    fn match_json(&self, line: &str) -> MatchOutcome {
        if !line.starts_with('{') {
            return MatchOutcome::NoMatch;
        }
        let Ok(serde_json::Value::Object(object)) = serde_json::from_str::<serde_json::Value>(line) else {
            return MatchOutcome::NoMatch;
        };

        let mut values = vec![None; self.parameters.len()];
        for (index, spec) in self.parameters.iter().enumerate() {
            match object.get(&spec.key) {
                Some(raw) => match raw.as_f64() {
                    Some(v) => values[index] = Some(v),
                    None => return MatchOutcome::NoMatch,
                },
                None if spec.required => return MatchOutcome::NoMatch,
                None => {}
            }
        }

        if values.iter().all(Option::is_none) {
            return MatchOutcome::NoMatch;
        }
        self.finish(values, WireFormat::Json, None)
    }

    fn match_csv(&self, line: &str) -> MatchOutcome {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != self.parameters.len() {
            return MatchOutcome::NoMatch;
        }

        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            match field.parse::<f64>() {
                Ok(v) if v.is_finite() => values.push(Some(v)),
                _ => return MatchOutcome::NoMatch,
            }
        }
        self.finish(values, WireFormat::Csv, None)
    }

    fn match_labeled(&self, line: &str) -> MatchOutcome {
        let mut values = vec![None; self.parameters.len()];
        let mut qualifier = None;

        for pattern in &self.labeled {
            let Some(caps) = pattern.regex.captures(line) else {
                continue;
            };
            // A number the regex accepted can still overflow to infinity,
            // which the range check then rejects.
            let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
                continue;
            };
            values[pattern.index] = Some(value);

            if qualifier.is_none() {
                qualifier = caps
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|q| !q.is_empty());
            }
        }

        if values.iter().all(Option::is_none) {
            return MatchOutcome::NoMatch;
        }
        self.finish(values, WireFormat::Labeled, qualifier)
    }

    /// Range-check the values of a structurally matched line.
    fn finish(&self, values: Vec<Option<f64>>, format: WireFormat, qualifier: Option<String>) -> MatchOutcome {
        for (spec, value) in self.parameters.iter().zip(&values) {
            if let Some(v) = *value {
                if !spec.in_range(v) {
                    return MatchOutcome::Rejected(ParseReject::OutOfRange {
                        parameter: spec.key.clone(),
                        value: v,
                    });
                }
            }
        }

        MatchOutcome::Accepted(SensorReading {
            values,
            format,
            qualifier,
            received_at: Utc::now(),
        })
    }
}

/// Builds `label [:=] NUMBER [unit] [(qualifier)]` for one parameter.
///
/// Longer aliases come first so `pH Value` wins over `pH`. A parameter with no
/// aliases is matched by its key.
fn labeled_pattern(spec: &ParameterSpec) -> String {
    let mut aliases: Vec<&str> = spec.aliases.iter().map(String::as_str).filter(|a| !a.is_empty()).collect();
    if aliases.is_empty() {
        aliases.push(&spec.key);
    }
    aliases.sort_by_key(|a| std::cmp::Reverse(a.len()));

    let alternation = aliases
        .iter()
        .map(|a| regex::escape(a).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");

    format!(
        r"(?i)(?:^|[^A-Za-z0-9_])(?:{alternation})\s*[:=]?\s*({NUMBER})(?:\s*[A-Za-z/%°µ]+)?(?:\s*\(\s*([^)]*?)\s*\))?"
    )
}
