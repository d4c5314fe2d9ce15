//! Processing module - reduces acquisition windows to averaged readings

pub mod aggregator;

pub use aggregator::{average, safety_warnings, Aggregator, SafeBound, SafetyWarning, StatusBands};
