//! Linux telemetry agent: samples OS counters on an interval and emits
//! tagged metric records.

pub mod collectors;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod record;
