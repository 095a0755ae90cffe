//! # Telemetry Module
//!
//! Turns decoded device lines into typed readings.
//!
//! This module handles:
//! - Classifying lines as samples, command replies or opaque text
//! - Keeping a bounded reading history and an operator line log
//! - Tracking the latest checksum-valid values
//! - Applying the operator's formula to raw moisture
//! - Recording readings to rotating JSONL files

pub mod frame;
pub mod history;
pub mod pipeline;
pub mod reading;
pub mod recorder;

pub use history::{History, LineLog, LogLine, DEFAULT_HISTORY_CAPACITY, DEFAULT_LOG_CAPACITY};
pub use pipeline::{Ingested, LatestValues, LineKind, TelemetryPipeline};
pub use reading::Reading;
pub use recorder::Recorder;
