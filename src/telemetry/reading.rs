//! Typed readings produced from device lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested line, typed where possible
///
/// Structured samples carry all three measurements. Opaque lines keep only
/// the raw text, for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub captured_at: DateTime<Utc>,
    pub sequence: Option<u64>,
    pub temperature_c: Option<f64>,
    pub moisture_raw: Option<i64>,
    pub checksum_ok: bool,
    pub raw_line: String,
}

impl Reading {
    pub fn sample(
        sequence: u64,
        temperature_c: f64,
        moisture_raw: i64,
        checksum_ok: bool,
        raw_line: &str,
    ) -> Self {
        Self {
            captured_at: Utc::now(),
            sequence: Some(sequence),
            temperature_c: Some(temperature_c),
            moisture_raw: Some(moisture_raw),
            checksum_ok,
            raw_line: raw_line.to_string(),
        }
    }

    pub fn opaque(raw_line: &str) -> Self {
        Self {
            captured_at: Utc::now(),
            sequence: None,
            temperature_c: None,
            moisture_raw: None,
            checksum_ok: true,
            raw_line: raw_line.to_string(),
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.sequence.is_none() && self.temperature_c.is_none() && self.moisture_raw.is_none()
    }
}
