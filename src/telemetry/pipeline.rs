//! Turns decoded lines into readings and derived values.

use tracing::{debug, warn};

use super::frame::{parse_reply, parse_sample, ReplyFields, Sample};
use super::history::{History, LineLog, DEFAULT_HISTORY_CAPACITY, DEFAULT_LOG_CAPACITY};
use super::reading::Reading;
use crate::formula::{Formula, FormulaError, Variables};
use crate::protocol::decoder::verify_checksum;

/// How a line was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Sample,
    Reply,
    Opaque,
}

/// Result of ingesting one line
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub kind: LineKind,
    pub checksum_ok: bool,
    /// Reading appended to the history, if any
    pub reading: Option<Reading>,
}

/// Most recent values reported by the device
///
/// Only checksum-valid lines update these.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatestValues {
    pub sequence: Option<u64>,
    pub temperature_c: Option<f64>,
    pub moisture_raw: Option<i64>,
    pub rate_s: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TelemetryPipeline {
    history: History,
    log: LineLog,
    latest: LatestValues,
    previous_raw: Option<f64>,
}

impl TelemetryPipeline {
    pub fn new(history_capacity: usize, log_capacity: usize) -> Self {
        Self {
            history: History::new(history_capacity),
            log: LineLog::new(log_capacity),
            latest: LatestValues::default(),
            previous_raw: None,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn log(&self) -> &LineLog {
        &self.log
    }

    pub fn latest(&self) -> &LatestValues {
        &self.latest
    }

    pub fn latest_temperature(&self) -> Option<f64> {
        self.latest.temperature_c
    }

    /// Raw value the next derivation uses as `xp`
    pub fn previous_raw(&self) -> Option<f64> {
        self.previous_raw
    }

    /// Classify one line, update derived state and append to the history
    pub fn ingest(&mut self, line: &str) -> Ingested {
        self.log.append(line);
        let (payload, checksum_ok) = verify_checksum(line);

        if let Some(sample) = parse_sample(payload) {
            if !checksum_ok {
                warn!("Checksum mismatch on sample: {}", line);
            }
            let reading = self.record_sample(&sample, checksum_ok, line);
            return Ingested {
                kind: LineKind::Sample,
                checksum_ok,
                reading: Some(reading),
            };
        }

        if let Some(fields) = parse_reply(payload) {
            if !checksum_ok {
                warn!("Checksum mismatch on reply: {}", line);
            }
            let reading = self.record_reply(&fields, checksum_ok, line);
            return Ingested {
                kind: LineKind::Reply,
                checksum_ok,
                reading,
            };
        }

        debug!("Opaque line: {}", line);
        let reading = Reading::opaque(line);
        self.history.push(reading.clone());
        Ingested {
            kind: LineKind::Opaque,
            checksum_ok: true,
            reading: Some(reading),
        }
    }

    fn record_sample(&mut self, sample: &Sample, checksum_ok: bool, line: &str) -> Reading {
        if checksum_ok {
            self.latest.sequence = Some(sample.sequence);
            self.latest.temperature_c = Some(sample.temperature_c);
            self.latest.moisture_raw = Some(sample.moisture_raw);
        }

        let reading = Reading::sample(
            sample.sequence,
            sample.temperature_c,
            sample.moisture_raw,
            checksum_ok,
            line,
        );
        self.history.push(reading.clone());
        reading
    }

    fn record_reply(&mut self, fields: &ReplyFields, checksum_ok: bool, line: &str) -> Option<Reading> {
        if checksum_ok {
            if let Some(sequence) = fields.sequence {
                self.latest.sequence = Some(sequence);
            }
            if let Some(temperature_c) = fields.temperature_c {
                self.latest.temperature_c = Some(temperature_c);
            }
            if let Some(moisture_raw) = fields.moisture_raw {
                self.latest.moisture_raw = Some(moisture_raw);
            }
            if let Some(rate_s) = fields.rate_s {
                debug!("Device sample interval is {}s", rate_s);
                self.latest.rate_s = Some(rate_s);
            }
        }

        let sample = fields.sample()?;
        let reading = Reading::sample(
            sample.sequence,
            sample.temperature_c,
            sample.moisture_raw,
            checksum_ok,
            line,
        );
        self.history.push(reading.clone());
        Some(reading)
    }

    /// Apply a formula to a raw value
    ///
    /// Binds `x = raw`, `xp` = the previous successfully derived raw value
    /// (or `raw` on the first call) and `dx = x - xp`. The previous value
    /// only advances when evaluation succeeds.
    ///
    /// # Errors
    ///
    /// Returns the formula fault; derived state is left untouched.
    pub fn compute_derived(&mut self, raw: f64, formula: &str) -> Result<f64, FormulaError> {
        let xp = self.previous_raw.unwrap_or(raw);
        let value = Formula::parse(formula)?.evaluate(&Variables::new(raw, xp))?;
        self.previous_raw = Some(raw);
        Ok(value)
    }

    /// Apply a formula to the latest checksum-valid raw moisture
    pub fn derive_latest(&mut self, formula: &str) -> Option<Result<f64, FormulaError>> {
        let raw = self.latest.moisture_raw? as f64;
        Some(self.compute_derived(raw, formula))
    }
}

impl Default for TelemetryPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_LOG_CAPACITY)
    }
}
