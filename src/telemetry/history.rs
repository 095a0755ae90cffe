//! Bounded buffers: reading history and the operator line log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::reading::Reading;

/// Readings kept before the oldest is evicted
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Lines kept in the operator log
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// FIFO reading history
///
/// Entries are write-once; when full, the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct History {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl History {
    /// Capacity is clamped to `1..=DEFAULT_HISTORY_CAPACITY`
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, DEFAULT_HISTORY_CAPACITY);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push_back(reading);
        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Oldest-first copy for observers
    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// One entry of the operator log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub id: u64,
    pub text: String,
    pub time: DateTime<Utc>,
}

/// Bounded log of every received line, ids increase monotonically
#[derive(Debug, Clone)]
pub struct LineLog {
    lines: VecDeque<LogLine>,
    capacity: usize,
    next_id: u64,
}

impl LineLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    pub fn append(&mut self, text: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.lines.push_back(LogLine {
            id,
            text: text.to_string(),
            time: Utc::now(),
        });
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        id
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for LineLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
