//! Sample pivot aggregation
//!
//! Turns the raw text of one batch (one JSON object per line, one metric per
//! object) into one [`ConsolidatedRecord`] per distinct timestamp.
//!
//! Merge rules:
//! - metric key is `chart_id + "." + id`, a later line overwrites an earlier
//!   one with the same key
//! - `host` follows the last line seen for the timestamp, lowercased
//! - unparseable lines and objects missing required fields are dropped
//! - a valid JSON value that is not an object means the batch is out of
//!   sync: pivoting stops and the records built so far are returned

use crate::{ConsolidatedRecord, RawLine, Timestamp};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of pivoting one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotReport {
    /// One record per distinct timestamp, ordered by timestamp
    pub records: Vec<ConsolidatedRecord>,
    /// Lines dropped as unparseable or incomplete
    pub malformed: usize,
    /// 1-based line number of the non-object value that stopped pivoting
    pub desync: Option<usize>,
    /// Non-empty lines left unpivoted because of the desync, including it
    pub abandoned: usize,
}

impl PivotReport {
    /// Total metric values across all records
    pub fn metric_count(&self) -> usize {
        self.records.iter().map(|r| r.metrics.len()).sum()
    }

    /// Lines that did not make it into any record
    pub fn discarded(&self) -> usize {
        self.malformed + self.abandoned
    }
}

/// Pivot a batch into consolidated records
pub fn pivot(raw: &str) -> Vec<ConsolidatedRecord> {
    pivot_report(raw).records
}

/// Pivot a batch, also reporting discarded lines
pub fn pivot_report(raw: &str) -> PivotReport {
    let mut by_timestamp: BTreeMap<Timestamp, ConsolidatedRecord> = BTreeMap::new();
    let mut malformed = 0;
    let mut desync = None;
    let mut abandoned = 0;
    let mut lines = raw.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw_line = match parse_line(line) {
            Ok(raw_line) => raw_line,
            Err(LineError::NotAnObject) => {
                debug!(line = idx + 1, "non-object JSON value, abandoning rest of batch");
                desync = Some(idx + 1);
                abandoned = 1 + lines
                    .by_ref()
                    .filter(|(_, rest)| !rest.trim().is_empty())
                    .count();
                break;
            }
            Err(LineError::Malformed(reason)) => {
                debug!(line = idx + 1, %reason, "discarding malformed line");
                malformed += 1;
                continue;
            }
        };

        by_timestamp
            .entry(raw_line.timestamp)
            .or_insert_with(|| ConsolidatedRecord::new(raw_line.timestamp, ""))
            .merge(raw_line);
    }

    PivotReport {
        records: by_timestamp.into_values().collect(),
        malformed,
        desync,
        abandoned,
    }
}

enum LineError {
    NotAnObject,
    Malformed(String),
}

fn parse_line(line: &str) -> Result<RawLine, LineError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| LineError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(LineError::NotAnObject);
    }

    let raw_line: RawLine =
        serde_json::from_value(value).map_err(|e| LineError::Malformed(e.to_string()))?;

    if !raw_line.has_valid_value() {
        return Err(LineError::Malformed(format!(
            "value of {} is neither a number nor null",
            raw_line.metric_name()
        )));
    }

    Ok(raw_line)
}
