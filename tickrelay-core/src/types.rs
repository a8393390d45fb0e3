//! Core types for tickrelay

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp in seconds since Unix epoch, as sent by the agent
pub type Timestamp = i64;

/// Metric name (`<chart_id>.<id>`) to value mapping
pub type Metrics = BTreeMap<String, Value>;

/// One metric line as received from a client
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawLine {
    pub timestamp: Timestamp,
    pub chart_id: String,
    pub id: String,
    /// Number or null
    pub value: Value,
    pub hostname: String,
}

impl RawLine {
    /// Key this line contributes to the consolidated record
    pub fn metric_name(&self) -> String {
        format!("{}.{}", self.chart_id, self.id)
    }

    /// A line carries a usable value only if it is a number or null
    pub fn has_valid_value(&self) -> bool {
        self.value.is_number() || self.value.is_null()
    }
}

/// All metrics sharing one timestamp within a batch, merged into one row
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRecord {
    /// Timestamp in seconds
    pub timestamp: Timestamp,
    /// Lowercased hostname of the last line seen for this timestamp
    pub host: String,
    /// Metric values
    pub metrics: Metrics,
}

impl ConsolidatedRecord {
    /// Create an empty record for a timestamp
    pub fn new(timestamp: Timestamp, host: impl Into<String>) -> Self {
        Self {
            timestamp,
            host: host.into().to_lowercase(),
            metrics: Metrics::new(),
        }
    }

    /// Add a metric value
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// Fold one raw line into this record (host is last-write-wins)
    pub fn merge(&mut self, line: RawLine) {
        self.host = line.hostname.to_lowercase();
        let name = line.metric_name();
        self.metrics.insert(name, line.value);
    }

    /// Metrics as stored: never carries the record's own `timestamp`/`host`.
    ///
    /// Pivoted keys always contain a dot, so the removal only matters for
    /// records built by hand with [`with_metric`](Self::with_metric).
    pub fn storage_metrics(&self) -> Metrics {
        let mut metrics = self.metrics.clone();
        metrics.remove("timestamp");
        metrics.remove("host");
        metrics
    }
}

impl fmt::Display for ConsolidatedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({} metrics)", self.host, self.timestamp, self.metrics.len())
    }
}

/// Lines collected during one inactivity-delimited framing interval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Accumulated lines, each terminated by `\n`
    pub text: String,
    /// Number of lines in `text`
    pub lines: usize,
    /// Lines dropped while decoding (not UTF-8 or too long)
    pub rejected: usize,
}

impl Batch {
    /// Append one line (without its terminator)
    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        self.lines += 1;
    }

    /// Check if nothing at all was received yet
    pub fn is_empty(&self) -> bool {
        self.lines == 0 && self.rejected == 0
    }
}
