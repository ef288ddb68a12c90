//! Request/response logging collaborator
//!
//! The transport never writes to a global logger directly: it is handed a
//! [`RequestLog`] at construction. Records reaching a log are already escaped
//! and have credentials redacted.

use std::fmt;

use parking_lot::Mutex;

/// Marker written in place of a redacted credential
pub const REDACTED: &str = "...";

/// Which side of an exchange a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    fn prefix(&self) -> char {
        match self {
            Self::Request => '>',
            Self::Response => '<',
        }
    }
}

/// One escaped log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub direction: Direction,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction.prefix(), self.message)
    }
}

/// Sink for transport log records
pub trait RequestLog: Send + Sync {
    fn record(&self, record: LogRecord);
}

/// Forwards records to `tracing` under the `nimbus::http` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRequestLog;

impl RequestLog for TracingRequestLog {
    fn record(&self, record: LogRecord) {
        tracing::debug!(target: "nimbus::http", "{}", record);
    }
}

/// Keeps records in memory; used by tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryRequestLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryRequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// All records rendered as they would be printed
    pub fn lines(&self) -> Vec<String> {
        self.records.lock().iter().map(ToString::to_string).collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl RequestLog for MemoryRequestLog {
    fn record(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Escape control characters so a value cannot forge extra log lines
pub fn escape_control(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.extend(c.escape_unicode()),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Replace every occurrence of each secret with [`REDACTED`]
pub fn redact(value: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|secret| !secret.is_empty())
        .fold(value.to_string(), |acc, secret| acc.replace(secret, REDACTED))
}

/// Escape, redact and clip a value in one pass for logging
pub(crate) fn sanitize(value: &str, secrets: &[&str], max_chars: usize) -> String {
    let redacted = redact(value, secrets);
    let clipped: String = redacted.chars().take(max_chars).collect();
    let mut escaped = escape_control(&clipped);
    if redacted.chars().count() > max_chars {
        escaped.push_str(" [truncated]");
    }
    escaped
}
