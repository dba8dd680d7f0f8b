//! Log record data

use serde::{Deserialize, Serialize};

use super::traces::{SpanId, TraceId};
use super::{AnyValue, Batch, KeyValue};

/// A batch of log records
pub type Logs = Batch<LogRecord>;

/// Severity on the 1..=24 scale; 0 means unspecified
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityNumber(pub u8);

impl SeverityNumber {
    pub const UNSPECIFIED: SeverityNumber = SeverityNumber(0);
    pub const DEBUG: SeverityNumber = SeverityNumber(5);
    pub const INFO: SeverityNumber = SeverityNumber(9);
    pub const WARN: SeverityNumber = SeverityNumber(13);
    pub const ERROR: SeverityNumber = SeverityNumber(17);
}

/// One log record, optionally correlated with a span
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub time_unix_nano: u64,
    #[serde(default)]
    pub severity_number: SeverityNumber,
    #[serde(default)]
    pub severity_text: String,
    #[serde(default)]
    pub body: Option<AnyValue>,
    #[serde(default)]
    pub trace_id: TraceId,
    #[serde(default)]
    pub span_id: SpanId,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

impl LogRecord {
    pub fn new(body: impl Into<AnyValue>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn with_severity(mut self, severity: SeverityNumber, text: impl Into<String>) -> Self {
        self.severity_number = severity;
        self.severity_text = text.into();
        self
    }
}
