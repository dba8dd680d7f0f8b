//! Span data

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Batch, KeyValue};
use crate::core::types::{RoutingKey, ROUTING_KEY_LEN};

/// A batch of spans
pub type Traces = Batch<Span>;

/// 16-byte trace identifier; all zeros means "no trace id"
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TraceId([u8; ROUTING_KEY_LEN]);

impl TraceId {
    pub const EMPTY: TraceId = TraceId([0u8; ROUTING_KEY_LEN]);

    pub const fn from_bytes(bytes: [u8; ROUTING_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ROUTING_KEY_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ROUTING_KEY_LEN]
    }

    /// The routing key for this trace id, or `None` when the id is empty
    pub fn routing_key(&self) -> Option<RoutingKey> {
        if self.is_empty() {
            None
        } else {
            Some(RoutingKey::from_bytes(self.0))
        }
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", hex::encode(self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// 8-byte span identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SpanId(pub [u8; 8]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// One span of a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    #[serde(default)]
    pub span_id: SpanId,
    #[serde(default)]
    pub parent_span_id: SpanId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: SpanKind,
    #[serde(default)]
    pub start_time_unix_nano: u64,
    #[serde(default)]
    pub end_time_unix_nano: u64,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

impl Span {
    pub fn new(trace_id: TraceId, name: impl Into<String>) -> Self {
        Self {
            trace_id,
            span_id: SpanId::default(),
            parent_span_id: SpanId::default(),
            name: name.into(),
            kind: SpanKind::default(),
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            attributes: Vec::new(),
        }
    }

    pub fn with_span_id(mut self, span_id: [u8; 8]) -> Self {
        self.span_id = SpanId(span_id);
        self
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }
}
