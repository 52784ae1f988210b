//! Telemetry event model

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::time::Duration;

/// What kind of unit of work an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The outer HTTP request lifecycle.
    Request,
    /// One geocoded row inside a batch.
    Row,
    /// One whole batch job.
    Job,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Request => "request",
            EventKind::Row => "row",
            EventKind::Job => "job",
        }
    }
}

/// Final status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Ok,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Ok => "ok",
            EventStatus::Error => "error",
        }
    }
}

/// Values that can be stored in an event's attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(Cow<'static, str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&'static str> for AttrValue {
    fn from(v: &'static str) -> Self {
        Self::String(Cow::Borrowed(v))
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(Cow::Owned(v))
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Identifier correlating every event belonging to one logical operation
/// (e.g. one upload) across all sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext(u128);

impl TraceContext {
    /// Generate a fresh context for a new root operation.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().as_u128())
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// 32-char lowercase hex form used on the wire.
    pub fn as_hex(&self) -> String {
        format!("{:032x}", self.0)
    }
}

impl std::fmt::Display for TraceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// One finalized observable unit, immutable once handed to the fanout.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub kind: EventKind,
    pub name: Cow<'static, str>,
    pub start: DateTime<Utc>,
    pub duration: Duration,
    pub attributes: Vec<(Cow<'static, str>, AttrValue)>,
    pub status: EventStatus,
    pub trace_context: TraceContext,
}

impl TelemetryEvent {
    /// Wall-clock end of the operation.
    pub fn end(&self) -> DateTime<Utc> {
        self.start
            + chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
