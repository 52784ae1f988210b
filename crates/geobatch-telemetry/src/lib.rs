//! Telemetry fanout for the geobatch pipeline
//!
//! Every observable unit of work (HTTP request, per-row geocode, batch job)
//! is recorded as a [`TelemetryEvent`] and dispatched to a set of
//! independent exporter sinks. Sinks own their transport, batching, and
//! retry policy; a slow or dead sink never blocks the request path. When a
//! sink's bounded queue is full the newest event is dropped and counted.
//!
//! The fanout is an explicitly constructed handle passed by reference (via
//! the server state), initialized once at startup and drained at shutdown.

pub mod agent;
pub mod config;
pub mod event;
pub mod fanout;
pub mod otlp;
pub mod sink;

pub use config::{build_fanout, TelemetryConfig};
pub use event::{AttrValue, EventKind, EventStatus, TelemetryEvent, TraceContext};
pub use fanout::{EventHandle, TelemetryFanout};
pub use sink::{EventSink, LogSink, SinkPolicy, SinkStats};
