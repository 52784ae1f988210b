//! Fan-out of finalized events to all configured sinks

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::event::{AttrValue, EventKind, EventStatus, TelemetryEvent, TraceContext};
use crate::sink::{EventSink, SinkPolicy, SinkRuntime, SinkStats};

/// An in-flight operation. Created by [`TelemetryFanout::start_request`] or
/// [`TelemetryFanout::start_child`], finalized by [`TelemetryFanout::finish`].
#[derive(Debug)]
pub struct EventHandle {
    kind: EventKind,
    name: Cow<'static, str>,
    attributes: Vec<(Cow<'static, str>, AttrValue)>,
    trace_context: TraceContext,
    start: DateTime<Utc>,
    started: Instant,
}

impl EventHandle {
    /// The context shared by every event of this logical operation.
    pub fn trace_context(&self) -> TraceContext {
        self.trace_context
    }

    /// Attach an attribute discovered mid-operation.
    pub fn record(&mut self, key: impl Into<Cow<'static, str>>, value: impl Into<AttrValue>) {
        self.attributes.push((key.into(), value.into()));
    }
}

/// Dispatches every finished event to N independent sinks.
///
/// One instance lives for the whole process; constructed at startup, shared
/// behind an `Arc` in the server state, and drained at shutdown. Callers on
/// the request path never block on a sink.
#[derive(Default)]
pub struct TelemetryFanout {
    sinks: Vec<SinkRuntime>,
}

impl std::fmt::Debug for TelemetryFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryFanout")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl TelemetryFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink with its own queue, batching, and retry policy.
    /// Must be called within a tokio runtime.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>, policy: SinkPolicy) -> Self {
        self.sinks.push(SinkRuntime::spawn(sink, policy));
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Begin a root operation, generating a fresh trace context.
    pub fn start_request(
        &self,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<(Cow<'static, str>, AttrValue)>,
    ) -> EventHandle {
        self.start(EventKind::Request, name, TraceContext::generate(), attributes)
    }

    /// Begin a child operation under an existing trace context.
    pub fn start_child(
        &self,
        kind: EventKind,
        name: impl Into<Cow<'static, str>>,
        trace_context: TraceContext,
        attributes: Vec<(Cow<'static, str>, AttrValue)>,
    ) -> EventHandle {
        self.start(kind, name, trace_context, attributes)
    }

    fn start(
        &self,
        kind: EventKind,
        name: impl Into<Cow<'static, str>>,
        trace_context: TraceContext,
        attributes: Vec<(Cow<'static, str>, AttrValue)>,
    ) -> EventHandle {
        EventHandle {
            kind,
            name: name.into(),
            attributes,
            trace_context,
            start: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Finalize the operation and hand the event to every sink. Never
    /// blocks; full sink queues drop the event on their side.
    pub fn finish(
        &self,
        mut handle: EventHandle,
        status: EventStatus,
        extra_attributes: Vec<(Cow<'static, str>, AttrValue)>,
    ) {
        handle.attributes.extend(extra_attributes);
        let event = TelemetryEvent {
            kind: handle.kind,
            name: handle.name,
            start: handle.start,
            duration: handle.started.elapsed(),
            attributes: handle.attributes,
            status,
            trace_context: handle.trace_context,
        };
        for sink in &self.sinks {
            sink.offer(event.clone());
        }
    }

    /// Current delivered/dropped counters per sink.
    pub fn stats(&self) -> Vec<SinkStats> {
        self.sinks.iter().map(SinkRuntime::stats).collect()
    }

    /// Flush every sink, waiting up to `timeout` per sink. Called once at
    /// shutdown and from tests.
    pub async fn drain(&self, timeout: Duration) {
        for sink in &self.sinks {
            sink.flush(timeout).await;
        }
    }
}
