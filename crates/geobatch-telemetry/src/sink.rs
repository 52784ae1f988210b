//! Exporter sinks and their per-sink dispatch runtime
//!
//! Each sink gets its own bounded queue and background dispatch task. The
//! producer side never blocks: when the queue is full the event is dropped
//! and counted against that sink. The dispatch task batches events and
//! exports them on a size threshold, a flush timer, or an explicit flush.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::event::TelemetryEvent;

/// Delay between retry attempts when a sink's retry policy allows them.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// A sink for finalized telemetry events.
#[async_trait]
pub trait EventSink: std::fmt::Debug + Send + Sync {
    /// Short stable name used in stats and logs.
    fn name(&self) -> &'static str;

    /// Export one batch. An error means the whole batch failed; the runtime
    /// decides whether to retry or drop based on its policy.
    async fn export(&self, batch: &[TelemetryEvent]) -> anyhow::Result<()>;
}

/// Per-sink queueing and batching policy.
#[derive(Debug, Clone)]
pub struct SinkPolicy {
    /// Bounded queue depth between producers and the dispatch task.
    pub queue_depth: usize,
    /// Export any buffered events at least this often.
    pub flush_interval: Duration,
    /// Export as soon as this many events are buffered.
    pub batch_size: usize,
    /// Retries before a failing batch is dropped. Zero means drop on first
    /// failure.
    pub retry_limit: u32,
}

impl Default for SinkPolicy {
    fn default() -> Self {
        Self {
            queue_depth: 2048,
            flush_interval: Duration::from_secs(5),
            batch_size: 512,
            retry_limit: 0,
        }
    }
}

/// Delivered/dropped counters for one sink, as exposed by `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct SinkStats {
    pub name: &'static str,
    pub delivered: u64,
    pub dropped: u64,
}

enum SinkMessage {
    Event(TelemetryEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle pairing a sink with its queue and counters.
pub(crate) struct SinkRuntime {
    name: &'static str,
    tx: mpsc::Sender<SinkMessage>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl SinkRuntime {
    /// Spawn the dispatch task for `sink`. Must be called within a tokio
    /// runtime.
    pub(crate) fn spawn(sink: Arc<dyn EventSink>, policy: SinkPolicy) -> Self {
        let (tx, rx) = mpsc::channel(policy.queue_depth.max(1));
        let delivered = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let name = sink.name();

        tokio::spawn(dispatch_loop(
            sink,
            rx,
            policy,
            Arc::clone(&delivered),
            Arc::clone(&dropped),
        ));

        Self {
            name,
            tx,
            delivered,
            dropped,
        }
    }

    /// Enqueue one event without ever blocking. Queue-full drops the event
    /// and bumps the dropped counter.
    pub(crate) fn offer(&self, event: TelemetryEvent) {
        if self.tx.try_send(SinkMessage::Event(event)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Ask the dispatch task to export everything buffered, waiting up to
    /// `timeout` for the acknowledgement. Used at shutdown and in tests.
    pub(crate) async fn flush(&self, timeout: Duration) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let send = self.tx.send(SinkMessage::Flush(ack_tx));
        if tokio::time::timeout(timeout, send).await.is_ok() {
            let _ = tokio::time::timeout(timeout, ack_rx).await;
        }
    }

    pub(crate) fn stats(&self) -> SinkStats {
        SinkStats {
            name: self.name,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn dispatch_loop(
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::Receiver<SinkMessage>,
    policy: SinkPolicy,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
) {
    let mut buffer: Vec<TelemetryEvent> = Vec::with_capacity(policy.batch_size.min(1024));
    let mut ticker = tokio::time::interval(policy.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(SinkMessage::Event(event)) => {
                    buffer.push(event);
                    if buffer.len() >= policy.batch_size {
                        export_batch(sink.as_ref(), &mut buffer, &policy, &delivered, &dropped)
                            .await;
                    }
                },
                Some(SinkMessage::Flush(ack)) => {
                    export_batch(sink.as_ref(), &mut buffer, &policy, &delivered, &dropped).await;
                    let _ = ack.send(());
                },
                None => {
                    export_batch(sink.as_ref(), &mut buffer, &policy, &delivered, &dropped).await;
                    break;
                },
            },
            _ = ticker.tick() => {
                export_batch(sink.as_ref(), &mut buffer, &policy, &delivered, &dropped).await;
            },
        }
    }
}

async fn export_batch(
    sink: &dyn EventSink,
    buffer: &mut Vec<TelemetryEvent>,
    policy: &SinkPolicy,
    delivered: &AtomicU64,
    dropped: &AtomicU64,
) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let mut attempts = 0;
    loop {
        match sink.export(&batch).await {
            Ok(()) => {
                delivered.fetch_add(batch.len() as u64, Ordering::Relaxed);
                return;
            },
            Err(err) if attempts < policy.retry_limit => {
                attempts += 1;
                tracing::debug!(
                    sink = sink.name(),
                    attempt = attempts,
                    error = %err,
                    "Sink export failed, retrying"
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
            },
            Err(err) => {
                dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::warn!(
                    sink = sink.name(),
                    events = batch.len(),
                    error = %err,
                    "Sink export failed, dropping batch"
                );
                return;
            },
        }
    }
}

/// A sink that writes events to the log. Used when no exporter backend is
/// configured, so development setups still see their telemetry.
#[derive(Debug, Default)]
pub struct LogSink {}

impl LogSink {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn export(&self, batch: &[TelemetryEvent]) -> anyhow::Result<()> {
        for event in batch {
            tracing::debug!(
                trace = %event.trace_context,
                kind = event.kind.as_str(),
                name = %event.name,
                status = event.status.as_str(),
                duration_ms = event.duration.as_millis() as u64,
                "Telemetry event"
            );
        }
        Ok(())
    }
}
