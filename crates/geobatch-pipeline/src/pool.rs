//! Bounded worker pool
//!
//! Executes geocode tasks concurrently under a counting semaphore and
//! re-sequences completions so the consumer sees outcomes in strictly
//! increasing `sequence` order, whatever order the engine answers in.
//!
//! A single row's failure becomes an `Error` outcome and the batch keeps
//! going. Cancellation is cooperative: no new tasks are dispatched, already
//! running tasks get a grace period to finish, and whatever completed in
//! order is still emitted before the stream closes early.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use geobatch_common::{PipelineError, Result};
use geobatch_telemetry::{EventKind, EventStatus, TelemetryFanout, TraceContext};

use crate::geocoder::Geocoder;
use crate::record::{GeocodeOutcome, GeocodeTask, OutcomeStatus, TaskPayload};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrency ceiling, independent of batch size.
    pub concurrency: usize,
    /// How long in-flight tasks may keep running after cancellation.
    pub grace_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            grace_period: Duration::from_secs(2),
        }
    }
}

/// Buffers out-of-order completions until their turn.
#[derive(Debug, Default)]
struct ReorderBuffer {
    next: u64,
    pending: BTreeMap<u64, GeocodeOutcome>,
}

impl ReorderBuffer {
    /// Insert one completion and pop the run of outcomes that are now
    /// emittable in order.
    fn push(&mut self, outcome: GeocodeOutcome) -> Vec<GeocodeOutcome> {
        self.pending.insert(outcome.sequence, outcome);
        let mut ready = Vec::new();
        while let Some(outcome) = self.pending.remove(&self.next) {
            ready.push(outcome);
            self.next += 1;
        }
        ready
    }
}

/// One pool per batch request.
pub struct BoundedWorkerPool {
    geocoder: Arc<dyn Geocoder>,
    fanout: Arc<TelemetryFanout>,
    trace: TraceContext,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
}

impl std::fmt::Debug for BoundedWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedWorkerPool")
            .field("concurrency", &self.config.concurrency)
            .finish()
    }
}

impl BoundedWorkerPool {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        fanout: Arc<TelemetryFanout>,
        trace: TraceContext,
        config: PoolConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            geocoder,
            fanout,
            trace,
            semaphore,
            config,
        }
    }

    /// Consume `tasks` until exhaustion or cancellation, emitting outcomes
    /// on `outcomes` in strictly increasing sequence order.
    pub async fn execute(
        self,
        mut tasks: mpsc::Receiver<GeocodeTask>,
        outcomes: mpsc::Sender<GeocodeOutcome>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut inflight: JoinSet<GeocodeOutcome> = JoinSet::new();
        let mut reorder = ReorderBuffer::default();

        'dispatch: loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'dispatch,
                maybe_task = tasks.recv() => {
                    let Some(task) = maybe_task else { break 'dispatch };
                    let permit = tokio::select! {
                        permit = Arc::clone(&self.semaphore).acquire_owned() => {
                            permit.map_err(|_| {
                                PipelineError::Cancelled("worker pool semaphore closed".to_string())
                            })?
                        },
                        _ = cancel.cancelled() => break 'dispatch,
                    };
                    let geocoder = Arc::clone(&self.geocoder);
                    let fanout = Arc::clone(&self.fanout);
                    let trace = self.trace;
                    inflight.spawn(async move {
                        let outcome = execute_task(geocoder.as_ref(), &fanout, trace, task).await;
                        drop(permit);
                        outcome
                    });
                },
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if !forward(joined, &mut reorder, &outcomes).await? {
                        cancel.cancel();
                        break 'dispatch;
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            let drained = tokio::time::timeout(
                self.config.grace_period,
                drain(&mut inflight, &mut reorder, &outcomes),
            )
            .await;
            if drained.is_err() {
                let abandoned = inflight.len();
                inflight.abort_all();
                tracing::warn!(
                    abandoned,
                    "Grace period expired, abandoning in-flight geocode tasks"
                );
            }
            return Err(PipelineError::Cancelled(
                "batch stopped before all rows completed".to_string(),
            ));
        }

        drain(&mut inflight, &mut reorder, &outcomes).await?;
        Ok(())
    }
}

/// Emit whatever this completion unlocks. Returns `false` when the outcome
/// receiver is gone (client disconnected).
async fn forward(
    joined: std::result::Result<GeocodeOutcome, tokio::task::JoinError>,
    reorder: &mut ReorderBuffer,
    outcomes: &mpsc::Sender<GeocodeOutcome>,
) -> Result<bool> {
    let outcome = joined
        .map_err(|err| PipelineError::Cancelled(format!("geocode worker task failed: {err}")))?;
    for ready in reorder.push(outcome) {
        if outcomes.send(ready).await.is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn drain(
    inflight: &mut JoinSet<GeocodeOutcome>,
    reorder: &mut ReorderBuffer,
    outcomes: &mpsc::Sender<GeocodeOutcome>,
) -> Result<()> {
    while let Some(joined) = inflight.join_next().await {
        if !forward(joined, reorder, outcomes).await? {
            return Ok(());
        }
    }
    Ok(())
}

/// Run one task to an outcome, wrapped in a row-level telemetry event
/// correlated to the request's trace context. Never returns an error: a
/// failed engine call is an `Error` outcome for that row only.
async fn execute_task(
    geocoder: &dyn Geocoder,
    fanout: &TelemetryFanout,
    trace: TraceContext,
    task: GeocodeTask,
) -> GeocodeOutcome {
    let mut handle = fanout.start_child(
        EventKind::Row,
        "geocode_row",
        trace,
        vec![("row.sequence".into(), (task.sequence as i64).into())],
    );
    match &task.payload {
        TaskPayload::Forward { .. } | TaskPayload::EmptyQuery => {
            handle.record("geocode.mode", "forward")
        },
        TaskPayload::Reverse { .. } | TaskPayload::InvalidCoordinates { .. } => {
            handle.record("geocode.mode", "reverse")
        },
    }

    let outcome = match &task.payload {
        // Zero-query rows must appear in the output; skip the engine.
        TaskPayload::EmptyQuery => GeocodeOutcome::not_found(task.sequence),
        TaskPayload::InvalidCoordinates { detail } => {
            GeocodeOutcome::error(task.sequence, detail.clone())
        },
        TaskPayload::Forward { query } => {
            match geocoder
                .search(query, task.bias_center, &task.filters)
                .await
            {
                Ok(candidates) => best_outcome(task.sequence, candidates),
                Err(err) => {
                    tracing::warn!(
                        sequence = task.sequence,
                        error = %err,
                        "Forward geocode call failed"
                    );
                    GeocodeOutcome::error(task.sequence, err.to_string())
                },
            }
        },
        TaskPayload::Reverse { lat, lon } => {
            match geocoder.reverse(*lat, *lon, &task.filters).await {
                Ok(candidates) => best_outcome(task.sequence, candidates),
                Err(err) => {
                    tracing::warn!(
                        sequence = task.sequence,
                        error = %err,
                        "Reverse geocode call failed"
                    );
                    GeocodeOutcome::error(task.sequence, err.to_string())
                },
            }
        },
    };

    let status = if outcome.status == OutcomeStatus::Error {
        EventStatus::Error
    } else {
        EventStatus::Ok
    };
    fanout.finish(
        handle,
        status,
        vec![("row.status".into(), outcome.status.as_str().into())],
    );

    outcome
}

fn best_outcome(sequence: u64, candidates: Vec<crate::record::Candidate>) -> GeocodeOutcome {
    match candidates.into_iter().next() {
        Some(best) => GeocodeOutcome::found(sequence, best),
        None => GeocodeOutcome::not_found(sequence),
    }
}
