//! Batch pipeline driver
//!
//! Wires decoder, mapper, builder, pool, and encoder together for one
//! upload. `prepare` performs every step that can still fail with a
//! structured error response (header decode, mapping resolution); `run`
//! then streams rows through the pool into the output channel.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use geobatch_common::{PipelineError, Result};
use geobatch_telemetry::{TelemetryFanout, TraceContext};

use crate::builder::build_task;
use crate::decode::{DecoderConfig, StreamingRowDecoder};
use crate::encode::ResultStreamEncoder;
use crate::geocoder::Geocoder;
use crate::mapping::{ColumnMapping, ColumnSpec};
use crate::pool::{BoundedWorkerPool, PoolConfig};
use crate::record::{GeocodeMode, GeocodeOutcome, GeocodeTask, OutcomeStatus, RowRecord};

/// Per-deployment pipeline tuning, pure values.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sniff_sample_bytes: usize,
    pub max_header_bytes: usize,
    /// Depth of the internal row/task/outcome channels.
    pub channel_depth: usize,
    pub pool: PoolConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sniff_sample_bytes: 8192,
            max_header_bytes: 8192,
            channel_depth: 32,
            pool: PoolConfig::default(),
        }
    }
}

/// Resolved per-request parameters of one upload.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub mode: GeocodeMode,
    pub spec: ColumnSpec,
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
}

/// Row counts for the finished (or truncated) batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSummary {
    pub rows_total: u64,
    pub found: u64,
    pub not_found: u64,
    pub failed: u64,
}

/// A batch whose header is decoded and whose mapping resolved; everything
/// after this point streams.
pub struct PreparedBatch<R> {
    decoder: StreamingRowDecoder<R>,
    mapping: ColumnMapping,
    mode: GeocodeMode,
    pool: BoundedWorkerPool,
    channel_depth: usize,
}

/// Decode the header and resolve the column mapping. Errors here surface as
/// structured responses before any output row exists.
pub async fn prepare<R: AsyncRead + Unpin + Send>(
    input: R,
    request: &BatchRequest,
    geocoder: Arc<dyn Geocoder>,
    fanout: Arc<TelemetryFanout>,
    trace: TraceContext,
    config: &PipelineConfig,
) -> Result<PreparedBatch<R>> {
    let decoder_config = DecoderConfig {
        delimiter: request.delimiter,
        encoding: request.encoding.clone(),
        sniff_sample_bytes: config.sniff_sample_bytes,
        max_header_bytes: config.max_header_bytes,
    };
    let decoder = StreamingRowDecoder::new(input, &decoder_config).await?;
    let mapping = ColumnMapping::resolve(&decoder.header(), &request.spec, request.mode)?;
    let pool = BoundedWorkerPool::new(geocoder, fanout, trace, config.pool.clone());

    Ok(PreparedBatch {
        decoder,
        mapping,
        mode: request.mode,
        pool,
        channel_depth: config.channel_depth,
    })
}

impl<R: AsyncRead + Unpin + Send> PreparedBatch<R> {
    pub fn header(&self) -> Arc<[String]> {
        self.decoder.header()
    }

    pub fn delimiter(&self) -> u8 {
        self.decoder.delimiter()
    }

    /// Drive the batch to completion, streaming encoded rows into `output`.
    ///
    /// The deadline cancels the whole pipeline cooperatively: rows already
    /// finalized are still flushed, in order, before the stream closes
    /// early. A closed `output` receiver (client disconnect) has the same
    /// effect.
    pub async fn run(
        self,
        output: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Result<BatchSummary> {
        let header = self.decoder.header();
        let delimiter = self.decoder.delimiter();
        let mut encoder = ResultStreamEncoder::new(delimiter, output);
        encoder.write_header(&header).await?;

        let depth = self.channel_depth.max(1);
        let (task_tx, task_rx) = mpsc::channel::<GeocodeTask>(depth);
        let (row_tx, mut row_rx) = mpsc::channel::<RowRecord>(depth * 2);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<GeocodeOutcome>(depth);

        let watchdog_cancel = cancel.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            watchdog_cancel.cancel();
        });

        // The pool owns only Arc'd state and can be spawned; the decode
        // producer borrows the (possibly non-'static) upload stream, so it
        // runs as a joined local future instead.
        let pool_handle = tokio::spawn(self.pool.execute(task_rx, outcome_tx, cancel.clone()));

        let mut decoder = self.decoder;
        let mapping = self.mapping;
        let mode = self.mode;
        let producer_cancel = cancel.clone();
        let producer = async move {
            loop {
                let next = tokio::select! {
                    _ = producer_cancel.cancelled() => break,
                    next = decoder.next_row() => next,
                };
                let Some(next) = next else { break };
                let row = next?;
                let task = build_task(&row, &mapping, mode);
                // The row goes first so the consumer can always pair the
                // outcome for sequence n with an already-buffered row n.
                if row_tx.send(row).await.is_err() {
                    break;
                }
                if task_tx.send(task).await.is_err() {
                    break;
                }
            }
            Ok::<(), PipelineError>(())
        };

        let consumer_cancel = cancel.clone();
        let consumer = async move {
            let mut summary = BatchSummary::default();
            let mut write_error: Option<PipelineError> = None;
            while let Some(outcome) = outcome_rx.recv().await {
                let Some(row) = row_rx.recv().await else {
                    break;
                };
                debug_assert_eq!(row.sequence(), outcome.sequence);
                summary.rows_total += 1;
                match outcome.status {
                    OutcomeStatus::Found => summary.found += 1,
                    OutcomeStatus::NotFound => summary.not_found += 1,
                    OutcomeStatus::Error => summary.failed += 1,
                }
                if let Err(err) = encoder.write_row(&row, &outcome).await {
                    consumer_cancel.cancel();
                    write_error = Some(err);
                    break;
                }
            }
            (summary, write_error)
        };

        let (producer_result, (summary, write_error)) = tokio::join!(producer, consumer);

        watchdog.abort();

        let pool_result = pool_handle
            .await
            .map_err(|err| PipelineError::Cancelled(format!("pool task failed: {err}")))?;

        if let Some(err) = write_error {
            return Err(err);
        }
        // Decode errors take precedence: the pool merely drained what the
        // decoder managed to produce before failing.
        producer_result?;
        pool_result?;

        Ok(summary)
    }
}
