//! Batch CSV geocoding endpoints
//!
//! `POST /search/csv` and `POST /reverse/csv` accept a multipart upload
//! (`data` file plus optional `columns`/`encoding`/`delimiter`/`lat`/`lon`
//! fields; extra query-string parameters map filter keys to column names)
//! and stream back the input CSV with result columns appended.
//!
//! The response streams: once the header is decoded and the mapping
//! resolved, the handler returns a 200 whose body is fed row by row while
//! the upload is still being consumed. Failures before that point surface
//! as structured JSON errors; failures after truncate the stream visibly.

use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use geobatch_common::PipelineError;
use geobatch_pipeline::{
    prepare, BatchRequest, BatchSummary, ColumnSpec, GeocodeMode, IngestionGuard,
};
use geobatch_telemetry::{EventHandle, EventKind, EventStatus, TraceContext};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn csv_search(
    State(state): State<AppState>,
    Query(filters): Query<HashMap<String, String>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    run_csv(state, GeocodeMode::Forward, filters, headers, multipart).await
}

pub async fn csv_reverse(
    State(state): State<AppState>,
    Query(filters): Query<HashMap<String, String>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    run_csv(state, GeocodeMode::Reverse, filters, headers, multipart).await
}

async fn run_csv(
    state: AppState,
    mode: GeocodeMode,
    filters: HashMap<String, String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    state.stats.record_request();
    state.stats.record_upload();

    let endpoint: &'static str = match mode {
        GeocodeMode::Forward => "csv_search",
        GeocodeMode::Reverse => "csv_reverse",
    };
    let request_event = state
        .fanout
        .start_request(endpoint, vec![("http.endpoint".into(), endpoint.into())]);
    let trace = request_event.trace_context();

    let guard = IngestionGuard::new(state.config.guard_config());
    let deadline = tokio::time::Instant::now() + guard.config().request_timeout;

    // Declared length can be absent or wrong; the limit reader re-checks
    // observed bytes during the decode.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if let Err(err) = guard.check_declared_length(declared) {
        state.stats.record_error();
        state.fanout.finish(
            request_event,
            EventStatus::Error,
            vec![("error.code".into(), err.code().into())],
        );
        return ApiError::from(err).into_response();
    }

    let (setup_tx, setup_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel::<Bytes>(32);

    tokio::spawn(drive_upload(
        state,
        mode,
        filters,
        multipart,
        guard,
        deadline,
        trace,
        request_event,
        setup_tx,
        body_tx,
    ));

    match setup_rx.await {
        Ok(Ok(())) => {
            let stream = ReceiverStream::new(body_rx).map(Ok::<_, std::convert::Infallible>);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
                Body::from_stream(stream),
            )
                .into_response()
        },
        Ok(Err(err)) => ApiError::from(err).into_response(),
        Err(_) => ApiError::internal("upload processing task failed").into_response(),
    }
}

/// Owns the multipart body for the lifetime of the upload: reads parameter
/// fields, runs the pipeline over the `data` field, finalizes telemetry.
#[allow(clippy::too_many_arguments)]
async fn drive_upload(
    state: AppState,
    mode: GeocodeMode,
    filters: HashMap<String, String>,
    mut multipart: Multipart,
    guard: IngestionGuard,
    deadline: tokio::time::Instant,
    trace: TraceContext,
    request_event: EventHandle,
    setup_tx: oneshot::Sender<Result<(), PipelineError>>,
    body_tx: mpsc::Sender<Bytes>,
) {
    let mut setup_tx = Some(setup_tx);
    let mut body_tx = Some(body_tx);

    let result = process_parts(
        &state,
        mode,
        filters,
        &mut multipart,
        &guard,
        deadline,
        trace,
        &mut setup_tx,
        &mut body_tx,
    )
    .await;

    match result {
        Ok(Some(summary)) => {
            state.stats.record_rows(summary.rows_total);
            state.fanout.finish(
                request_event,
                EventStatus::Ok,
                vec![
                    ("batch.rows".into(), summary.rows_total.into()),
                    ("batch.found".into(), summary.found.into()),
                    ("batch.not_found".into(), summary.not_found.into()),
                    ("batch.failed".into(), summary.failed.into()),
                ],
            );
        },
        Ok(None) => {
            let err =
                PipelineError::Decode("multipart upload has no `data` file field".to_string());
            state.stats.record_error();
            state.fanout.finish(
                request_event,
                EventStatus::Error,
                vec![("error.code".into(), err.code().into())],
            );
            if let Some(tx) = setup_tx.take() {
                let _ = tx.send(Err(err));
            }
        },
        Err(err) => {
            state.stats.record_error();
            state.fanout.finish(
                request_event,
                EventStatus::Error,
                vec![("error.code".into(), err.code().into())],
            );
            match setup_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Err(err));
                },
                // Streaming had begun; the closed body channel already
                // truncated the response.
                None => {
                    tracing::warn!(error = %err, "Batch truncated mid-stream");
                },
            }
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_parts(
    state: &AppState,
    mode: GeocodeMode,
    filters: HashMap<String, String>,
    multipart: &mut Multipart,
    guard: &IngestionGuard,
    deadline: tokio::time::Instant,
    trace: TraceContext,
    setup_tx: &mut Option<oneshot::Sender<Result<(), PipelineError>>>,
    body_tx: &mut Option<mpsc::Sender<Bytes>>,
) -> Result<Option<BatchSummary>, PipelineError> {
    let mut spec = ColumnSpec {
        filters: filters.into_iter().collect(),
        ..ColumnSpec::default()
    };
    let mut delimiter: Option<u8> = None;
    let mut encoding: Option<String> = None;
    let mut summary: Option<BatchSummary> = None;
    let mut parts = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(PipelineError::Decode(format!("multipart read failed: {err}")))
            },
        };
        parts += 1;
        guard.check_part_count(parts)?;

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "columns" => spec.query_columns.push(read_text(field).await?),
            "encoding" => encoding = Some(read_text(field).await?),
            "delimiter" => delimiter = read_text(field).await?.bytes().next(),
            "lat" => spec.lat_column = Some(read_text(field).await?),
            "lon" => spec.lon_column = Some(read_text(field).await?),
            "data" if summary.is_none() => {
                let request = BatchRequest {
                    mode,
                    spec: spec.clone(),
                    delimiter,
                    encoding: encoding.clone(),
                };
                let stream = field
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
                let reader = guard.limit_reader(StreamReader::new(Box::pin(stream)));

                let prepared = tokio::time::timeout_at(
                    deadline,
                    prepare(
                        reader,
                        &request,
                        Arc::clone(&state.geocoder),
                        Arc::clone(&state.fanout),
                        trace,
                        &state.config.pipeline_config(),
                    ),
                )
                .await
                .map_err(|_| {
                    PipelineError::Cancelled("request deadline expired during setup".to_string())
                })??;

                // Setup succeeded: release the streaming response.
                let Some(out) = body_tx.take() else { break };
                if let Some(tx) = setup_tx.take() {
                    let _ = tx.send(Ok(()));
                }

                let job_event = state.fanout.start_child(
                    EventKind::Job,
                    "csv_batch",
                    trace,
                    vec![("batch.mode".into(), mode.as_str().into())],
                );
                let cancel = CancellationToken::new();
                match prepared.run(out, cancel, deadline).await {
                    Ok(batch) => {
                        state.fanout.finish(
                            job_event,
                            EventStatus::Ok,
                            vec![
                                ("batch.rows".into(), batch.rows_total.into()),
                                ("batch.failed".into(), batch.failed.into()),
                            ],
                        );
                        summary = Some(batch);
                    },
                    Err(err) => {
                        state.fanout.finish(
                            job_event,
                            EventStatus::Error,
                            vec![("error.code".into(), err.code().into())],
                        );
                        return Err(err);
                    },
                }
            },
            // Unknown or duplicate parts are counted, then skipped.
            _ => drop(field),
        }
    }

    Ok(summary)
}

async fn read_text(field: Field<'_>) -> Result<String, PipelineError> {
    field
        .text()
        .await
        .map_err(|err| PipelineError::Decode(format!("multipart field read failed: {err}")))
}
