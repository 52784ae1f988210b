//! Result stream encoder
//!
//! Re-emits each input row with the fixed result columns appended, flushed
//! row by row into a bytes channel so large batches start streaming before
//! the batch finishes. The output header is the original header followed by
//! the result columns, stable across requests.

use bytes::Bytes;
use tokio::sync::mpsc;

use geobatch_common::{PipelineError, Result};

use crate::record::{GeocodeOutcome, OutcomeStatus, RowRecord};

/// Result columns appended to every output row, in this exact order.
pub const RESULT_COLUMNS: [&str; 7] = [
    "result_label",
    "result_score",
    "result_lon",
    "result_lat",
    "result_postcode",
    "result_city",
    "result_context",
];

/// Incremental encoder over one response stream.
#[derive(Debug)]
pub struct ResultStreamEncoder {
    delimiter: u8,
    out: mpsc::Sender<Bytes>,
}

impl ResultStreamEncoder {
    pub fn new(delimiter: u8, out: mpsc::Sender<Bytes>) -> Self {
        Self { delimiter, out }
    }

    /// Emit the output header row.
    pub async fn write_header(&mut self, header: &[String]) -> Result<()> {
        let fields = header
            .iter()
            .map(String::as_str)
            .chain(RESULT_COLUMNS.iter().copied());
        self.send(encode_record(self.delimiter, fields)?).await
    }

    /// Emit one output row: original columns unchanged, result columns
    /// empty-stringed unless the outcome is `Found`.
    pub async fn write_row(&mut self, row: &RowRecord, outcome: &GeocodeOutcome) -> Result<()> {
        let result_fields = result_fields(outcome);
        let fields = row
            .fields()
            .iter()
            .map(String::as_str)
            .chain(result_fields.iter().map(String::as_str));
        self.send(encode_record(self.delimiter, fields)?).await
    }

    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.out
            .send(chunk)
            .await
            .map_err(|_| PipelineError::Cancelled("response stream closed".to_string()))
    }
}

fn result_fields(outcome: &GeocodeOutcome) -> [String; 7] {
    match (&outcome.status, &outcome.best_candidate) {
        (OutcomeStatus::Found, Some(candidate)) => [
            candidate.label.clone(),
            format_float(candidate.score),
            format_float(candidate.lon),
            format_float(candidate.lat),
            candidate.postcode.clone(),
            candidate.city.clone(),
            candidate.context.clone(),
        ],
        _ => Default::default(),
    }
}

fn format_float(value: f64) -> String {
    // Integral values print without a trailing ".0" to match the engine's
    // own CSV output.
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Serialize one record with the csv writer, quoting as needed.
fn encode_record<'a>(
    delimiter: u8,
    fields: impl Iterator<Item = &'a str>,
) -> Result<Bytes> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|err| PipelineError::Decode(format!("failed to encode output row: {err}")))?;
    let buf = writer
        .into_inner()
        .map_err(|err| PipelineError::Decode(format!("failed to flush output row: {err}")))?;
    Ok(Bytes::from(buf))
}
