//! Streaming row decoder
//!
//! Turns a byte stream into a lazy, forward-only sequence of [`RowRecord`]s
//! via csv-async, without ever materializing the full input. The delimiter
//! is explicit or sniffed from a bounded prefix sample; the encoding is
//! explicit or defaults to `utf-8-sig` (UTF-8 with an optional BOM
//! stripped). Non-UTF-8 single-byte encodings are decoded per field with
//! encoding_rs.

use csv_async::{AsyncReaderBuilder, ByteRecord};
use encoding_rs::Encoding;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use geobatch_common::{PipelineError, Result};

use crate::record::RowRecord;
use crate::sniff::{sniff_delimiter, strip_utf8_bom};

/// Decoder tuning knobs, all pure values.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Explicit delimiter; auto-detected from the sample when absent.
    pub delimiter: Option<u8>,
    /// Encoding label (e.g. `utf-8-sig`, `iso-8859-1`); default `utf-8-sig`.
    pub encoding: Option<String>,
    /// Bytes sampled for delimiter detection, independent of file size.
    pub sniff_sample_bytes: usize,
    /// Upper bound for the raw header row.
    pub max_header_bytes: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: None,
            sniff_sample_bytes: 8192,
            max_header_bytes: 8192,
        }
    }
}

/// Serves buffered prefix bytes before handing off to the inner reader.
/// Lets the decoder sniff a bounded sample and then replay it into the CSV
/// reader, keeping the overall pass single.
#[derive(Debug)]
pub struct PrefixedReader<R> {
    prefix: Vec<u8>,
    pos: usize,
    inner: R,
}

impl<R> PrefixedReader<R> {
    fn new(prefix: Vec<u8>, inner: R) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PrefixedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = std::cmp::min(buf.remaining(), this.prefix.len() - this.pos);
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// Lazy decoder over one upload. Consumed exactly once.
pub struct StreamingRowDecoder<R> {
    reader: csv_async::AsyncReader<PrefixedReader<R>>,
    header: Arc<[String]>,
    delimiter: u8,
    encoding: Option<&'static Encoding>,
    sequence: u64,
    record: ByteRecord,
}

impl<R> std::fmt::Debug for StreamingRowDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingRowDecoder")
            .field("header", &self.header)
            .field("delimiter", &(self.delimiter as char))
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<R: AsyncRead + Unpin + Send> StreamingRowDecoder<R> {
    /// Sample the stream, resolve delimiter and encoding, and consume the
    /// header row. Fails before any data row is read when the header cannot
    /// be decoded or exceeds its size bound.
    pub async fn new(mut input: R, config: &DecoderConfig) -> Result<Self> {
        let encoding = resolve_encoding(config.encoding.as_deref())?;

        let mut sample = vec![0u8; config.sniff_sample_bytes.max(64)];
        let mut filled = 0;
        while filled < sample.len() {
            let n = input
                .read(&mut sample[filled..])
                .await
                .map_err(PipelineError::from_io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        sample.truncate(filled);

        // The utf-8-sig default strips a leading BOM; other encodings are
        // passed through untouched.
        let body: Vec<u8> = if encoding.is_none() {
            let (rest, _) = strip_utf8_bom(&sample);
            rest.to_vec()
        } else {
            sample
        };

        let delimiter = match config.delimiter {
            Some(d) => d,
            None => sniff_delimiter(&body).delimiter,
        };

        let mut reader = AsyncReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .buffer_capacity(1 << 16)
            .create_reader(PrefixedReader::new(body, input));

        let mut record = ByteRecord::new();
        let got = reader
            .read_byte_record(&mut record)
            .await
            .map_err(map_csv_error)?;
        if !got {
            return Err(PipelineError::Decode("empty upload: no header row".to_string()));
        }
        if record.as_slice().len() > config.max_header_bytes {
            return Err(PipelineError::Decode(format!(
                "header row exceeds {} bytes",
                config.max_header_bytes
            )));
        }

        let header = record
            .iter()
            .map(|field| decode_field(encoding, field))
            .collect::<Result<Vec<String>>>()?;

        Ok(Self {
            reader,
            header: header.into(),
            delimiter,
            encoding,
            sequence: 0,
            record,
        })
    }

    /// Header column names, in file order. Not emitted as a row.
    pub fn header(&self) -> Arc<[String]> {
        Arc::clone(&self.header)
    }

    /// The delimiter in effect, explicit or detected.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Pull the next data row. `None` means the stream is exhausted; an
    /// error aborts the remainder of the stream.
    pub async fn next_row(&mut self) -> Option<Result<RowRecord>> {
        match self.reader.read_byte_record(&mut self.record).await {
            Err(err) => Some(Err(map_csv_error(err))),
            Ok(false) => None,
            Ok(true) => {
                if self.record.len() != self.header.len() {
                    return Some(Err(PipelineError::MalformedRow {
                        sequence: self.sequence,
                        expected: self.header.len(),
                        actual: self.record.len(),
                    }));
                }
                let mut fields = Vec::with_capacity(self.record.len());
                for field in self.record.iter() {
                    match decode_field(self.encoding, field) {
                        Ok(value) => fields.push(value),
                        Err(err) => return Some(Err(err)),
                    }
                }
                let row = RowRecord::new(self.sequence, Arc::clone(&self.header), fields);
                self.sequence += 1;
                Some(Ok(row))
            },
        }
    }
}

/// Resolve an encoding label. `None` means UTF-8 with BOM stripping.
fn resolve_encoding(label: Option<&str>) -> Result<Option<&'static Encoding>> {
    let Some(label) = label else {
        return Ok(None);
    };
    let normalized = label.trim().to_ascii_lowercase();
    if normalized == "utf-8-sig" || normalized == "utf8-sig" {
        return Ok(None);
    }
    let encoding = Encoding::for_label(normalized.as_bytes())
        .ok_or_else(|| PipelineError::Decode(format!("unknown encoding label: {label}")))?;
    if encoding == encoding_rs::UTF_8 {
        Ok(None)
    } else if encoding == encoding_rs::UTF_16LE || encoding == encoding_rs::UTF_16BE {
        // The byte-oriented CSV reader splits on single-byte delimiters.
        Err(PipelineError::Decode(
            "UTF-16 input is not supported; re-encode as UTF-8".to_string(),
        ))
    } else {
        Ok(Some(encoding))
    }
}

fn decode_field(encoding: Option<&'static Encoding>, bytes: &[u8]) -> Result<String> {
    match encoding {
        None => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|err| PipelineError::Decode(format!("invalid UTF-8 in field: {err}"))),
        Some(enc) => {
            let (text, had_errors) = enc.decode_without_bom_handling(bytes);
            if had_errors {
                Err(PipelineError::Decode(format!(
                    "undecodable bytes under {}",
                    enc.name()
                )))
            } else {
                Ok(text.into_owned())
            }
        },
    }
}

fn map_csv_error(err: csv_async::Error) -> PipelineError {
    let message = err.to_string();
    match err.into_kind() {
        csv_async::ErrorKind::Io(io) => PipelineError::from_io(io),
        _ => PipelineError::Decode(message),
    }
}
