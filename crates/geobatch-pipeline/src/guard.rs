//! Ingestion guard
//!
//! Enforces upload limits before and during decoding. Declared sizes are
//! checked up front, but declared length can be absent or wrong, so the
//! guard also wraps the byte stream and aborts mid-stream the moment the
//! running count crosses the limit.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

use geobatch_common::{PipelineError, Result};

/// Upload limits, all pure values.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub max_bytes: u64,
    pub max_parts: usize,
    pub max_header_bytes: usize,
    /// Overall deadline for one request's pipeline.
    pub request_timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            max_parts: 100,
            max_header_bytes: 8192,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Pre-decode admission checks plus the mid-stream byte counter.
#[derive(Debug, Clone)]
pub struct IngestionGuard {
    config: GuardConfig,
}

impl IngestionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Reject on the declared content length, when one is present.
    pub fn check_declared_length(&self, content_length: Option<u64>) -> Result<()> {
        match content_length {
            Some(length) if length > self.config.max_bytes => {
                Err(PipelineError::PayloadTooLarge {
                    actual: length,
                    limit: self.config.max_bytes,
                })
            },
            _ => Ok(()),
        }
    }

    /// Reject once the multipart part count passes the limit.
    pub fn check_part_count(&self, count: usize) -> Result<()> {
        if count > self.config.max_parts {
            Err(PipelineError::TooManyParts {
                actual: count,
                limit: self.config.max_parts,
            })
        } else {
            Ok(())
        }
    }

    /// Wrap the upload stream with the observed-bytes limit.
    pub fn limit_reader<R>(&self, inner: R) -> LimitedReader<R> {
        LimitedReader {
            inner,
            read: 0,
            limit: self.config.max_bytes,
        }
    }
}

/// AsyncRead adapter that fails the stream once more than `limit` bytes
/// have actually been read, regardless of any declared length.
#[derive(Debug)]
pub struct LimitedReader<R> {
    inner: R,
    read: u64,
    limit: u64,
}

impl<R> LimitedReader<R> {
    /// Bytes observed so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Ready(Ok(())) => {
                this.read += (buf.filled().len() - before) as u64;
                if this.read > this.limit {
                    let err = PipelineError::PayloadTooLarge {
                        actual: this.read,
                        limit: this.limit,
                    };
                    return Poll::Ready(Err(err.into_io()));
                }
                Poll::Ready(Ok(()))
            },
        }
    }
}
