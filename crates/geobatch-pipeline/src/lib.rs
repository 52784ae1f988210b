//! Batch geocoding ingestion pipeline
//!
//! Streams an arbitrarily large delimited-text upload through decoding,
//! column mapping, bounded-concurrency geocoding, and incremental result
//! encoding, without ever materializing the full payload:
//!
//! ```text
//! upload -> guard -> decoder -> mapper -> builder -> worker pool -> encoder -> response
//! ```
//!
//! Row order is preserved end to end: outcomes are re-sequenced to strictly
//! increasing `sequence` order no matter in which order the geocoder calls
//! complete. A single row's failure never aborts the batch.

pub mod builder;
pub mod decode;
pub mod encode;
pub mod geocoder;
pub mod guard;
pub mod mapping;
pub mod pool;
pub mod record;
pub mod run;
pub mod sniff;

pub use builder::build_task;
pub use decode::{DecoderConfig, StreamingRowDecoder};
pub use encode::{ResultStreamEncoder, RESULT_COLUMNS};
pub use geocoder::{Geocoder, HttpGeocoder, HttpGeocoderConfig};
pub use guard::{GuardConfig, IngestionGuard, LimitedReader};
pub use mapping::{ColumnMapping, ColumnSpec};
pub use pool::{BoundedWorkerPool, PoolConfig};
pub use record::{
    Candidate, GeocodeMode, GeocodeOutcome, GeocodeTask, OutcomeStatus, RowRecord, TaskPayload,
};
pub use run::{prepare, BatchRequest, BatchSummary, PipelineConfig, PreparedBatch};
