//! Telemetry configuration and fanout construction

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::{AgentConfig, AgentSink};
use crate::fanout::TelemetryFanout;
use crate::otlp::{OtlpConfig, OtlpSink};
use crate::sink::{LogSink, SinkPolicy};

/// Default per-sink queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 2048;

/// Default flush interval in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default export batch size.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Default retries before drop. Zero means unconditional drop-on-failure.
pub const DEFAULT_RETRY_LIMIT: u32 = 0;

/// Default export timeout in seconds.
pub const DEFAULT_EXPORT_TIMEOUT_SECS: u64 = 10;

/// Default service name reported to both backends.
pub const DEFAULT_SERVICE_NAME: &str = "geobatch";

/// Telemetry configuration, pure values only.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub resource_attributes: Vec<(String, String)>,
    /// OTLP collector base endpoint; sink disabled when absent.
    pub otlp_endpoint: Option<String>,
    /// Legacy agent `host:port`; sink disabled when absent.
    pub agent_endpoint: Option<String>,
    pub queue_depth: usize,
    pub flush_interval_secs: u64,
    pub batch_size: usize,
    pub retry_limit: u32,
    pub export_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            resource_attributes: Vec::new(),
            otlp_endpoint: None,
            agent_endpoint: None,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_limit: DEFAULT_RETRY_LIMIT,
            export_timeout_secs: DEFAULT_EXPORT_TIMEOUT_SECS,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables.
    ///
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, and
    /// `OTEL_RESOURCE_ATTRIBUTES` follow the usual OpenTelemetry
    /// conventions; `APM_AGENT_ENDPOINT` enables the legacy agent sink.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(attrs) = std::env::var("OTEL_RESOURCE_ATTRIBUTES") {
            config.resource_attributes = attrs
                .split(',')
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                })
                .collect();
        }
        config.otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        config.agent_endpoint = std::env::var("APM_AGENT_ENDPOINT").ok();

        if let Some(depth) = env_parse("TELEMETRY_QUEUE_DEPTH") {
            config.queue_depth = depth;
        }
        if let Some(interval) = env_parse("TELEMETRY_FLUSH_INTERVAL_SECS") {
            config.flush_interval_secs = interval;
        }
        if let Some(size) = env_parse("TELEMETRY_BATCH_SIZE") {
            config.batch_size = size;
        }
        if let Some(limit) = env_parse("TELEMETRY_RETRY_LIMIT") {
            config.retry_limit = limit;
        }
        if let Some(timeout) = env_parse("TELEMETRY_EXPORT_TIMEOUT_SECS") {
            config.export_timeout_secs = timeout;
        }

        config
    }

    fn policy(&self) -> SinkPolicy {
        SinkPolicy {
            queue_depth: self.queue_depth,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            batch_size: self.batch_size,
            retry_limit: self.retry_limit,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Build the fanout from configuration. A backend whose sink fails to
/// construct is skipped with a warning rather than failing startup; with no
/// backend configured the fanout falls back to the log sink.
pub async fn build_fanout(config: &TelemetryConfig) -> TelemetryFanout {
    let policy = config.policy();
    let mut fanout = TelemetryFanout::new();

    if let Some(endpoint) = &config.otlp_endpoint {
        match OtlpSink::new(OtlpConfig {
            endpoint: endpoint.clone(),
            service_name: config.service_name.clone(),
            resource_attributes: config.resource_attributes.clone(),
            export_timeout: Duration::from_secs(config.export_timeout_secs),
        }) {
            Ok(sink) => {
                fanout = fanout.with_sink(Arc::new(sink), policy.clone());
                info!(endpoint = %endpoint, "OTLP telemetry sink initialized");
            },
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "OTLP sink setup failed, continuing without it");
            },
        }
    }

    if let Some(endpoint) = &config.agent_endpoint {
        match AgentSink::new(AgentConfig::new(endpoint.clone(), config.service_name.clone())).await
        {
            Ok(sink) => {
                fanout = fanout.with_sink(Arc::new(sink), policy.clone());
                info!(endpoint = %endpoint, "Legacy agent telemetry sink initialized");
            },
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "Agent sink setup failed, continuing without it");
            },
        }
    }

    if fanout.sink_count() == 0 {
        fanout = fanout.with_sink(Arc::new(LogSink::new()), policy);
        info!("No telemetry backend configured, events go to the log");
    }

    fanout
}
