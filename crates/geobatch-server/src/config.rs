//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use geobatch_pipeline::{GuardConfig, HttpGeocoderConfig, PipelineConfig, PoolConfig};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 7979;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default maximum upload size in bytes (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Default maximum multipart part count.
pub const DEFAULT_MAX_PARTS: usize = 100;

/// Default maximum header row size in bytes.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;

/// Default per-request deadline in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default geocode worker concurrency per batch.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;

/// Default cancellation grace period in milliseconds.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;

/// Default delimiter-sniffing sample size in bytes.
pub const DEFAULT_SNIFF_SAMPLE_BYTES: usize = 8192;

/// Default internal channel depth of the batch pipeline.
pub const DEFAULT_CHANNEL_DEPTH: usize = 32;

/// Default geocoding engine base URL.
pub const DEFAULT_GEOCODER_URL: &str = "http://127.0.0.1:7878";

/// Default engine call timeout in seconds.
pub const DEFAULT_GEOCODER_TIMEOUT_SECS: u64 = 10;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub pipeline: PipelineTuning,
    pub geocoder: GeocoderConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Upload admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_bytes: u64,
    pub max_parts: usize,
    pub max_header_bytes: usize,
    pub request_timeout_secs: u64,
}

/// Batch pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTuning {
    pub worker_concurrency: usize,
    pub grace_period_ms: u64,
    pub sniff_sample_bytes: usize,
    pub channel_depth: usize,
}

/// Geocoding engine client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env_or("GEOBATCH_HOST", DEFAULT_SERVER_HOST),
                port: env_parse("GEOBATCH_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "GEOBATCH_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            limits: LimitsConfig {
                max_upload_bytes: env_parse("GEOBATCH_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                max_parts: env_parse("GEOBATCH_MAX_PARTS", DEFAULT_MAX_PARTS),
                max_header_bytes: env_parse("GEOBATCH_MAX_HEADER_BYTES", DEFAULT_MAX_HEADER_BYTES),
                request_timeout_secs: env_parse(
                    "GEOBATCH_REQUEST_TIMEOUT",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
            },
            pipeline: PipelineTuning {
                worker_concurrency: env_parse(
                    "GEOBATCH_WORKER_CONCURRENCY",
                    DEFAULT_WORKER_CONCURRENCY,
                ),
                grace_period_ms: env_parse("GEOBATCH_GRACE_PERIOD_MS", DEFAULT_GRACE_PERIOD_MS),
                sniff_sample_bytes: env_parse(
                    "GEOBATCH_SNIFF_SAMPLE_BYTES",
                    DEFAULT_SNIFF_SAMPLE_BYTES,
                ),
                channel_depth: env_parse("GEOBATCH_CHANNEL_DEPTH", DEFAULT_CHANNEL_DEPTH),
            },
            geocoder: GeocoderConfig {
                base_url: env_or("GEOBATCH_GEOCODER_URL", DEFAULT_GEOCODER_URL),
                timeout_secs: env_parse(
                    "GEOBATCH_GEOCODER_TIMEOUT",
                    DEFAULT_GEOCODER_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: env_or("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS", true),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }
        if self.limits.max_upload_bytes == 0 {
            anyhow::bail!("Max upload bytes must be greater than 0");
        }
        if self.pipeline.worker_concurrency == 0 {
            anyhow::bail!("Worker concurrency must be greater than 0");
        }
        if self.geocoder.base_url.is_empty() {
            anyhow::bail!("Geocoder base URL cannot be empty");
        }
        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }
        Ok(())
    }

    /// Guard limits for the ingestion pipeline.
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            max_bytes: self.limits.max_upload_bytes,
            max_parts: self.limits.max_parts,
            max_header_bytes: self.limits.max_header_bytes,
            request_timeout: Duration::from_secs(self.limits.request_timeout_secs),
        }
    }

    /// Pipeline tuning for one batch request.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sniff_sample_bytes: self.pipeline.sniff_sample_bytes,
            max_header_bytes: self.limits.max_header_bytes,
            channel_depth: self.pipeline.channel_depth,
            pool: PoolConfig {
                concurrency: self.pipeline.worker_concurrency,
                grace_period: Duration::from_millis(self.pipeline.grace_period_ms),
            },
        }
    }

    /// Engine client configuration.
    pub fn geocoder_config(&self) -> HttpGeocoderConfig {
        HttpGeocoderConfig {
            base_url: self.geocoder.base_url.clone(),
            timeout: Duration::from_secs(self.geocoder.timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            limits: LimitsConfig {
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                max_parts: DEFAULT_MAX_PARTS,
                max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            pipeline: PipelineTuning {
                worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
                grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
                sniff_sample_bytes: DEFAULT_SNIFF_SAMPLE_BYTES,
                channel_depth: DEFAULT_CHANNEL_DEPTH,
            },
            geocoder: GeocoderConfig {
                base_url: DEFAULT_GEOCODER_URL.to_string(),
                timeout_secs: DEFAULT_GEOCODER_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.pipeline.worker_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_guard_config_mirrors_limits() {
        let config = Config::default();
        let guard = config.guard_config();
        assert_eq!(guard.max_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(guard.max_parts, DEFAULT_MAX_PARTS);
        assert_eq!(
            guard.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_pipeline_config_mirrors_tuning() {
        let config = Config::default();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.pool.concurrency, DEFAULT_WORKER_CONCURRENCY);
        assert_eq!(pipeline.channel_depth, DEFAULT_CHANNEL_DEPTH);
    }
}
