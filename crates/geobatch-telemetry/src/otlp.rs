//! OTLP collector sink
//!
//! Exports batches of events as OTLP/HTTP JSON spans to a collector
//! endpoint. Each batch becomes one `POST {endpoint}/v1/traces` request.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::event::{AttrValue, EventStatus, TelemetryEvent};
use crate::sink::EventSink;

/// Configuration for the OTLP sink.
#[derive(Debug, Clone)]
pub struct OtlpConfig {
    /// Collector base endpoint, e.g. `http://otel-collector:4318`.
    pub endpoint: String,
    pub service_name: String,
    /// Extra resource attributes attached to every exported span.
    pub resource_attributes: Vec<(String, String)>,
    pub export_timeout: Duration,
}

#[derive(Debug)]
pub struct OtlpSink {
    client: reqwest::Client,
    traces_url: String,
    resource: Value,
}

impl OtlpSink {
    pub fn new(config: OtlpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.export_timeout)
            .build()?;

        let traces_url = format!("{}/v1/traces", config.endpoint.trim_end_matches('/'));

        let mut attributes = vec![json!({
            "key": "service.name",
            "value": { "stringValue": config.service_name }
        })];
        for (key, value) in &config.resource_attributes {
            attributes.push(json!({
                "key": key,
                "value": { "stringValue": value }
            }));
        }

        Ok(Self {
            client,
            traces_url,
            resource: json!({ "attributes": attributes }),
        })
    }

    fn span_json(event: &TelemetryEvent) -> Value {
        let start_nanos = event.start.timestamp_nanos_opt().unwrap_or(0).max(0) as u128;
        let end_nanos = start_nanos + event.duration.as_nanos();
        // Span ids are not part of the event model; each exported span gets
        // a fresh one, correlation happens via the trace id.
        let span_id = format!("{:016x}", uuid::Uuid::new_v4().as_u64_pair().0);

        let attributes: Vec<Value> = std::iter::once(json!({
            "key": "event.kind",
            "value": { "stringValue": event.kind.as_str() }
        }))
        .chain(
            event
                .attributes
                .iter()
                .map(|(key, value)| json!({ "key": key, "value": attr_json(value) })),
        )
        .collect();

        json!({
            "traceId": event.trace_context.as_hex(),
            "spanId": span_id,
            "name": event.name,
            "kind": 2,
            "startTimeUnixNano": start_nanos.to_string(),
            "endTimeUnixNano": end_nanos.to_string(),
            "attributes": attributes,
            "status": {
                "code": match event.status {
                    EventStatus::Ok => 1,
                    EventStatus::Error => 2,
                }
            }
        })
    }
}

fn attr_json(value: &AttrValue) -> Value {
    match value {
        AttrValue::String(s) => json!({ "stringValue": s }),
        AttrValue::Int(i) => json!({ "intValue": i.to_string() }),
        AttrValue::Float(f) => json!({ "doubleValue": f }),
        AttrValue::Bool(b) => json!({ "boolValue": b }),
    }
}

#[async_trait]
impl EventSink for OtlpSink {
    fn name(&self) -> &'static str {
        "otlp"
    }

    async fn export(&self, batch: &[TelemetryEvent]) -> anyhow::Result<()> {
        let spans: Vec<Value> = batch.iter().map(Self::span_json).collect();
        let body = json!({
            "resourceSpans": [{
                "resource": self.resource,
                "scopeSpans": [{
                    "scope": { "name": "geobatch" },
                    "spans": spans
                }]
            }]
        });

        let response = self.client.post(&self.traces_url).json(&body).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}
