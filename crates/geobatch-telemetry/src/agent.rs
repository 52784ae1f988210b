//! Legacy APM agent sink
//!
//! Speaks the line-oriented datagram protocol of the legacy agent: each
//! event is one JSON line, lines are packed into UDP datagrams up to a
//! fixed size and sent to a local or sidecar agent endpoint.

use async_trait::async_trait;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};

use crate::event::{AttrValue, TelemetryEvent};
use crate::sink::EventSink;

/// Configuration for the legacy agent sink.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent endpoint as `host:port`.
    pub endpoint: String,
    pub service_name: String,
    /// Upper bound for one datagram; oversized single lines are sent as-is
    /// and left to the agent to reject.
    pub max_datagram_bytes: usize,
}

impl AgentConfig {
    pub fn new(endpoint: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            max_datagram_bytes: 8192,
        }
    }
}

#[derive(Debug)]
pub struct AgentSink {
    socket: UdpSocket,
    target: SocketAddr,
    service_name: String,
    max_datagram_bytes: usize,
}

impl AgentSink {
    pub async fn new(config: AgentConfig) -> anyhow::Result<Self> {
        let target = lookup_host(&config.endpoint)
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("failed to resolve agent address: {}", config.endpoint))?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            target,
            service_name: config.service_name,
            max_datagram_bytes: config.max_datagram_bytes,
        })
    }

    fn event_line(&self, event: &TelemetryEvent) -> String {
        let meta: serde_json::Map<String, serde_json::Value> = event
            .attributes
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    AttrValue::String(s) => json!(s),
                    AttrValue::Int(i) => json!(i),
                    AttrValue::Float(f) => json!(f),
                    AttrValue::Bool(b) => json!(b),
                };
                (key.to_string(), value)
            })
            .collect();

        json!({
            "service": self.service_name,
            "kind": event.kind.as_str(),
            "name": event.name,
            "trace_id": event.trace_context.as_hex(),
            "start_ms": event.start.timestamp_millis(),
            "duration_ms": event.duration.as_millis() as u64,
            "status": event.status.as_str(),
            "meta": meta,
        })
        .to_string()
    }
}

/// Pack newline-terminated lines into payloads not exceeding `max_bytes`.
/// A single oversized line still becomes its own payload.
fn pack_datagrams(lines: &[String], max_bytes: usize) -> Vec<String> {
    let mut datagrams = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + line.len() + 1 > max_bytes {
            datagrams.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        datagrams.push(current);
    }
    datagrams
}

#[async_trait]
impl EventSink for AgentSink {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn export(&self, batch: &[TelemetryEvent]) -> anyhow::Result<()> {
        let lines: Vec<String> = batch.iter().map(|event| self.event_line(event)).collect();
        for datagram in pack_datagrams(&lines, self.max_datagram_bytes) {
            self.socket.send_to(datagram.as_bytes(), self.target).await?;
        }
        Ok(())
    }
}
