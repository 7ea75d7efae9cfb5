//! Wire messages of the monitoring feed
//!
//! Every frame on the push connection is a JSON envelope:
//!
//! ```text
//! { "type": "metrics" | "alert" | "heartbeat", "serverId"?: string, "data": object }
//! ```
//!
//! `heartbeat` frames are consumed by the connection manager. The aggregator only ever
//! sees the closed set of [`InboundMessage`] kinds; anything else is ignored so newer
//! feeds can add message types without breaking older viewers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Discriminator of the heartbeat frame
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// JSON envelope as sent by the monitoring feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Metrics {
        #[serde(rename = "serverId")]
        server_id: String,
        data: BTreeMap<String, f64>,
    },
    Alert {
        #[serde(rename = "serverId", default, skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
        data: AlertPayload,
    },
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    pub fn heartbeat() -> Value {
        serde_json::json!({ "type": HEARTBEAT_TYPE })
    }

    /// Whether a decoded frame is a heartbeat
    pub fn is_heartbeat(value: &Value) -> bool {
        value.get("type").and_then(Value::as_str) == Some(HEARTBEAT_TYPE)
    }
}

/// Externally-originated alert, e.g. a collaborator reporting a service outage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[serde(alias = "type")]
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

/// One batch of metric values for a single server
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub server_id: String,
    pub values: BTreeMap<String, f64>,
    pub received_at: DateTime<Utc>,
}

/// Message kinds the aggregator acts on
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Metrics(MetricSample),
    Alert(AlertPayload),
}

/// Why an inbound message was dropped
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message has an empty server id")]
    EmptyServerId,
}

impl InboundMessage {
    /// Decode a raw frame
    ///
    /// Returns `Ok(None)` for message kinds the aggregator does not handle
    /// (heartbeats and unknown discriminators).
    pub fn decode(raw: &Value) -> Result<Option<Self>, DecodeError> {
        let wire = WireMessage::deserialize(raw)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        match wire {
            WireMessage::Metrics { server_id, data } => {
                if server_id.is_empty() {
                    return Err(DecodeError::EmptyServerId);
                }
                Ok(Some(InboundMessage::Metrics(MetricSample {
                    server_id,
                    values: data,
                    received_at: Utc::now(),
                })))
            }
            WireMessage::Alert { server_id, mut data } => {
                if data.server_id.is_none() {
                    data.server_id = server_id;
                }
                Ok(Some(InboundMessage::Alert(data)))
            }
            WireMessage::Heartbeat | WireMessage::Unknown => Ok(None),
        }
    }
}
