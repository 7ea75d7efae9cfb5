//! Client-side monitoring state
//!
//! The aggregator turns raw feed messages into per-server snapshots, bounded
//! per-metric history and an alert log. Every accessor is total: unknown servers and
//! metrics yield empty results instead of errors.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::MonitoringConfig;
use crate::messages::{AlertPayload, InboundMessage, MetricSample};

use super::alerts::{Alert, AlertLog};
use super::history::{HistoricalSeries, MetricPoint};
use super::thresholds::Thresholds;

/// Latest known metric values of one server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,

    /// Time of the last update, `None` for servers without data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ServerSnapshot {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Counters for messages that did not update any state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Messages applied to the state
    pub processed: u64,

    /// Messages with an unhandled discriminator
    pub ignored: u64,

    /// Malformed messages
    pub dropped: u64,
}

/// Per-server metrics, history and alerts
#[derive(Debug, Clone)]
pub struct MonitoringAggregator {
    history_capacity: usize,
    thresholds: Thresholds,
    servers: HashMap<String, ServerSnapshot>,
    history: HashMap<String, HashMap<String, HistoricalSeries>>,
    alerts: AlertLog,
    diagnostics: Diagnostics,
}

impl MonitoringAggregator {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            history_capacity: config.history_capacity,
            thresholds: config.thresholds(),
            servers: HashMap::new(),
            history: HashMap::new(),
            alerts: AlertLog::with_capacity(config.alert_capacity),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Apply one raw feed message
    ///
    /// Returns the alerts the message created. Malformed and unknown messages are
    /// dropped without touching the state.
    pub fn on_message(&mut self, raw: &Value) -> Vec<Alert> {
        match InboundMessage::decode(raw) {
            Ok(Some(message)) => {
                self.diagnostics.processed += 1;
                self.apply(message)
            }
            Ok(None) => {
                trace!("ignoring message with unhandled type");
                self.diagnostics.ignored += 1;
                Vec::new()
            }
            Err(e) => {
                debug!("dropping message: {e}");
                self.diagnostics.dropped += 1;
                Vec::new()
            }
        }
    }

    /// Apply an already decoded message
    pub fn apply(&mut self, message: InboundMessage) -> Vec<Alert> {
        match message {
            InboundMessage::Metrics(sample) => self.record_metrics(sample),
            InboundMessage::Alert(payload) => vec![self.record_alert(payload)],
        }
    }

    fn record_metrics(&mut self, sample: MetricSample) -> Vec<Alert> {
        let MetricSample {
            server_id,
            values,
            received_at,
        } = sample;

        trace!(%server_id, metrics = values.len(), "recording metrics");

        let snapshot = self.servers.entry(server_id.clone()).or_default();
        snapshot
            .metrics
            .extend(values.iter().map(|(metric, value)| (metric.clone(), *value)));
        snapshot.timestamp = Some(received_at);

        let capacity = self.history_capacity;
        let server_history = self.history.entry(server_id.clone()).or_default();
        for (metric, value) in &values {
            server_history
                .entry(metric.clone())
                .or_insert_with(|| HistoricalSeries::with_capacity(capacity))
                .push(MetricPoint {
                    timestamp: received_at,
                    value: *value,
                });
        }

        let mut raised = Vec::new();
        for (metric, value) in &values {
            if let Some(severity) = self.thresholds.classify(metric, *value) {
                debug!(%server_id, %metric, value, %severity, "threshold reached");
                raised.push(
                    self.alerts
                        .record_metric_alert(&server_id, metric, severity, *value),
                );
            }
        }

        raised
    }

    fn record_alert(&mut self, payload: AlertPayload) -> Alert {
        debug!(severity = %payload.severity, "recording external alert");
        self.alerts.record_external(payload)
    }

    /// Current snapshot of a server, empty if unknown
    pub fn get_server_metrics(&self, server_id: &str) -> ServerSnapshot {
        self.servers.get(server_id).cloned().unwrap_or_default()
    }

    /// History of one metric, oldest first, empty if nothing was recorded
    pub fn get_historical_data(&self, server_id: &str, metric: &str) -> Vec<MetricPoint> {
        self.history
            .get(server_id)
            .and_then(|metrics| metrics.get(metric))
            .map(HistoricalSeries::to_vec)
            .unwrap_or_default()
    }

    /// Up to `limit` alerts, most recent first
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.recent(limit)
    }

    /// False once any known metric meets its warning threshold.
    ///
    /// Servers without data are reported healthy.
    pub fn is_server_healthy(&self, server_id: &str) -> bool {
        let Some(snapshot) = self.servers.get(server_id) else {
            return true;
        };

        !snapshot.metrics.iter().any(|(metric, value)| {
            self.thresholds
                .get(metric)
                .is_some_and(|threshold| *value >= threshold.warning)
        })
    }

    /// Merge per-metric threshold overrides into the active set
    pub fn update_thresholds(&mut self, partial: Thresholds) {
        self.thresholds.merge(partial);
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Known server identifiers, sorted
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Forget all metrics, history and alerts. Thresholds are kept.
    pub fn reset(&mut self) {
        self.servers.clear();
        self.history.clear();
        self.alerts.clear();
    }
}

impl Default for MonitoringAggregator {
    fn default() -> Self {
        Self::new(&MonitoringConfig::default())
    }
}
