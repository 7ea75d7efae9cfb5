//! Alert records and the bounded alert log

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{AlertPayload, Severity};

/// Alert entry for the alerts timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Creation time in milliseconds, bumped to stay strictly increasing
    pub id: i64,
    #[serde(rename = "type")]
    pub severity: Severity,
    pub metric: Option<String>,
    pub server_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Message for a metric crossing one of its thresholds
pub fn format_usage_message(metric: &str, severity: Severity, value: f64) -> String {
    match severity {
        Severity::Critical => format!("{metric} usage is critical ({value}%)"),
        Severity::Warning => format!("{metric} usage is high ({value}%)"),
    }
}

/// Most-recent-first alert log with FIFO eviction of the oldest entry
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: VecDeque<Alert>,
    capacity: usize,
    last_id: i64,
}

impl AlertLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
            last_id: 0,
        }
    }

    /// Record an alert derived from a metric value
    pub fn record_metric_alert(
        &mut self,
        server_id: &str,
        metric: &str,
        severity: Severity,
        value: f64,
    ) -> Alert {
        self.insert(
            severity,
            Some(metric.to_string()),
            Some(server_id.to_string()),
            format_usage_message(metric, severity, value),
        )
    }

    /// Record an externally-originated alert as-is
    pub fn record_external(&mut self, payload: AlertPayload) -> Alert {
        let AlertPayload {
            severity,
            message,
            metric,
            server_id,
        } = payload;

        self.insert(severity, metric, server_id, message)
    }

    fn insert(
        &mut self,
        severity: Severity,
        metric: Option<String>,
        server_id: Option<String>,
        message: String,
    ) -> Alert {
        let timestamp = Utc::now();
        let id = timestamp.timestamp_millis().max(self.last_id + 1);
        self.last_id = id;

        let alert = Alert {
            id,
            severity,
            metric,
            server_id,
            message,
            timestamp,
        };

        if self.capacity == 0 {
            return alert;
        }

        if self.alerts.len() == self.capacity {
            self.alerts.pop_back();
        }
        self.alerts.push_front(alert.clone());

        alert
    }

    /// Up to `limit` alerts, most recent first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.alerts.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}
