//! Display sinks fed from the monitor's event stream

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::messages::Severity;

use super::alerts::Alert;

/// Receiver of alert and connection notifications
///
/// Implementations must not block: they run on the forwarding task spawned by
/// [`MonitorHandle::forward_to`](super::MonitorHandle::forward_to).
#[async_trait]
pub trait MonitorSink: Send + Sync {
    async fn on_alert(&self, alert: &Alert);

    async fn on_connection_status(&self, connected: bool);

    async fn on_reconnect_exhausted(&self) {}
}

/// Sink writing notifications to the tracing log
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    /// Shown in front of every line
    pub label: Option<String>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    fn prefix(&self) -> String {
        self.label
            .as_ref()
            .map(|label| format!("[{label}] "))
            .unwrap_or_default()
    }
}

#[async_trait]
impl MonitorSink for LogSink {
    async fn on_alert(&self, alert: &Alert) {
        let server = alert.server_id.as_deref().unwrap_or("-");
        match alert.severity {
            Severity::Critical => {
                error!("{}{server}: {}", self.prefix(), alert.message)
            }
            Severity::Warning => warn!("{}{server}: {}", self.prefix(), alert.message),
        }
    }

    async fn on_connection_status(&self, connected: bool) {
        if connected {
            info!("{}connected to monitoring feed", self.prefix());
        } else {
            warn!("{}disconnected from monitoring feed", self.prefix());
        }
    }

    async fn on_reconnect_exhausted(&self) {
        error!("{}gave up reconnecting to monitoring feed", self.prefix());
    }
}
