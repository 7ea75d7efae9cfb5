//! Monitoring aggregation: per-server snapshots, bounded history and alerting

mod actor;
mod aggregator;
mod alerts;
mod history;
mod sink;
mod thresholds;

pub use actor::{
    DEFAULT_ALERT_LIMIT, MonitorActor, MonitorCommand, MonitorEvent, MonitorHandle, MonitorStatus,
};
pub use aggregator::{Diagnostics, MonitoringAggregator, ServerSnapshot};
pub use alerts::{Alert, AlertLog, format_usage_message};
pub use history::{HistoricalSeries, MetricPoint};
pub use sink::{LogSink, MonitorSink};
pub use thresholds::{Threshold, Thresholds};
