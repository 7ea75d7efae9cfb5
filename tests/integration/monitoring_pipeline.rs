//! Feed → connection manager → monitor, end to end

use std::time::Duration;

use fleet_monitor::config::MonitoringConfig;
use fleet_monitor::connection::ConnectionHandle;
use fleet_monitor::messages::Severity;
use fleet_monitor::monitoring::{MonitorEvent, MonitorHandle};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;

use crate::helpers::{MockFeed, eventually, fast_connection_config, metrics_frame};

async fn next_monitor_event(rx: &mut broadcast::Receiver<MonitorEvent>) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a monitor event")
        .expect("monitor stopped")
}

async fn connected_pipeline(
    feed: &MockFeed,
    config: &MonitoringConfig,
) -> (
    ConnectionHandle,
    MonitorHandle,
    broadcast::Receiver<MonitorEvent>,
) {
    let connection = ConnectionHandle::spawn(feed.url(), fast_connection_config(2));
    let monitor = MonitorHandle::spawn(config, connection.subscribe().await.unwrap());
    let mut events = monitor.subscribe();

    connection.connect().await.unwrap();
    assert_eq!(
        next_monitor_event(&mut events).await,
        MonitorEvent::ConnectionStatusChanged { connected: true }
    );

    (connection, monitor, events)
}

#[tokio::test]
async fn test_critical_cpu_end_to_end() {
    let feed = MockFeed::start().await;
    let (connection, monitor, mut events) =
        connected_pipeline(&feed, &MonitoringConfig::default()).await;

    feed.push(metrics_frame("s1", json!({"cpu": 95, "memory": 50})));

    let MonitorEvent::AlertRaised(alert) = next_monitor_event(&mut events).await else {
        panic!("expected an alert");
    };
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.metric.as_deref(), Some("cpu"));
    assert_eq!(alert.server_id.as_deref(), Some("s1"));
    assert_eq!(alert.message, "cpu usage is critical (95%)");

    let snapshot = monitor.get_server_metrics("s1").await;
    assert_eq!(snapshot.get("cpu"), Some(95.0));
    assert_eq!(snapshot.get("memory"), Some(50.0));
    assert!(snapshot.timestamp.is_some());

    let cpu_history = monitor.get_historical_data("s1", "cpu").await;
    assert_eq!(cpu_history.len(), 1);
    assert_eq!(cpu_history[0].value, 95.0);

    assert!(!monitor.is_server_healthy("s1").await);
    assert_eq!(monitor.get_recent_alerts(10).await, vec![alert]);

    connection.shutdown().await.unwrap();
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_recovers_when_values_drop() {
    let feed = MockFeed::start().await;
    let (connection, monitor, mut events) =
        connected_pipeline(&feed, &MonitoringConfig::default()).await;
    let monitor = &monitor;

    feed.push(metrics_frame("s1", json!({"disk": 90})));
    assert!(matches!(
        next_monitor_event(&mut events).await,
        MonitorEvent::AlertRaised(_)
    ));
    assert!(!monitor.is_server_healthy("s1").await);

    feed.push(metrics_frame("s1", json!({"disk": 40})));
    eventually(|| async move { monitor.get_historical_data("s1", "disk").await.len() == 2 }).await;

    assert!(monitor.is_server_healthy("s1").await);
    assert_eq!(monitor.get_recent_alerts(10).await.len(), 1);

    connection.shutdown().await.unwrap();
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_external_alert_and_unknown_messages() {
    let feed = MockFeed::start().await;
    let (connection, monitor, mut events) =
        connected_pipeline(&feed, &MonitoringConfig::default()).await;

    feed.push(json!({"type": "inventory", "data": {"hosts": 3}}));
    feed.push(json!({
        "type": "alert",
        "serverId": "db-1",
        "data": {"type": "warning", "message": "replication lag"}
    }));

    let MonitorEvent::AlertRaised(alert) = next_monitor_event(&mut events).await else {
        panic!("expected an alert");
    };
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(alert.message, "replication lag");
    assert_eq!(alert.server_id.as_deref(), Some("db-1"));
    assert_eq!(alert.metric, None);

    let diagnostics = monitor.status().await.diagnostics;
    assert_eq!(diagnostics.ignored, 1);
    assert_eq!(diagnostics.processed, 1);

    // external alerts do not create server entries
    assert!(monitor.server_ids().await.is_empty());

    connection.shutdown().await.unwrap();
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_is_bounded_per_metric() {
    let feed = MockFeed::start().await;
    let config = MonitoringConfig {
        history_capacity: 5,
        ..MonitoringConfig::default()
    };
    let (connection, monitor, _events) = connected_pipeline(&feed, &config).await;
    let monitor = &monitor;

    for i in 0..8 {
        feed.push(metrics_frame("s1", json!({"memory": i})));
    }

    eventually(|| async move { monitor.get_server_metrics("s1").await.get("memory") == Some(7.0) })
        .await;

    let values: Vec<f64> = monitor
        .get_historical_data("s1", "memory")
        .await
        .iter()
        .map(|point| point.value)
        .collect();
    assert_eq!(values, vec![3.0, 4.0, 5.0, 6.0, 7.0]);

    connection.shutdown().await.unwrap();
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_and_disconnect_reach_status() {
    let feed = MockFeed::start().await;
    let (connection, monitor, mut events) =
        connected_pipeline(&feed, &MonitoringConfig::default()).await;
    let monitor = &monitor;

    feed.push(json!({"type": "heartbeat"}));
    eventually(|| async move { monitor.status().await.last_heartbeat.is_some() }).await;
    assert!(monitor.status().await.connected);

    connection.disconnect().await.unwrap();
    assert_eq!(
        next_monitor_event(&mut events).await,
        MonitorEvent::ConnectionStatusChanged { connected: false }
    );
    assert!(!monitor.status().await.connected);

    connection.shutdown().await.unwrap();
    monitor.shutdown().await.unwrap();
}
