//! Feed server against the connection manager and monitor

use std::collections::BTreeMap;
use std::net::SocketAddr;

use fleet_monitor::config::{ConnectionConfig, MonitoringConfig};
use fleet_monitor::connection::{ConnectionEvent, ConnectionHandle};
use fleet_monitor::feed::{FEED_PATH, FeedConfig, FeedState, spawn_feed_server};
use fleet_monitor::messages::{AlertPayload, Severity, WireMessage};
use fleet_monitor::monitoring::MonitorHandle;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::helpers::{eventually, fast_connection_config, next_event, wait_for};

async fn start_feed() -> (SocketAddr, FeedState) {
    let state = FeedState::new(64);
    let config = FeedConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        enable_cors: true,
    };
    let addr = spawn_feed_server(config, state.clone()).await.unwrap();
    (addr, state)
}

fn feed_url(addr: SocketAddr) -> String {
    format!("ws://{addr}{FEED_PATH}")
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _state) = start_feed().await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));
    assert!(response.contains(r#""clients":0"#));
}

#[tokio::test]
async fn test_published_metrics_reach_monitor() {
    let (addr, state) = start_feed().await;

    let connection = ConnectionHandle::spawn(feed_url(addr), fast_connection_config(2));
    let monitor = MonitorHandle::spawn(
        &MonitoringConfig::default(),
        connection.subscribe().await.unwrap(),
    );
    let mut events = connection.subscribe().await.unwrap();

    connection.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    let feed_state = &state;
    eventually(|| async move { feed_state.client_count() == 1 }).await;

    state
        .publish(&WireMessage::Metrics {
            server_id: "feed-host".into(),
            data: BTreeMap::from([("cpu".to_string(), 91.0), ("memory".to_string(), 30.0)]),
        })
        .unwrap();
    state
        .publish(&WireMessage::Alert {
            server_id: Some("feed-host".into()),
            data: AlertPayload {
                severity: Severity::Warning,
                message: "backup overdue".into(),
                metric: None,
                server_id: None,
            },
        })
        .unwrap();

    let monitor_ref = &monitor;
    eventually(|| async move { monitor_ref.get_recent_alerts(10).await.len() == 2 }).await;

    let alerts = monitor.get_recent_alerts(10).await;
    assert_eq!(alerts[0].message, "backup overdue");
    assert_eq!(alerts[1].message, "cpu usage is critical (91%)");
    assert_eq!(
        monitor.get_server_metrics("feed-host").await.get("memory"),
        Some(30.0)
    );

    connection.shutdown().await.unwrap();
    eventually(|| async move { feed_state.client_count() == 0 }).await;
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_posted_alert_reaches_monitor() {
    let (addr, state) = start_feed().await;

    let connection = ConnectionHandle::spawn(feed_url(addr), fast_connection_config(2));
    let monitor = MonitorHandle::spawn(
        &MonitoringConfig::default(),
        connection.subscribe().await.unwrap(),
    );
    connection.connect().await.unwrap();

    let feed_state = &state;
    eventually(|| async move { feed_state.client_count() == 1 }).await;

    let body = r#"{"severity":"critical","message":"disk array degraded","serverId":"nas-1"}"#;
    let request = format!(
        "POST /api/alerts HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""delivered":1"#));

    let monitor_ref = &monitor;
    eventually(|| async move { !monitor_ref.get_recent_alerts(10).await.is_empty() }).await;

    let alerts = monitor.get_recent_alerts(10).await;
    let alert = &alerts[0];
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.message, "disk array degraded");
    assert_eq!(alert.server_id.as_deref(), Some("nas-1"));

    connection.shutdown().await.unwrap();
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_are_echoed() {
    let (addr, _state) = start_feed().await;

    let config = ConnectionConfig {
        heartbeat_interval_ms: 50,
        ..fast_connection_config(2)
    };
    let connection = ConnectionHandle::spawn(feed_url(addr), config);
    let mut events = connection.subscribe().await.unwrap();

    connection.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    wait_for(&mut events, |e| *e == ConnectionEvent::Heartbeat).await;

    connection.shutdown().await.unwrap();
}
