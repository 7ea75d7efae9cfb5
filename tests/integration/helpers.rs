//! Helper functions for integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleet_monitor::config::ConnectionConfig;
use fleet_monitor::connection::ConnectionEvent;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection limits small enough for tests
pub fn fast_connection_config(max_reconnect_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        max_reconnect_attempts,
        reconnect_delay_ms: 30,
        heartbeat_interval_ms: 0,
    }
}

#[derive(Debug, Clone)]
enum FeedAction {
    Frame(String),
    Close,
}

/// In-process WebSocket server standing in for the monitoring feed
pub struct MockFeed {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    actions: broadcast::Sender<FeedAction>,
    received: mpsc::UnboundedReceiver<Value>,
}

impl MockFeed {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (actions, _) = broadcast::channel(64);
        let (received_tx, received) = mpsc::unbounded_channel();

        let task_accepted = accepted.clone();
        let task_actions = actions.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                task_accepted.fetch_add(1, Ordering::SeqCst);

                // subscribed before the handshake completes, so nothing sent after
                // the client sees `Connected` is lost
                let mut actions = task_actions.subscribe();
                let received_tx = received_tx.clone();

                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };

                    loop {
                        tokio::select! {
                            action = actions.recv() => match action {
                                Ok(FeedAction::Frame(text)) => {
                                    if ws.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(FeedAction::Close) | Err(_) => {
                                    let _ = ws.close(None).await;
                                    // drain until the client acknowledges the close
                                    while let Some(Ok(_)) = ws.next().await {}
                                    break;
                                }
                            },

                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str(&text) {
                                        let _ = received_tx.send(value);
                                    }
                                }
                                Some(Ok(_)) => {}
                                Some(Err(_)) | None => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            actions,
            received,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Send a JSON frame to every connected client
    pub fn push(&self, value: Value) {
        self.push_raw(value.to_string());
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        self.actions.send(FeedAction::Frame(text.into())).unwrap();
    }

    /// Close every open client connection from the server side
    pub fn close_all(&self) {
        let _ = self.actions.send(FeedAction::Close);
    }

    /// Next JSON frame sent by a client
    pub async fn next_received(&mut self) -> Value {
        tokio::time::timeout(EVENT_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("mock feed stopped")
    }

    /// Discard client frames received so far
    pub fn clear_received(&mut self) {
        while self.received.try_recv().is_ok() {}
    }

    /// Fail if a client sends anything within `period`
    pub async fn assert_nothing_received(&mut self, period: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(period, self.received.recv()).await {
            panic!("unexpected client frame: {frame}");
        }
    }
}

/// Listener that accepts TCP connections and drops them before the WebSocket
/// handshake, counting every attempt
pub async fn dropping_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let task_attempts = attempts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            task_attempts.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (format!("ws://{addr}"), attempts)
}

/// Next connection event, failing the test on timeout
pub async fn next_event(rx: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("connection event feed closed")
}

/// Skip events until one matches
pub async fn wait_for(
    rx: &mut mpsc::Receiver<ConnectionEvent>,
    matches: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Poll an async condition until it holds
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn metrics_frame(server_id: &str, data: Value) -> Value {
    serde_json::json!({
        "type": "metrics",
        "serverId": server_id,
        "data": data,
    })
}
