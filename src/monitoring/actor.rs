//! MonitorActor - runs the aggregator behind a command channel
//!
//! The actor consumes the connection manager's event feed, so all state mutations
//! happen on one task in delivery order. Readers query it over oneshot replies and
//! display sinks subscribe to [`MonitorEvent`]s.
//!
//! ```text
//! ConnectionEvent ──► MonitorActor ──► MonitoringAggregator
//!                         │   ▲
//!        MonitorEvent ◄───┘   └─── MonitorCommand (queries, thresholds, reset)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::config::MonitoringConfig;
use crate::connection::ConnectionEvent;

use super::aggregator::{Diagnostics, MonitoringAggregator, ServerSnapshot};
use super::alerts::Alert;
use super::history::MetricPoint;
use super::sink::MonitorSink;
use super::thresholds::Thresholds;

/// Default number of alerts returned by [`MonitorHandle::get_recent_alerts`] callers
pub const DEFAULT_ALERT_LIMIT: usize = 10;

/// Most queued connection events applied ahead of a single command
const MAX_EVENTS_PER_COMMAND: usize = 256;

/// Notifications for display sinks
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// An alert was added to the log
    AlertRaised(Alert),

    /// The push connection opened or closed
    ConnectionStatusChanged { connected: bool },

    /// The connection manager gave up reconnecting
    ReconnectExhausted,
}

/// Connection-level view kept by the monitor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonitorStatus {
    pub connected: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
    pub diagnostics: Diagnostics,
}

/// Commands that can be sent to the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    GetServerMetrics {
        server_id: String,
        respond_to: oneshot::Sender<ServerSnapshot>,
    },
    GetHistoricalData {
        server_id: String,
        metric: String,
        respond_to: oneshot::Sender<Vec<MetricPoint>>,
    },
    GetRecentAlerts {
        limit: usize,
        respond_to: oneshot::Sender<Vec<Alert>>,
    },
    IsServerHealthy {
        server_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    GetServerIds {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    GetThresholds {
        respond_to: oneshot::Sender<Thresholds>,
    },
    GetStatus {
        respond_to: oneshot::Sender<MonitorStatus>,
    },

    /// Merge threshold overrides into the active set
    UpdateThresholds { thresholds: Thresholds },

    /// Forget metrics, history and alerts
    Reset,

    /// Gracefully shut down the monitor actor
    Shutdown,
}

/// Actor that owns the monitoring state
pub struct MonitorActor {
    aggregator: MonitoringAggregator,

    /// Event feed of the connection manager
    connection_rx: mpsc::Receiver<ConnectionEvent>,

    /// Whether the connection feed is still open
    feed_open: bool,

    command_rx: mpsc::Receiver<MonitorCommand>,

    event_tx: broadcast::Sender<MonitorEvent>,

    /// Dropped with the actor, which wakes every watcher
    _running: watch::Sender<()>,

    status: MonitorStatus,
}

impl MonitorActor {
    pub fn new(
        aggregator: MonitoringAggregator,
        connection_rx: mpsc::Receiver<ConnectionEvent>,
        command_rx: mpsc::Receiver<MonitorCommand>,
        event_tx: broadcast::Sender<MonitorEvent>,
        running: watch::Sender<()>,
    ) -> Self {
        Self {
            aggregator,
            connection_rx,
            feed_open: true,
            command_rx,
            event_tx,
            _running: running,
            status: MonitorStatus::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        loop {
            tokio::select! {
                event = self.connection_rx.recv(), if self.feed_open => {
                    match event {
                        Some(event) => self.handle_connection_event(event),
                        None => self.close_feed(),
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    // a query sees the events queued before it
                    self.drain_connection_events();
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
            }
        }

        debug!("monitor actor stopped");
    }

    fn close_feed(&mut self) {
        debug!("connection event feed closed");
        self.feed_open = false;
    }

    /// Apply already queued events, at most [`MAX_EVENTS_PER_COMMAND`] of them
    fn drain_connection_events(&mut self) {
        if !self.feed_open {
            return;
        }

        for _ in 0..MAX_EVENTS_PER_COMMAND {
            match self.connection_rx.try_recv() {
                Ok(event) => self.handle_connection_event(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.close_feed();
                    return;
                }
            }
        }

        trace!("event backlog exceeds {MAX_EVENTS_PER_COMMAND}, serving command first");
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(raw) => {
                self.status.last_message = Some(Utc::now());
                for alert in self.aggregator.on_message(&raw) {
                    self.publish(MonitorEvent::AlertRaised(alert));
                }
                self.status.diagnostics = self.aggregator.diagnostics();
            }
            ConnectionEvent::Connected => {
                self.status.connected = true;
                self.publish(MonitorEvent::ConnectionStatusChanged { connected: true });
            }
            ConnectionEvent::Disconnected => {
                self.status.connected = false;
                self.publish(MonitorEvent::ConnectionStatusChanged { connected: false });
            }
            ConnectionEvent::Heartbeat => {
                self.status.last_heartbeat = Some(Utc::now());
            }
            ConnectionEvent::Error(e) => {
                debug!("connection reported: {e}");
            }
            ConnectionEvent::MaxReconnectAttemptsReached => {
                self.publish(MonitorEvent::ReconnectExhausted);
            }
        }
    }

    /// Returns `false` when the actor should stop
    fn handle_command(&mut self, cmd: MonitorCommand) -> bool {
        match cmd {
            MonitorCommand::GetServerMetrics {
                server_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.aggregator.get_server_metrics(&server_id));
            }
            MonitorCommand::GetHistoricalData {
                server_id,
                metric,
                respond_to,
            } => {
                let _ = respond_to.send(self.aggregator.get_historical_data(&server_id, &metric));
            }
            MonitorCommand::GetRecentAlerts { limit, respond_to } => {
                let _ = respond_to.send(self.aggregator.get_recent_alerts(limit));
            }
            MonitorCommand::IsServerHealthy {
                server_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.aggregator.is_server_healthy(&server_id));
            }
            MonitorCommand::GetServerIds { respond_to } => {
                let _ = respond_to.send(self.aggregator.server_ids());
            }
            MonitorCommand::GetThresholds { respond_to } => {
                let _ = respond_to.send(self.aggregator.thresholds().clone());
            }
            MonitorCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status);
            }
            MonitorCommand::UpdateThresholds { thresholds } => {
                debug!("updating thresholds");
                self.aggregator.update_thresholds(thresholds);
            }
            MonitorCommand::Reset => {
                debug!("resetting monitoring state");
                self.aggregator.reset();
            }
            MonitorCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }

        true
    }

    fn publish(&self, event: MonitorEvent) {
        // no subscribers is fine
        match self.event_tx.send(event) {
            Ok(receivers) => trace!("published monitor event to {receivers} receivers"),
            Err(_) => trace!("no receivers for monitor event"),
        }
    }
}

/// Handle for querying and controlling a MonitorActor
///
/// Queries never fail: if the actor is gone they fall back to the empty answer.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    event_tx: broadcast::Sender<MonitorEvent>,
    running: watch::Receiver<()>,
}

async fn deliver(sink: &dyn MonitorSink, event: MonitorEvent) {
    match event {
        MonitorEvent::AlertRaised(alert) => sink.on_alert(&alert).await,
        MonitorEvent::ConnectionStatusChanged { connected } => {
            sink.on_connection_status(connected).await
        }
        MonitorEvent::ReconnectExhausted => sink.on_reconnect_exhausted().await,
    }
}

impl MonitorHandle {
    /// Spawn a monitor fed by a connection event receiver
    pub fn spawn(
        config: &MonitoringConfig,
        connection_rx: mpsc::Receiver<ConnectionEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);
        let (running_tx, running) = watch::channel(());

        let actor = MonitorActor::new(
            MonitoringAggregator::new(config),
            connection_rx,
            cmd_rx,
            event_tx.clone(),
            running_tx,
        );
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            event_tx,
            running,
        }
    }

    /// Receive alerts and connection status changes
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Drive a sink from this monitor's events until the monitor stops
    ///
    /// Events published before the actor stopped are still delivered.
    pub fn forward_to(&self, sink: Arc<dyn MonitorSink>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        let mut running = self.running.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => deliver(sink.as_ref(), event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("sink lagged, skipped {skipped} monitor events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },

                    // only errors once the actor is gone
                    _ = running.changed() => {
                        while let Ok(event) = events.try_recv() {
                            deliver(sink.as_ref(), event).await;
                        }
                        debug!("monitor stopped, sink forwarder done");
                        break;
                    }
                }
            }
        })
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(make(tx)).await.is_err() {
            warn!("monitor actor is not running");
            return None;
        }
        rx.await.ok()
    }

    /// Current snapshot of a server, empty if unknown
    pub async fn get_server_metrics(&self, server_id: impl Into<String>) -> ServerSnapshot {
        let server_id = server_id.into();
        self.query(|respond_to| MonitorCommand::GetServerMetrics {
            server_id,
            respond_to,
        })
        .await
        .unwrap_or_default()
    }

    /// History of one metric, oldest first
    pub async fn get_historical_data(
        &self,
        server_id: impl Into<String>,
        metric: impl Into<String>,
    ) -> Vec<MetricPoint> {
        let server_id = server_id.into();
        let metric = metric.into();
        self.query(|respond_to| MonitorCommand::GetHistoricalData {
            server_id,
            metric,
            respond_to,
        })
        .await
        .unwrap_or_default()
    }

    /// Up to `limit` alerts, most recent first
    pub async fn get_recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.query(|respond_to| MonitorCommand::GetRecentAlerts { limit, respond_to })
            .await
            .unwrap_or_default()
    }

    /// Unknown servers count as healthy
    pub async fn is_server_healthy(&self, server_id: impl Into<String>) -> bool {
        let server_id = server_id.into();
        self.query(|respond_to| MonitorCommand::IsServerHealthy {
            server_id,
            respond_to,
        })
        .await
        .unwrap_or(true)
    }

    pub async fn server_ids(&self) -> Vec<String> {
        self.query(|respond_to| MonitorCommand::GetServerIds { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn thresholds(&self) -> Thresholds {
        self.query(|respond_to| MonitorCommand::GetThresholds { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn status(&self) -> MonitorStatus {
        self.query(|respond_to| MonitorCommand::GetStatus { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Merge per-metric threshold overrides
    pub async fn update_thresholds(&self, thresholds: Thresholds) -> Result<()> {
        self.sender
            .send(MonitorCommand::UpdateThresholds { thresholds })
            .await
            .context("failed to send UpdateThresholds command")
    }

    pub async fn reset(&self) -> Result<()> {
        self.sender
            .send(MonitorCommand::Reset)
            .await
            .context("failed to send Reset command")
    }

    /// Gracefully shut down the monitor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
