//! Real-time fleet monitoring
//!
//! A viewer keeps a resilient push connection to a monitoring feed
//! ([`connection`]) and folds the metric and alert messages it receives into
//! per-server snapshots, bounded histories and an alert log ([`monitoring`]).
//! With the `feed` feature the crate also serves the feed side of the wire
//! contract ([`feed`]).

pub mod config;
pub mod connection;
#[cfg(feature = "feed")]
pub mod feed;
pub mod messages;
pub mod monitoring;

pub use config::Config;
pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionState, ConnectionStatus};
pub use messages::{Severity, WireMessage};
pub use monitoring::{MonitorEvent, MonitorHandle, MonitoringAggregator};
