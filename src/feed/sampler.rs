//! Local host sampler publishing `cpu`, `memory` and `disk` usage to the feed

use std::collections::BTreeMap;
use std::time::Duration;

use sysinfo::{Disks, System};
use tokio::task::JoinHandle;
use tracing::{error, instrument, trace, warn};

use crate::messages::WireMessage;

use super::FeedState;

/// Usage percentage, zero for an empty total
fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}

/// Samples resource usage of the host the feed runs on
pub struct SystemSampler {
    server_id: String,
    system: System,
    disks: Disks,
}

impl SystemSampler {
    pub fn new(server_id: impl Into<String>) -> Self {
        let mut system = System::new();
        // first cpu refresh only establishes the baseline
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            server_id: server_id.into(),
            system,
            disks: Disks::new_with_refreshed_list(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current usage percentages keyed by metric name
    pub fn sample(&mut self) -> BTreeMap<String, f64> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(false);

        let cpu = f64::from(self.system.global_cpu_usage());
        let cpu = if cpu.is_finite() {
            cpu.clamp(0.0, 100.0)
        } else {
            0.0
        };

        let total_memory = self.system.total_memory();
        let used_memory = total_memory.saturating_sub(self.system.available_memory());

        let (disk_total, disk_available) = self
            .disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (
                    total.saturating_add(disk.total_space()),
                    available.saturating_add(disk.available_space()),
                )
            });

        BTreeMap::from([
            ("cpu".to_string(), cpu),
            ("memory".to_string(), percent(used_memory, total_memory)),
            (
                "disk".to_string(),
                percent(disk_total.saturating_sub(disk_available), disk_total),
            ),
        ])
    }

    pub fn message(&mut self) -> WireMessage {
        WireMessage::Metrics {
            server_id: self.server_id.clone(),
            data: self.sample(),
        }
    }
}

/// Publish a sample of the local host every `period`
#[instrument(skip(state))]
pub fn spawn_sampler(state: FeedState, server_id: String, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = SystemSampler::new(server_id);
        let mut ticker = tokio::time::interval(period.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // refreshing reads /proc and friends, keep it off the runtime threads
            let joined = tokio::task::spawn_blocking(move || {
                let message = sampler.message();
                (sampler, message)
            })
            .await;

            let message = match joined {
                Ok((returned, message)) => {
                    sampler = returned;
                    message
                }
                Err(e) => {
                    error!("sampler task failed: {e}");
                    break;
                }
            };

            match state.publish(&message) {
                Ok(clients) => trace!("published host sample to {clients} clients"),
                Err(e) => warn!("failed to encode host sample: {e}"),
            }
        }
    })
}
