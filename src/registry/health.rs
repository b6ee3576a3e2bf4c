//! Periodic health probing of registered agents.
//!
//! The monitor probes every live record's `health` endpoint, feeds the
//! results into the store, then sweeps heartbeats that outlived the TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::record::{AgentStatus, CHANNEL_HEALTH};
use super::store::RegistryStore;

/// Liveness check against one endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, endpoint: &str) -> bool;
}

/// Probe that treats any 2xx answer to a GET as healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, endpoint: &str) -> bool {
        match self.http.get(endpoint).timeout(self.timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("Health probe to {} failed: {}", endpoint, e);
                false
            }
        }
    }
}

/// Outcome of one monitoring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Records expired by the heartbeat sweep.
    pub expired: usize,
}

/// Drives a [`HealthProbe`] over the store on an interval.
pub struct HealthMonitor {
    store: Arc<RegistryStore>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(store: Arc<RegistryStore>, probe: Arc<dyn HealthProbe>, interval: Duration) -> Self {
        Self {
            store,
            probe,
            interval,
        }
    }

    /// Probe every live record that exposes a health endpoint, then sweep.
    pub async fn run_once(&self) -> HealthReport {
        let targets: Vec<(String, String)> = self
            .store
            .list()
            .into_iter()
            .filter(|r| r.status != AgentStatus::Deregistered)
            .filter_map(|r| {
                let endpoint = r.endpoint(CHANNEL_HEALTH)?.to_string();
                Some((r.agent_id, endpoint))
            })
            .collect();

        let results = join_all(targets.iter().map(|(agent_id, endpoint)| async move {
            (agent_id, self.probe.check(endpoint).await)
        }))
        .await;

        let mut report = HealthReport {
            probed: results.len(),
            ..HealthReport::default()
        };
        for (agent_id, healthy) in results {
            if healthy {
                report.healthy += 1;
            } else {
                report.unhealthy += 1;
            }
            // The agent may have been deregistered while the probe was in flight.
            if let Err(e) = self.store.set_health(agent_id, healthy) {
                log::debug!("Skipping health result for {}: {}", agent_id, e);
            }
        }
        report.expired = self.store.sweep_expired();

        if report.unhealthy > 0 || report.expired > 0 {
            log::info!(
                "Health pass: {} probed, {} unhealthy, {} expired",
                report.probed,
                report.unhealthy,
                report.expired
            );
        }
        report
    }

    /// Run passes on the interval until the handle is shut down.
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            log::debug!("Health monitor stopped");
        });
        MonitorHandle { stop_tx, task }
    }
}

/// Handle to a spawned [`HealthMonitor`].
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for its current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            log::warn!("Health monitor task ended abnormally: {}", e);
        }
    }
}
