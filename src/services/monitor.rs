//! Worker liveness monitor.
//!
//! Ticks on a fixed cadence and sweeps workers whose heartbeat went silent:
//! they are marked offline, their jobs return to pending, and their items
//! become claimable again, all in one transaction inside the repository.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::Service;
use crate::cache::invalidator::CacheInvalidator;
use crate::db::DbContext;

pub struct HeartbeatMonitor {
    db: DbContext,
    invalidator: CacheInvalidator,
    interval: Duration,
    timeout: Duration,
    worker_retention: Duration,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl HeartbeatMonitor {
    pub fn new(
        db: DbContext,
        invalidator: CacheInvalidator,
        interval: Duration,
        timeout: Duration,
        worker_retention: Duration,
    ) -> Self {
        Self {
            db,
            invalidator,
            interval,
            timeout,
            worker_retention,
            shutdown_tx: None,
        }
    }

    async fn sweep(&self) {
        match self.db.workers().mark_offline_workers(self.timeout).await {
            Ok(0) => {}
            Ok(count) => {
                warn!(count, "marked stale workers offline");
                self.invalidator.on_sweep().await;
            }
            Err(e) => warn!(error = ?e, "liveness sweep failed"),
        }
    }

    async fn prune(&self) {
        match self.db.workers().cleanup(self.worker_retention).await {
            Ok(0) => {}
            Ok(count) => info!(count, "pruned long-offline workers"),
            Err(e) => warn!(error = ?e, "worker cleanup failed"),
        }
    }
}

#[async_trait::async_trait]
impl Service for HeartbeatMonitor {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        // Prune roughly hourly regardless of the sweep cadence
        let prune_every = (3600 / self.interval.as_secs().max(1)).max(1);
        let mut interval = tokio::time::interval(self.interval);
        let mut ticks: u64 = 0;

        info!(
            interval = format!("{:.2?}", self.interval),
            timeout = format!("{:.2?}", self.timeout),
            "heartbeat monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                    ticks += 1;
                    if ticks % prune_every == 0 {
                        self.prune().await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("heartbeat monitor stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        Ok(())
    }
}
