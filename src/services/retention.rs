//! Periodic pruning of old chat messages.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::repositories::ChatRepository;

pub struct ChatRetention {
    repository: ChatRepository,
    retention: chrono::Duration,
    sweep_interval: Duration,
}

impl ChatRetention {
    pub fn new(pool: SqlitePool, retention_days: i64, sweep_interval: Duration) -> Self {
        Self {
            repository: ChatRepository::new(pool),
            retention: chrono::Duration::days(retention_days),
            sweep_interval,
        }
    }

    /// Deletes every message older than the retention window. Returns how many went.
    pub async fn run_once(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.retention;
        let removed = self.repository.delete_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Pruned old chat messages");
        } else {
            debug!(%cutoff, "No chat messages to prune");
        }
        Ok(removed)
    }

    /// Sweeps on a fixed interval until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            info!(interval_secs = self.sweep_interval.as_secs(), "Chat retention task started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Chat retention task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!("Chat retention sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
