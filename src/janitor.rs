// src/janitor.rs
//! Periodic cleanup on a real wall-clock period, independent of replay pace.
//! Each run evicts expired breaking records and prunes stale topic-window
//! entries, both against virtual time.

use chrono::Duration;
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::shutdown::Shutdown;
use crate::store::StateStore;
use crate::telemetry::ensure_metrics_described;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JanitorReport {
    pub evicted: usize,
    pub topics_pruned: usize,
    pub active: usize,
}

pub struct Janitor {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    period: std::time::Duration,
    window_retention: Duration,
}

impl Janitor {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        period: std::time::Duration,
        window_retention: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            period,
            window_retention,
        }
    }

    /// One cleanup pass at the clock's current virtual time.
    pub async fn run_once(&self) -> Result<JanitorReport, StoreError> {
        ensure_metrics_described();
        let now = self.clock.now();
        let evicted = self.store.evict_expired(now).await?;
        let topics_pruned = self.store.prune_windows(now - self.window_retention).await?;
        let active = self.store.active_count(now).await?;

        counter!("news_evicted_total").increment(evicted as u64);
        gauge!("news_active_breaking").set(active as f64);
        if evicted > 0 {
            info!(target: "janitor", evicted, active, virtual_now = %now, "evicted expired breaking news");
        } else {
            debug!(target: "janitor", topics_pruned, active, "janitor pass");
        }
        Ok(JanitorReport {
            evicted,
            topics_pruned,
            active,
        })
    }

    /// Run every `period` until shutdown. A pass already under way is
    /// allowed to finish.
    pub fn spawn(self, mut shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.run_once().await {
                    counter!("news_store_errors_total").increment(1);
                    warn!(target: "janitor", error = %e, "janitor pass failed");
                }
            }
            info!(target: "janitor", "janitor stopped");
        })
    }
}
