//! The master ticker and background-task supervisor.
//!
//! One serial tick per period: cache refresh, then (on the master)
//! escalate -> deactivate -> poll -> aggregate. Ticks never overlap --
//! the next one starts only after the previous finished. The loop also
//! respawns crashed worker and intake tasks and keeps the changelog
//! pruner alive on its own four-hour period.

use std::sync::Arc;
use std::time::{Duration, Instant};

use klaxon_db::Db;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::aggregation::AggregationEngine;
use crate::cache::Cache;
use crate::dispatcher::Dispatcher;
use crate::escalation::EscalationEngine;
use crate::metrics::SenderMetrics;

/// Changelog retention pruning period.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60 * 4);

/// Maintenance settings.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Tick period; 60 seconds in production.
    pub tick: Duration,
    /// Whether this process is the master.
    pub is_master: bool,
    /// Dispatcher worker pool size.
    pub workers: usize,
}

/// The maintenance loop.
pub struct MaintenanceLoop {
    db: Db,
    cache: Arc<Cache>,
    escalation: EscalationEngine,
    aggregation: Arc<AggregationEngine>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<SenderMetrics>,
    config: MaintenanceConfig,
}

impl MaintenanceLoop {
    #[must_use]
    pub fn new(
        db: Db,
        cache: Arc<Cache>,
        escalation: EscalationEngine,
        aggregation: Arc<AggregationEngine>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<SenderMetrics>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            db,
            cache,
            escalation,
            aggregation,
            dispatcher,
            metrics,
            config,
        }
    }

    /// Run forever.
    pub async fn run(self) {
        let mut workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|_| self.dispatcher.spawn_worker())
            .collect();
        let mut intake = self.aggregation.spawn_intake();
        let mut pruner = self.config.is_master.then(|| self.spawn_pruner());

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(is_master = self.config.is_master, "sender bootstrapped");

        loop {
            ticker.tick().await;
            let started = Instant::now();
            let now = crate::unix_now();

            if let Err(e) = self.cache.refresh().await {
                self.metrics.incr_task_failure();
                error!(error = %e, "cache refresh failed, serving previous snapshot");
            }

            if self.config.is_master {
                if let Err(e) = self.escalation.escalate().await {
                    self.metrics.incr_task_failure();
                    error!(error = %e, "escalate pass failed");
                }
                if let Err(e) = self.escalation.deactivate().await {
                    self.metrics.incr_task_failure();
                    error!(error = %e, "deactivate pass failed");
                }
                if let Err(e) = self.aggregation.poll().await {
                    self.metrics.incr_task_failure();
                    error!(error = %e, "unsent poll failed");
                }
                if let Err(e) = self.aggregation.flush(now).await {
                    self.metrics.incr_task_failure();
                    error!(error = %e, "aggregate flush failed");
                }
            }

            // Respawn anything that died. Tasks only finish on panic or
            // queue closure, both worth a failure count.
            if intake.is_finished() {
                self.metrics.incr_task_failure();
                error!("intake task died, respawning");
                intake = self.aggregation.spawn_intake();
            }
            for handle in &mut workers {
                if handle.is_finished() {
                    self.metrics.incr_task_failure();
                    error!("worker task died, respawning");
                    *handle = self.dispatcher.spawn_worker();
                }
            }
            if let Some(handle) = &mut pruner {
                if handle.is_finished() {
                    self.metrics.incr_task_failure();
                    error!("changelog pruner died, respawning");
                    *handle = self.spawn_pruner();
                }
            }

            info!(
                elapsed_ms = started.elapsed().as_millis(),
                buffered = self.aggregation.buffered_count(),
                "maintenance tick finished"
            );
        }
    }

    fn spawn_pruner(&self) -> JoinHandle<()> {
        let db = self.db.clone();
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match db.prune_changelog().await {
                    Ok(pruned) => info!(pruned, "pruned old audit rows"),
                    Err(e) => {
                        metrics.incr_task_failure();
                        error!(error = %e, "changelog prune failed");
                    }
                }
            }
        })
    }
}
