//! Cycle scheduler
//!
//! Drives the three cadences as independent tokio tasks: the decision
//! cycle (minutes-scale, strictly sequential across the roster), the
//! balance/PnL sync (seconds-scale) and the market refresh
//! (venue-dependent), plus a slow audit-trail prune pass. Per-agent
//! decision cycles are non-reentrant via the handle's cycle gate, and any
//! per-agent error is caught and logged — one agent can never stall the
//! roster or kill a loop.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::executor::DecisionExecutor;
use crate::market::MarketDataCache;
use crate::registry::AgentRegistry;
use crate::store::Store;

/// Control handle: manual trigger and shutdown.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerHandle {
    /// Queue one immediate decision pass (operational "trigger cycle now").
    pub async fn trigger_cycle(&self) -> bool {
        self.trigger_tx.send(()).await.is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct CycleScheduler {
    registry: Arc<AgentRegistry>,
    executor: Arc<DecisionExecutor>,
    market: Arc<MarketDataCache>,
    store: Arc<dyn Store>,
    config: SchedulerConfig,
}

impl CycleScheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<DecisionExecutor>,
        market: Arc<MarketDataCache>,
        store: Arc<dyn Store>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            market,
            store,
            config,
        }
    }

    /// Spawn all cadence loops. Returns the control handle and the task
    /// handles (await them for a clean shutdown).
    pub fn spawn(self: Arc<Self>) -> (SchedulerHandle, Vec<JoinHandle<()>>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(self.clone().decision_loop(trigger_rx, shutdown_rx.clone())),
            tokio::spawn(self.clone().balance_loop(shutdown_rx.clone())),
            tokio::spawn(self.clone().market_loop(shutdown_rx.clone())),
            tokio::spawn(self.clone().prune_loop(shutdown_rx)),
        ];

        info!(
            "Scheduler started: decisions every {}s, balance sync every {}s, market refresh every {}s",
            self.config.decision_interval_secs,
            self.config.balance_sync_secs,
            self.config.market_refresh_secs
        );

        (
            SchedulerHandle {
                trigger_tx,
                shutdown_tx,
            },
            tasks,
        )
    }

    // ==================== Decision cadence ====================

    async fn decision_loop(
        self: Arc<Self>,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(Duration::from_secs(self.config.decision_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup finishes first.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_decision_pass().await,
                Some(()) = trigger_rx.recv() => {
                    info!("Manual decision pass triggered");
                    self.run_decision_pass().await;
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        info!("Decision loop stopped");
    }

    /// One sequential pass over the whole roster. Never parallel — the
    /// providers share credentials and rate limits.
    pub async fn run_decision_pass(&self) {
        info!("=== decision pass started ===");

        if self.market.is_empty() {
            if let Err(e) = self.refresh_market().await {
                warn!("Market refresh before pass failed: {e}");
            }
        }

        for handle in self.registry.iter() {
            match handle.cycle_gate.try_lock() {
                Ok(_in_flight) => {
                    if let Err(e) = self.executor.run_cycle(handle).await {
                        error!("Cycle for {} failed: {e}", handle.id());
                    }
                }
                Err(_) => {
                    warn!(
                        "Skipping {}: previous cycle still in flight",
                        handle.id()
                    );
                }
            }

            let jitter = rand::thread_rng().gen_range(0..500);
            tokio::time::sleep(Duration::from_millis(
                self.config.inter_agent_pause_ms + jitter,
            ))
            .await;
        }

        info!("=== decision pass complete ===");
    }

    // ==================== Balance / PnL cadence ====================

    async fn balance_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.balance_sync_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for handle in self.registry.iter() {
                        if let Err(e) = self.executor.sync_balances(handle).await {
                            error!("Balance sync for {} failed: {e}", handle.id());
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        info!("Balance sync loop stopped");
    }

    // ==================== Market cadence ====================

    async fn market_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.market_refresh_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_market().await {
                        warn!("Market refresh failed: {e}");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        info!("Market loop stopped");
    }

    /// Pull the tradable universe from the venue, replace the cache, and
    /// persist the top slice for the UI.
    pub async fn refresh_market(&self) -> crate::error::Result<usize> {
        let Some(handle) = self.registry.iter().next() else {
            return Ok(0);
        };

        let quotes = handle.exchange.list_instruments().await?;
        let count = quotes.len();
        self.market.replace_all(quotes);

        let top = self.market.top_by_volume(self.config.market_depth);
        self.store.replace_market(&top).await?;

        info!("Market data updated: {count} instruments");
        Ok(count)
    }

    // ==================== Audit prune cadence ====================

    async fn prune_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.prune_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = chrono::Utc::now()
                        - chrono::Duration::hours(self.config.trade_retention_hours as i64);
                    match self.store.prune_trades_before(cutoff).await {
                        Ok(0) => {}
                        Ok(n) => info!("Pruned {n} old trade-log entries"),
                        Err(e) => warn!("Trade-log prune failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        info!("Prune loop stopped");
    }
}
