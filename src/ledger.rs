//! Position ledger
//!
//! Authoritative per-agent record of open positions. Positions enter the
//! ledger only on a settled OPEN, change only via mark-to-market, and leave
//! exactly once on close. The executor holds the owning agent's lock across
//! every mutation, so the ledger itself only guards map integrity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{AgentState, ClosedPosition, Position};
use crate::error::LedgerError;
use crate::risk::OpenOrder;

/// Ledger-level guards, re-checked at the mutation boundary.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_open_positions: usize,
    pub min_notional: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            max_open_positions: 6,
            min_notional: dec!(110),
        }
    }
}

pub struct PositionLedger {
    config: LedgerConfig,
    positions: RwLock<HashMap<String, Position>>,
    position_counter: AtomicU64,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            positions: RwLock::new(HashMap::new()),
            position_counter: AtomicU64::new(0),
        }
    }

    /// Seed the ledger from persisted positions on startup.
    pub async fn restore(&self, positions: Vec<Position>) {
        let mut map = self.positions.write().await;
        for position in positions {
            map.insert(position.position_id.clone(), position);
        }
        info!("Ledger restored with {} open positions", map.len());
    }

    /// Open a position for a settled order.
    ///
    /// The sizing policy has already vetted the order; the ledger re-checks
    /// the balance, the notional floor and the position cap at the mutation
    /// boundary before anything is inserted.
    pub async fn open(
        &self,
        agent: &AgentState,
        order: &OpenOrder,
        entry_price: Decimal,
    ) -> Result<Position, LedgerError> {
        if order.stake > agent.cash_balance {
            return Err(LedgerError::InsufficientBalance {
                available: agent.cash_balance,
                requested: order.stake,
            });
        }
        if order.notional < self.config.min_notional {
            return Err(LedgerError::SubMinimumNotional {
                notional: order.notional,
                minimum: self.config.min_notional,
            });
        }

        let mut positions = self.positions.write().await;

        let open_count = positions
            .values()
            .filter(|p| p.agent_id == agent.id)
            .count();
        if open_count >= self.config.max_open_positions {
            return Err(LedgerError::MaxPositionsReached {
                cap: self.config.max_open_positions,
            });
        }

        let seq = self.position_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let position = Position {
            position_id: format!("pos-{}-{}", agent.id, seq),
            agent_id: agent.id.clone(),
            instrument: order.instrument.clone(),
            kind: order.kind,
            direction: order.direction,
            quantity: order.quantity,
            entry_price,
            leverage: order.leverage,
            cost_basis: order.stake,
            notional: order.notional,
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            opened_at: Utc::now(),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            stop_loss_order_id: None,
            take_profit_order_id: None,
        };

        info!(
            "Opened {} for {}: {} {} {} @ {} (notional ${})",
            position.position_id,
            agent.id,
            position.direction,
            position.quantity,
            position.instrument,
            entry_price,
            position.notional
        );

        positions.insert(position.position_id.clone(), position.clone());
        Ok(position)
    }

    /// Remove a position and compute its realized outcome.
    ///
    /// Callers invoke this only after the exchange confirmed the close; a
    /// failed exchange call never reaches here, leaving the position intact.
    pub async fn close(
        &self,
        position_id: &str,
        exit_price: Decimal,
    ) -> Result<ClosedPosition, LedgerError> {
        let mut positions = self.positions.write().await;

        let position = positions
            .remove(position_id)
            .ok_or_else(|| LedgerError::NotFound {
                position_id: position_id.to_string(),
            })?;

        let (pnl, pnl_pct) = position.pnl_at(exit_price);
        let holding = position.holding_duration(Utc::now());

        info!(
            "Closed {} for {}: {} @ {} -> {} | PnL ${} ({}%)",
            position.position_id,
            position.agent_id,
            position.instrument,
            position.entry_price,
            exit_price,
            pnl.round_dp(2),
            pnl_pct.round_dp(2)
        );

        Ok(ClosedPosition {
            position,
            exit_price,
            pnl,
            pnl_pct,
            holding,
        })
    }

    /// Mark a position to a fresh price. Idempotent; fails only when the
    /// position is gone.
    pub async fn mark_to_market(
        &self,
        position_id: &str,
        mark_price: Decimal,
    ) -> Result<(), LedgerError> {
        let mut positions = self.positions.write().await;
        match positions.get_mut(position_id) {
            Some(position) => {
                position.mark_to_market(mark_price);
                debug!(
                    "Marked {} @ {} (unrealized ${})",
                    position_id,
                    mark_price,
                    position.unrealized_pnl.round_dp(2)
                );
                Ok(())
            }
            None => Err(LedgerError::NotFound {
                position_id: position_id.to_string(),
            }),
        }
    }

    /// Attach protective-order ids after best-effort placement.
    pub async fn set_protective_orders(
        &self,
        position_id: &str,
        stop_loss_order_id: Option<String>,
        take_profit_order_id: Option<String>,
    ) -> Result<(), LedgerError> {
        let mut positions = self.positions.write().await;
        match positions.get_mut(position_id) {
            Some(position) => {
                position.stop_loss_order_id = stop_loss_order_id;
                position.take_profit_order_id = take_profit_order_id;
                Ok(())
            }
            None => Err(LedgerError::NotFound {
                position_id: position_id.to_string(),
            }),
        }
    }

    pub async fn get(&self, position_id: &str) -> Option<Position> {
        self.positions.read().await.get(position_id).cloned()
    }

    pub async fn list_open(&self, agent_id: &str) -> Vec<Position> {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub async fn all_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn open_count(&self, agent_id: &str) -> usize {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.agent_id == agent_id)
            .count()
    }

    /// Sum of unrealized PnL across an agent's open positions.
    pub async fn unrealized_total(&self, agent_id: &str) -> Decimal {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.agent_id == agent_id)
            .map(|p| p.unrealized_pnl)
            .sum()
    }

    /// Positions held past an agent's time limit, oldest first.
    pub async fn expired(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
        max_holding: chrono::Duration,
    ) -> Vec<Position> {
        let mut expired: Vec<Position> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.agent_id == agent_id && p.holding_duration(now) > max_holding)
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.opened_at);
        expired
    }
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}
