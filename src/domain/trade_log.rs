//! Audit trail records
//!
//! One `TradeLogEntry` per terminal decision outcome — the sole externally
//! observable record of a cycle. Entries are append-only and immutable;
//! the store may prune them by age but never mutates them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::{ClosedPosition, Direction};
use crate::risk::OpenOrder;

/// Terminal outcome category of a decision cycle.
///
/// `Failed` is deliberately distinct from `Hold`: both leave the book
/// unchanged, but a Failed entry marks an execution error, not a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Open,
    Close,
    Hold,
    Failed,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Open => "OPEN",
            TradeAction::Close => "CLOSE",
            TradeAction::Hold => "HOLD",
            TradeAction::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable audit record of one decision outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub id: Uuid,
    pub agent_id: String,
    pub agent_name: String,
    pub action: TradeAction,
    pub instrument: Option<String>,
    pub direction: Option<Direction>,
    pub quantity: Option<Decimal>,
    pub leverage: Option<u32>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub notional: Option<Decimal>,
    pub collateral: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_pct: Option<Decimal>,
    pub holding_time: Option<String>,
    pub rationale: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeLogEntry {
    fn base(agent_id: &str, agent_name: &str, action: TradeAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            action,
            instrument: None,
            direction: None,
            quantity: None,
            leverage: None,
            entry_price: None,
            exit_price: None,
            notional: None,
            collateral: None,
            pnl: None,
            pnl_pct: None,
            holding_time: None,
            rationale: String::new(),
            message: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn hold(agent_id: &str, agent_name: &str, rationale: &str, message: &str) -> Self {
        let mut entry = Self::base(agent_id, agent_name, TradeAction::Hold);
        entry.rationale = rationale.to_string();
        entry.message = message.to_string();
        entry
    }

    /// HOLD-equivalent entry for an execution failure — same book effect as
    /// a hold, distinguishable by action.
    pub fn failed(agent_id: &str, agent_name: &str, rationale: &str, message: &str) -> Self {
        let mut entry = Self::base(agent_id, agent_name, TradeAction::Failed);
        entry.rationale = rationale.to_string();
        entry.message = message.to_string();
        entry
    }

    pub fn open(
        agent_id: &str,
        agent_name: &str,
        order: &OpenOrder,
        entry_price: Decimal,
        message: &str,
    ) -> Self {
        let mut entry = Self::base(agent_id, agent_name, TradeAction::Open);
        entry.instrument = Some(order.instrument.clone());
        entry.direction = Some(order.direction);
        entry.quantity = Some(order.quantity);
        entry.leverage = Some(order.leverage);
        entry.entry_price = Some(entry_price);
        entry.notional = Some(order.notional);
        entry.collateral = Some(order.stake);
        entry.rationale = order.rationale.clone();
        entry.message = message.to_string();
        entry
    }

    pub fn close(
        agent_id: &str,
        agent_name: &str,
        closed: &ClosedPosition,
        rationale: &str,
        message: &str,
    ) -> Self {
        let mut entry = Self::base(agent_id, agent_name, TradeAction::Close);
        entry.instrument = Some(closed.position.instrument.clone());
        entry.direction = Some(closed.position.direction);
        entry.quantity = Some(closed.position.quantity);
        entry.leverage = Some(closed.position.leverage);
        entry.entry_price = Some(closed.position.entry_price);
        entry.exit_price = Some(closed.exit_price);
        entry.notional = Some(closed.position.notional);
        entry.collateral = Some(closed.position.cost_basis);
        entry.pnl = Some(closed.pnl);
        entry.pnl_pct = Some(closed.pnl_pct);
        entry.holding_time = Some(closed.holding_display());
        entry.rationale = rationale.to_string();
        entry.message = message.to_string();
        entry
    }
}
