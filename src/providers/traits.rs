//! External collaborator seams
//!
//! The orchestrator talks to exactly two kinds of outside systems: a
//! decision provider (the model deciding what to trade) and an exchange.
//! Both are trait objects held per agent in the registry; wire protocols,
//! signing and prompt content live behind these seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentState, Direction, Position, RawDecision};
use crate::error::Result;
use crate::market::MarketQuote;

/// Everything the provider is shown before deciding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub cash_balance: Decimal,
    pub account_value: Decimal,
    pub total_return_pct: Decimal,
    pub open_positions: Vec<Position>,
    pub market: Vec<MarketQuote>,
    pub timestamp: DateTime<Utc>,
}

/// Source of trade decisions. Blocking-with-timeout at the call site; a
/// failure here degrades the cycle to a synthetic HOLD, never a crash.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Produce one (untrusted) decision for the agent. The executor runs
    /// the strict parse; implementations return the wire payload as-is.
    async fn get_decision(&self, agent: &AgentState, ctx: &DecisionContext)
        -> Result<RawDecision>;
}

/// Market order to open a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTicket {
    pub instrument: String,
    pub direction: Direction,
    pub quantity: Decimal,
    pub leverage: u32,
}

/// Exchange confirmation of an opening fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub fill_price: Decimal,
}

/// Exchange confirmation of a closing fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReceipt {
    pub fill_price: Decimal,
}

/// Receipt for a resting protective (stop-loss / take-profit) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectiveReceipt {
    pub order_id: String,
}

/// Exchange-reported account totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub cash_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

impl AccountState {
    pub fn account_value(&self) -> Decimal {
        self.cash_balance + self.unrealized_pnl
    }
}

/// Venue seam. Any error surfaces as a FAILED terminal state upstream —
/// never implicit success. Order placement is never auto-retried; the
/// idempotent reads (`get_quote`, `list_instruments`, `get_account_state`)
/// may be retried with bounded attempts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn venue(&self) -> &str;

    fn is_dry_run(&self) -> bool;

    async fn get_quote(&self, instrument: &str) -> Result<MarketQuote>;

    async fn list_instruments(&self) -> Result<Vec<MarketQuote>>;

    async fn place_order(&self, ticket: &OrderTicket) -> Result<OrderReceipt>;

    async fn close_position(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<FillReceipt>;

    async fn place_stop_loss(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: Decimal,
        trigger_price: Decimal,
    ) -> Result<ProtectiveReceipt>;

    async fn place_take_profit(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: Decimal,
        trigger_price: Decimal,
    ) -> Result<ProtectiveReceipt>;

    async fn cancel_order(&self, instrument: &str, order_id: &str) -> Result<bool>;

    async fn get_account_state(&self) -> Result<AccountState>;
}

impl DecisionContext {
    pub fn new(agent: &AgentState, open_positions: Vec<Position>, market: Vec<MarketQuote>) -> Self {
        Self {
            cash_balance: agent.cash_balance,
            account_value: agent.account_value,
            total_return_pct: agent.total_return_pct,
            open_positions,
            market,
            timestamp: Utc::now(),
        }
    }
}
