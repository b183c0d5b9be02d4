//! Per-agent accounting state
//!
//! Invariant maintained by the orchestrator:
//! `account_value == cash_balance + Σ unrealized_pnl(open positions)`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::history::RingBuffer;

/// Authoritative per-agent balances, counters and rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    pub name: String,
    /// Provider persona / system-prompt text for this trader.
    pub persona: String,
    pub cash_balance: Decimal,
    /// cash_balance + sum of unrealized PnL across open positions.
    pub account_value: Decimal,
    pub initial_balance: Decimal,
    pub total_return_pct: Decimal,
    /// Fixed-length rolling account-value history (oldest → newest).
    pub pnl_history: RingBuffer<Decimal>,
    pub pnl_24h_pct: Decimal,
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub last_decision: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl AgentState {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        persona: impl Into<String>,
        initial_balance: Decimal,
        history_len: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: persona.into(),
            cash_balance: initial_balance,
            account_value: initial_balance,
            initial_balance,
            total_return_pct: Decimal::ZERO,
            pnl_history: RingBuffer::filled(history_len, initial_balance),
            pnl_24h_pct: Decimal::ZERO,
            total_trades: 0,
            wins: 0,
            losses: 0,
            last_decision: None,
            last_update: Utc::now(),
        }
    }

    /// Commit a reconciled account value: sets the value, keeps the invariant
    /// by deriving cash from the open unrealized total, recomputes return,
    /// and pushes into the rolling history.
    pub fn commit_account_value(&mut self, value: Decimal, open_unrealized: Decimal) {
        self.account_value = value;
        self.cash_balance = value - open_unrealized;
        self.total_return_pct = if self.initial_balance > Decimal::ZERO {
            (value - self.initial_balance) / self.initial_balance * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        self.pnl_history.push(value);
        self.pnl_24h_pct = match self.pnl_history.oldest() {
            Some(oldest) if *oldest > Decimal::ZERO => {
                (value - oldest) / oldest * Decimal::ONE_HUNDRED
            }
            _ => Decimal::ZERO,
        };
        self.touch();
    }

    /// Recompute the derived account value from cash + open unrealized PnL.
    pub fn refresh_account_value(&mut self, open_unrealized: Decimal) {
        self.account_value = self.cash_balance + open_unrealized;
        self.total_return_pct = if self.initial_balance > Decimal::ZERO {
            (self.account_value - self.initial_balance) / self.initial_balance
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        self.touch();
    }

    /// Record a completed round trip.
    pub fn record_close(&mut self, pnl: Decimal) {
        self.total_trades += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.touch();
    }

    pub fn set_last_decision(&mut self, text: impl Into<String>) {
        self.last_decision = Some(text.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    /// Check the accounting invariant against the ledger's unrealized total.
    pub fn invariant_holds(&self, open_unrealized: Decimal) -> bool {
        self.account_value == self.cash_balance + open_unrealized
    }

    pub fn snapshot(&self, open_positions: usize) -> BalanceSnapshot {
        BalanceSnapshot {
            agent_id: self.id.clone(),
            cash_balance: self.cash_balance,
            unrealized_pnl: self.account_value - self.cash_balance,
            account_value: self.account_value,
            total_return_pct: self.total_return_pct,
            open_positions,
            timestamp: Utc::now(),
        }
    }
}

/// Immutable point-in-time balance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub agent_id: String,
    pub cash_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub account_value: Decimal,
    pub total_return_pct: Decimal,
    pub open_positions: usize,
    pub timestamp: DateTime<Utc>,
}
