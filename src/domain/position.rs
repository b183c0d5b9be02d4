//! Position record and mark-to-market arithmetic
//!
//! A position is created only on a settled OPEN, mutated only by
//! mark-to-market, and destroyed exactly once on close. Identity fields
//! (instrument, direction, entry, sizing) never change after creation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::InstrumentKind;

/// Trade direction for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Signed price move in the position's favor.
    pub fn signed_diff(&self, entry: Decimal, mark: Decimal) -> Decimal {
        match self {
            Direction::Long => mark - entry,
            Direction::Short => entry - mark,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Direction {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// One open position in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub agent_id: String,
    pub instrument: String,
    pub kind: InstrumentKind,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    /// Collateral actually committed. Authoritative over
    /// quantity × entry_price when fees/slippage are known.
    pub cost_basis: Decimal,
    /// Leveraged position size (cost_basis × leverage for perpetuals).
    pub notional: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}

impl Position {
    /// PnL reference amount for this instrument class.
    ///
    /// Perpetuals settle against notional (the venue's quoted-notional
    /// convention); prediction-style instruments settle against the capital
    /// actually committed.
    fn pnl_basis(&self) -> Decimal {
        match self.kind {
            InstrumentKind::Perpetual => self.notional,
            InstrumentKind::Prediction => self.cost_basis,
        }
    }

    /// Unrealized PnL at a given mark price, without mutating the position.
    pub fn pnl_at(&self, mark: Decimal) -> (Decimal, Decimal) {
        if self.entry_price <= Decimal::ZERO {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let diff = self.direction.signed_diff(self.entry_price, mark);
        let pct = diff / self.entry_price * Decimal::ONE_HUNDRED;
        let pnl = diff / self.entry_price * self.pnl_basis();
        (pnl, pct)
    }

    /// Recompute unrealized PnL against a fresh price. Idempotent: marking
    /// twice with the same price yields the same result. Identity fields
    /// are untouched.
    pub fn mark_to_market(&mut self, mark: Decimal) {
        let (pnl, pct) = self.pnl_at(mark);
        self.mark_price = mark;
        self.unrealized_pnl = pnl;
        self.unrealized_pnl_pct = pct;
    }

    pub fn holding_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }
}

/// Outcome of a close, returned by the ledger.
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub holding: Duration,
}

impl ClosedPosition {
    /// Display form of the holding time, exact to the minute ("2H 13M").
    pub fn holding_display(&self) -> String {
        format_holding(self.holding)
    }
}

/// Format a holding duration as hours + minutes.
pub fn format_holding(holding: Duration) -> String {
    let total_mins = holding.num_minutes().max(0);
    format!("{}H {}M", total_mins / 60, total_mins % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn perp_position() -> Position {
        Position {
            position_id: "pos-claude-1".to_string(),
            agent_id: "claude".to_string(),
            instrument: "BTCUSDT".to_string(),
            kind: InstrumentKind::Perpetual,
            direction: Direction::Long,
            quantity: dec!(0.012),
            entry_price: dec!(50000),
            leverage: 10,
            cost_basis: dec!(60),
            notional: dec!(600),
            mark_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            opened_at: Utc::now(),
            stop_loss: Some(dec!(48500)),
            take_profit: Some(dec!(52500)),
            stop_loss_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[test]
    fn test_long_mark_to_market_on_notional() {
        let mut pos = perp_position();
        pos.mark_to_market(dec!(51000));

        // 2% move on $600 notional
        assert_eq!(pos.unrealized_pnl, dec!(12));
        assert_eq!(pos.unrealized_pnl_pct, dec!(2));
        assert_eq!(pos.mark_price, dec!(51000));
    }

    #[test]
    fn test_mark_to_market_idempotent() {
        let mut pos = perp_position();
        pos.mark_to_market(dec!(51000));
        let first = pos.unrealized_pnl;
        pos.mark_to_market(dec!(51000));
        assert_eq!(pos.unrealized_pnl, first);
    }

    #[test]
    fn test_short_gains_on_drop() {
        let mut pos = perp_position();
        pos.direction = Direction::Short;
        pos.mark_to_market(dec!(49000));

        assert_eq!(pos.unrealized_pnl, dec!(12));
        assert_eq!(pos.unrealized_pnl_pct, dec!(2));
    }

    #[test]
    fn test_prediction_pnl_uses_cost_basis() {
        let mut pos = perp_position();
        pos.kind = InstrumentKind::Prediction;
        pos.instrument = "btc-updown-15m".to_string();
        pos.entry_price = dec!(0.50);
        pos.cost_basis = dec!(50);
        pos.notional = dec!(50);
        pos.leverage = 1;

        pos.mark_to_market(dec!(0.55));
        // 10% move on $50 committed
        assert_eq!(pos.unrealized_pnl, dec!(5));
    }

    #[test]
    fn test_identity_fields_survive_marking() {
        let mut pos = perp_position();
        pos.mark_to_market(dec!(51000));
        assert_eq!(pos.entry_price, dec!(50000));
        assert_eq!(pos.quantity, dec!(0.012));
        assert_eq!(pos.cost_basis, dec!(60));
    }

    #[test]
    fn test_format_holding() {
        assert_eq!(format_holding(Duration::minutes(133)), "2H 13M");
        assert_eq!(format_holding(Duration::minutes(5)), "0H 5M");
        assert_eq!(format_holding(Duration::seconds(59)), "0H 0M");
    }
}
