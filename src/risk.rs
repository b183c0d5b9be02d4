//! Risk & sizing policy
//!
//! Turns a validated `Decision` into an executable order or a typed
//! rejection. Pure and deterministic: the policy reads the balance, the
//! open book and a quote, and never touches shared state, so every rule is
//! unit-testable in isolation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Decision, Direction, Position};
use crate::market::{InstrumentKind, MarketQuote};

/// Per-agent sizing bounds. All limits are configuration, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    /// Largest fraction of cash a single trade may commit (e.g. 0.70).
    pub max_balance_fraction: Decimal,
    /// Exchange minimum for stake × leverage.
    pub min_notional: Decimal,
    /// Hard leverage ceiling. Never exceeded, including to clear the
    /// notional floor.
    pub max_leverage: u32,
    /// Leverage assumed when the decision omits one.
    pub default_leverage: u32,
    /// Absolute per-trade stake ceiling, independent of conviction.
    pub max_stake: Decimal,
    /// Open-position cap per agent, enforced at open time only.
    pub max_open_positions: usize,
}

impl Default for RiskParams {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            max_balance_fraction: dec!(0.70),
            min_notional: dec!(110),
            max_leverage: 10,
            default_leverage: 10,
            max_stake: dec!(250),
            max_open_positions: 6,
        }
    }
}

/// Output of the sizing policy.
#[derive(Debug, Clone)]
pub enum SizedOrder {
    /// Open a new position.
    Open(OpenOrder),
    /// Close an existing position.
    Close {
        position: Position,
        rationale: String,
    },
    /// Nothing to execute: a genuine HOLD, or an idempotent close of a
    /// position that no longer exists.
    NoOp { rationale: String },
}

/// Fully sized open order, ready for submission.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub instrument: String,
    pub kind: InstrumentKind,
    pub direction: Direction,
    /// Collateral committed (after clamping).
    pub stake: Decimal,
    pub leverage: u32,
    pub notional: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub rationale: String,
}

/// Business-rule refusal. Logged verbatim into the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SizingRejection {
    InsufficientBalance {
        available: Decimal,
    },
    SubMinimumNotional {
        notional: Decimal,
        minimum: Decimal,
    },
    MaxPositionsReached {
        cap: usize,
    },
    MissingProtectiveLevels {
        instrument: String,
    },
    QuoteUnavailable {
        instrument: String,
    },
}

impl std::fmt::Display for SizingRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizingRejection::InsufficientBalance { available } => {
                write!(f, "Insufficient balance (${available} available)")
            }
            SizingRejection::SubMinimumNotional { notional, minimum } => {
                write!(f, "Notional ${notional} below minimum ${minimum}")
            }
            SizingRejection::MaxPositionsReached { cap } => {
                write!(f, "Max open positions reached ({cap})")
            }
            SizingRejection::MissingProtectiveLevels { instrument } => {
                write!(f, "{instrument} requires stop loss and take profit levels")
            }
            SizingRejection::QuoteUnavailable { instrument } => {
                write!(f, "No usable quote for {instrument}")
            }
        }
    }
}

/// The sizing policy itself: bounds + the pure `size` function.
#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    pub params: RiskParams,
}

impl RiskPolicy {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    /// Size a validated decision against the agent's current state.
    ///
    /// Deterministic in its inputs; performs no I/O.
    pub fn size(
        &self,
        decision: &Decision,
        cash_balance: Decimal,
        open_positions: &[Position],
        quote: Option<&MarketQuote>,
    ) -> Result<SizedOrder, SizingRejection> {
        match decision {
            Decision::Hold { rationale } => Ok(SizedOrder::NoOp {
                rationale: rationale.clone(),
            }),

            Decision::Close {
                instrument,
                rationale,
            } => {
                // A stale reference is a no-op, not an error: the position
                // may have been closed by a protective order in the meantime.
                match open_positions.iter().find(|p| p.instrument == *instrument) {
                    Some(position) => Ok(SizedOrder::Close {
                        position: position.clone(),
                        rationale: rationale.clone(),
                    }),
                    None => Ok(SizedOrder::NoOp {
                        rationale: format!("no open position on {instrument} to close"),
                    }),
                }
            }

            Decision::Open {
                direction,
                instrument,
                stake,
                leverage,
                stop_loss,
                take_profit,
                rationale,
            } => {
                let params = &self.params;

                if open_positions.len() >= params.max_open_positions {
                    return Err(SizingRejection::MaxPositionsReached {
                        cap: params.max_open_positions,
                    });
                }

                let quote = quote
                    .filter(|q| q.instrument == *instrument && q.price > Decimal::ZERO)
                    .ok_or_else(|| SizingRejection::QuoteUnavailable {
                        instrument: instrument.clone(),
                    })?;

                if quote.kind.requires_protective_levels()
                    && (stop_loss.is_none() || take_profit.is_none())
                {
                    return Err(SizingRejection::MissingProtectiveLevels {
                        instrument: instrument.clone(),
                    });
                }

                if cash_balance <= Decimal::ZERO {
                    return Err(SizingRejection::InsufficientBalance {
                        available: cash_balance,
                    });
                }

                // Stake is never upsized: requested, capped by the balance
                // fraction and the absolute per-trade ceiling.
                let stake = (*stake)
                    .min(cash_balance * params.max_balance_fraction)
                    .min(params.max_stake);
                if stake <= Decimal::ZERO {
                    return Err(SizingRejection::InsufficientBalance {
                        available: cash_balance,
                    });
                }

                let leverage = self.resolve_leverage(stake, leverage.unwrap_or(params.default_leverage))?;
                let notional = stake * Decimal::from(leverage);
                let quantity = (notional / quote.price).round_dp(8);

                Ok(SizedOrder::Open(OpenOrder {
                    instrument: instrument.clone(),
                    kind: quote.kind,
                    direction: *direction,
                    stake,
                    leverage,
                    notional,
                    quantity,
                    stop_loss: *stop_loss,
                    take_profit: *take_profit,
                    rationale: rationale.clone(),
                }))
            }
        }
    }

    /// Clamp leverage to the ceiling, then raise it only as far as the
    /// ceiling allows to clear the notional floor. The cap wins over the
    /// floor: if no in-bounds leverage clears it, reject.
    fn resolve_leverage(&self, stake: Decimal, requested: u32) -> Result<u32, SizingRejection> {
        let params = &self.params;
        let leverage = requested.clamp(1, params.max_leverage);

        if stake * Decimal::from(leverage) >= params.min_notional {
            return Ok(leverage);
        }

        let needed = (params.min_notional / stake).ceil();
        match needed.to_u32() {
            Some(needed) if needed <= params.max_leverage => Ok(needed.max(leverage)),
            _ => Err(SizingRejection::SubMinimumNotional {
                notional: stake * Decimal::from(leverage),
                minimum: params.min_notional,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn policy() -> RiskPolicy {
        RiskPolicy::default()
    }

    fn btc_quote(price: Decimal) -> MarketQuote {
        MarketQuote::new("BTCUSDT", InstrumentKind::Perpetual, price)
    }

    fn open_long(stake: Decimal, leverage: Option<u32>) -> Decision {
        Decision::Open {
            direction: Direction::Long,
            instrument: "BTCUSDT".to_string(),
            stake,
            leverage,
            stop_loss: Some(dec!(48500)),
            take_profit: Some(dec!(52500)),
            rationale: "test".to_string(),
        }
    }

    fn position(instrument: &str) -> Position {
        Position {
            position_id: format!("pos-x-{instrument}"),
            agent_id: "x".to_string(),
            instrument: instrument.to_string(),
            kind: InstrumentKind::Perpetual,
            direction: Direction::Long,
            quantity: dec!(0.01),
            entry_price: dec!(50000),
            leverage: 10,
            cost_basis: dec!(50),
            notional: dec!(500),
            mark_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            opened_at: Utc::now(),
            stop_loss: None,
            take_profit: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[test]
    fn test_sizes_open_per_venue_arithmetic() {
        // $60 at 10x on a $50,000 quote: $600 notional, 0.012 quantity.
        let quote = btc_quote(dec!(50000));
        let sized = policy()
            .size(&open_long(dec!(60), Some(10)), dec!(500), &[], Some(&quote))
            .unwrap();

        match sized {
            SizedOrder::Open(order) => {
                assert_eq!(order.stake, dec!(60));
                assert_eq!(order.leverage, 10);
                assert_eq!(order.notional, dec!(600));
                assert_eq!(order.quantity, dec!(0.012));
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn test_stake_clamped_to_balance_fraction_and_ceiling() {
        let quote = btc_quote(dec!(50000));

        // 70% of $100 balance caps a $90 request at $70.
        let sized = policy()
            .size(&open_long(dec!(90), Some(10)), dec!(100), &[], Some(&quote))
            .unwrap();
        match sized {
            SizedOrder::Open(order) => assert_eq!(order.stake, dec!(70)),
            other => panic!("expected Open, got {other:?}"),
        }

        // Absolute ceiling applies regardless of a large balance.
        let sized = policy()
            .size(&open_long(dec!(900), Some(10)), dec!(10000), &[], Some(&quote))
            .unwrap();
        match sized {
            SizedOrder::Open(order) => assert_eq!(order.stake, dec!(250)),
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn test_sub_minimum_notional_rejected_not_upsized() {
        // $5 at max leverage 10 is $50 notional, below the $110 floor.
        let quote = btc_quote(dec!(50000));
        let err = policy()
            .size(&open_long(dec!(5), Some(10)), dec!(500), &[], Some(&quote))
            .unwrap_err();
        assert!(matches!(err, SizingRejection::SubMinimumNotional { .. }));
    }

    #[test]
    fn test_leverage_raised_within_cap_to_clear_floor() {
        // $20 at 3x is $60 notional; 6x clears the $110 floor within the cap.
        let quote = btc_quote(dec!(50000));
        let sized = policy()
            .size(&open_long(dec!(20), Some(3)), dec!(500), &[], Some(&quote))
            .unwrap();
        match sized {
            SizedOrder::Open(order) => {
                assert_eq!(order.leverage, 6);
                assert_eq!(order.notional, dec!(120));
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn test_leverage_cap_never_exceeded_for_floor() {
        // $10 would need 11x for the floor; cap is 10 — reject.
        let quote = btc_quote(dec!(50000));
        let err = policy()
            .size(&open_long(dec!(10), Some(10)), dec!(500), &[], Some(&quote))
            .unwrap_err();
        assert_eq!(
            err,
            SizingRejection::SubMinimumNotional {
                notional: dec!(100),
                minimum: dec!(110),
            }
        );
    }

    #[test]
    fn test_position_cap_enforced_regardless_of_decision() {
        let quote = btc_quote(dec!(50000));
        let book: Vec<Position> = (0..6).map(|i| position(&format!("SYM{i}"))).collect();

        let err = policy()
            .size(&open_long(dec!(60), Some(10)), dec!(500), &book, Some(&quote))
            .unwrap_err();
        assert_eq!(err, SizingRejection::MaxPositionsReached { cap: 6 });
    }

    #[test]
    fn test_perpetual_requires_protective_levels() {
        let quote = btc_quote(dec!(50000));
        let decision = Decision::Open {
            direction: Direction::Long,
            instrument: "BTCUSDT".to_string(),
            stake: dec!(60),
            leverage: Some(10),
            stop_loss: None,
            take_profit: None,
            rationale: "naked".to_string(),
        };
        let err = policy()
            .size(&decision, dec!(500), &[], Some(&quote))
            .unwrap_err();
        assert!(matches!(err, SizingRejection::MissingProtectiveLevels { .. }));
    }

    #[test]
    fn test_prediction_instruments_exempt_from_protective_levels() {
        let quote = MarketQuote::new("btc-updown-15m", InstrumentKind::Prediction, dec!(0.50));
        let decision = Decision::Open {
            direction: Direction::Long,
            instrument: "btc-updown-15m".to_string(),
            stake: dec!(60),
            leverage: Some(2),
            stop_loss: None,
            take_profit: None,
            rationale: "binary".to_string(),
        };
        assert!(policy().size(&decision, dec!(500), &[], Some(&quote)).is_ok());
    }

    #[test]
    fn test_close_of_missing_position_is_noop() {
        let decision = Decision::Close {
            instrument: "ETHUSDT".to_string(),
            rationale: "take profit".to_string(),
        };
        let sized = policy().size(&decision, dec!(500), &[], None).unwrap();
        assert!(matches!(sized, SizedOrder::NoOp { .. }));
    }

    #[test]
    fn test_close_finds_open_position() {
        let decision = Decision::Close {
            instrument: "ETHUSDT".to_string(),
            rationale: "take profit".to_string(),
        };
        let book = vec![position("ETHUSDT")];
        let sized = policy().size(&decision, dec!(500), &book, None).unwrap();
        match sized {
            SizedOrder::Close { position, .. } => assert_eq!(position.instrument, "ETHUSDT"),
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn test_sizing_is_deterministic() {
        let quote = btc_quote(dec!(50000));
        let decision = open_long(dec!(60), Some(10));
        let a = policy().size(&decision, dec!(500), &[], Some(&quote)).unwrap();
        let b = policy().size(&decision, dec!(500), &[], Some(&quote)).unwrap();
        match (a, b) {
            (SizedOrder::Open(a), SizedOrder::Open(b)) => {
                assert_eq!(a.quantity, b.quantity);
                assert_eq!(a.notional, b.notional);
            }
            _ => panic!("expected Open for both"),
        }
    }

    #[test]
    fn test_zero_balance_rejected() {
        let quote = btc_quote(dec!(50000));
        let err = policy()
            .size(&open_long(dec!(60), Some(10)), Decimal::ZERO, &[], Some(&quote))
            .unwrap_err();
        assert!(matches!(err, SizingRejection::InsufficientBalance { .. }));
    }
}
