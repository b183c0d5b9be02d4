//! Trade decisions from the external provider
//!
//! Provider output is untrusted. `RawDecision` mirrors the wire shape the
//! provider is asked to produce; `Decision::parse` is the explicit
//! validation step that turns it into a strict tagged variant or rejects it.
//! Downstream code only ever sees `Decision` — raw fields are never
//! accessed optimistically.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Direction;
use crate::error::{ArenaError, Result};

/// Untrusted decision payload as produced by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDecision {
    pub action: String,
    #[serde(default, alias = "symbol")]
    pub instrument: Option<String>,
    #[serde(default, alias = "size")]
    pub stake: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default, alias = "stopLoss")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, alias = "takeProfit")]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Conversational one-liner shown in the trade feed.
    #[serde(default)]
    pub message: Option<String>,
}

impl RawDecision {
    pub fn hold(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            action: "HOLD".to_string(),
            reasoning: Some(reason.clone()),
            message: Some(reason),
            ..Default::default()
        }
    }

    /// Best available human-readable text for audit entries.
    pub fn rationale(&self) -> String {
        self.reasoning
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "no rationale provided".to_string())
    }
}

/// Validated trade decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Hold {
        rationale: String,
    },
    Open {
        direction: Direction,
        instrument: String,
        stake: Decimal,
        leverage: Option<u32>,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        rationale: String,
    },
    Close {
        instrument: String,
        rationale: String,
    },
}

impl Decision {
    /// Strict parse of an untrusted payload. Rejects unknown actions,
    /// missing required fields and non-positive numbers instead of
    /// defaulting — a malformed decision must surface as a rejection.
    pub fn parse(raw: &RawDecision) -> Result<Self> {
        let rationale = raw.rationale();

        match raw.action.trim().to_uppercase().as_str() {
            "HOLD" | "PASS" => Ok(Decision::Hold { rationale }),
            action @ ("LONG" | "SHORT") => {
                let direction = Direction::try_from(action)
                    .map_err(ArenaError::Validation)?;
                let instrument = require_instrument(raw)?;
                let stake = raw.stake.ok_or_else(|| {
                    ArenaError::Validation(format!("{action} decision missing stake"))
                })?;
                if stake <= Decimal::ZERO {
                    return Err(ArenaError::Validation(format!(
                        "{action} stake must be positive, got {stake}"
                    )));
                }
                if let Some(lev) = raw.leverage {
                    if lev == 0 {
                        return Err(ArenaError::Validation(
                            "leverage must be at least 1".to_string(),
                        ));
                    }
                }
                for (label, level) in [("stop_loss", raw.stop_loss), ("take_profit", raw.take_profit)]
                {
                    if let Some(price) = level {
                        if price <= Decimal::ZERO {
                            return Err(ArenaError::Validation(format!(
                                "{label} must be positive, got {price}"
                            )));
                        }
                    }
                }
                Ok(Decision::Open {
                    direction,
                    instrument,
                    stake,
                    leverage: raw.leverage,
                    stop_loss: raw.stop_loss,
                    take_profit: raw.take_profit,
                    rationale,
                })
            }
            "CLOSE" => Ok(Decision::Close {
                instrument: require_instrument(raw)?,
                rationale,
            }),
            other => Err(ArenaError::Validation(format!(
                "unknown decision action: {other:?}"
            ))),
        }
    }

    /// Synthetic HOLD used when the provider fails or times out.
    pub fn synthetic_hold(reason: impl Into<String>) -> Self {
        Decision::Hold {
            rationale: reason.into(),
        }
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            Decision::Hold { .. } => "HOLD",
            Decision::Open {
                direction: Direction::Long,
                ..
            } => "LONG",
            Decision::Open {
                direction: Direction::Short,
                ..
            } => "SHORT",
            Decision::Close { .. } => "CLOSE",
        }
    }

    pub fn rationale(&self) -> &str {
        match self {
            Decision::Hold { rationale }
            | Decision::Open { rationale, .. }
            | Decision::Close { rationale, .. } => rationale,
        }
    }
}

fn require_instrument(raw: &RawDecision) -> Result<String> {
    raw.instrument
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ArenaError::Validation(format!("{} decision missing instrument", raw.action))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw_open() -> RawDecision {
        RawDecision {
            action: "LONG".to_string(),
            instrument: Some("BTCUSDT".to_string()),
            stake: Some(dec!(60)),
            leverage: Some(10),
            stop_loss: Some(dec!(48500)),
            take_profit: Some(dec!(52500)),
            reasoning: Some("momentum".to_string()),
            message: None,
        }
    }

    #[test]
    fn test_parse_open_long() {
        let decision = Decision::parse(&raw_open()).unwrap();
        match decision {
            Decision::Open {
                direction,
                instrument,
                stake,
                leverage,
                ..
            } => {
                assert_eq!(direction, Direction::Long);
                assert_eq!(instrument, "BTCUSDT");
                assert_eq!(stake, dec!(60));
                assert_eq!(leverage, Some(10));
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        let raw = RawDecision {
            action: "YOLO".to_string(),
            ..Default::default()
        };
        let err = Decision::parse(&raw).unwrap_err();
        assert!(matches!(err, ArenaError::Validation(_)));
    }

    #[test]
    fn test_parse_rejects_missing_stake() {
        let mut raw = raw_open();
        raw.stake = None;
        assert!(Decision::parse(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_non_positive_stake() {
        let mut raw = raw_open();
        raw.stake = Some(dec!(-5));
        assert!(Decision::parse(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_close_without_instrument() {
        let raw = RawDecision {
            action: "CLOSE".to_string(),
            ..Default::default()
        };
        assert!(Decision::parse(&raw).is_err());
    }

    #[test]
    fn test_pass_is_hold() {
        let raw = RawDecision {
            action: "pass".to_string(),
            message: Some("sitting this one out".to_string()),
            ..Default::default()
        };
        let decision = Decision::parse(&raw).unwrap();
        assert_eq!(decision.action_name(), "HOLD");
        assert_eq!(decision.rationale(), "sitting this one out");
    }

    #[test]
    fn test_wire_aliases_accepted() {
        let json = r#"{"action":"SHORT","symbol":"ETHUSDT","size":45,"stopLoss":3200,"takeProfit":2900}"#;
        let raw: RawDecision = serde_json::from_str(json).unwrap();
        let decision = Decision::parse(&raw).unwrap();
        assert_eq!(decision.action_name(), "SHORT");
    }
}
