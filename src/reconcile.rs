//! Balance reconciler & anomaly guard
//!
//! Merges the exchange-reported account value into the internal accounting,
//! rejecting implausible swings. This is the only defense against a garbage
//! read propagating into sizing and reporting: a rejected tick keeps the
//! prior value and skips the dependent writes (history push, snapshot).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcome of assessing one exchange-reported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reconciliation {
    /// Plausible update: commit, snapshot, push history.
    Committed {
        value: Decimal,
        /// Signed percent change from the prior committed value.
        change_pct: Decimal,
    },
    /// Implausible swing: retain the prior value, skip dependent writes.
    Anomaly {
        prior: Decimal,
        reported: Decimal,
        change_pct: Decimal,
        threshold_pct: Decimal,
    },
}

impl Reconciliation {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Reconciliation::Anomaly { .. })
    }
}

/// Stateless guard; the caller owns the prior value and applies the effects.
#[derive(Debug, Clone)]
pub struct BalanceReconciler {
    /// Maximum plausible |change| per tick, as a percentage (e.g. 20).
    threshold_pct: Decimal,
}

impl BalanceReconciler {
    pub fn new(threshold_pct: Decimal) -> Self {
        Self { threshold_pct }
    }

    /// Assess an exchange-reported account value against the last committed
    /// one. A prior of zero (fresh agent, no committed history) always
    /// commits.
    pub fn assess(&self, agent_id: &str, prior: Decimal, reported: Decimal) -> Reconciliation {
        if prior <= Decimal::ZERO {
            return Reconciliation::Committed {
                value: reported,
                change_pct: Decimal::ZERO,
            };
        }

        let change_pct = (reported - prior) / prior * Decimal::ONE_HUNDRED;

        if change_pct.abs() > self.threshold_pct {
            warn!(
                "Anomalous balance for {}: ${} -> ${} ({}% swing, threshold {}%) — keeping prior",
                agent_id,
                prior,
                reported,
                change_pct.round_dp(2),
                self.threshold_pct
            );
            return Reconciliation::Anomaly {
                prior,
                reported,
                change_pct,
                threshold_pct: self.threshold_pct,
            };
        }

        Reconciliation::Committed {
            value: reported,
            change_pct,
        }
    }
}

impl Default for BalanceReconciler {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self::new(dec!(20))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_accepts_swing_within_threshold() {
        let guard = BalanceReconciler::default();
        // $500 -> $550 is a 10% move.
        match guard.assess("claude", dec!(500), dec!(550)) {
            Reconciliation::Committed { value, change_pct } => {
                assert_eq!(value, dec!(550));
                assert_eq!(change_pct, dec!(10));
            }
            other => panic!("expected Committed, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_25_pct_swings_both_directions() {
        let guard = BalanceReconciler::default();
        assert!(guard.assess("claude", dec!(500), dec!(625)).is_anomaly());
        assert!(guard.assess("claude", dec!(500), dec!(375)).is_anomaly());
    }

    #[test]
    fn test_rejects_garbage_read() {
        // $512 -> $5,000 is roughly an 877% swing.
        let guard = BalanceReconciler::default();
        match guard.assess("claude", dec!(512), dec!(5000)) {
            Reconciliation::Anomaly {
                prior, reported, ..
            } => {
                assert_eq!(prior, dec!(512));
                assert_eq!(reported, dec!(5000));
            }
            other => panic!("expected Anomaly, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_threshold_is_committed() {
        let guard = BalanceReconciler::default();
        // A move of exactly 20% is plausible; only beyond it is anomalous.
        assert!(!guard.assess("claude", dec!(500), dec!(600)).is_anomaly());
        assert!(guard.assess("claude", dec!(500), dec!(601)).is_anomaly());
    }

    #[test]
    fn test_zero_prior_bootstraps_unconditionally() {
        let guard = BalanceReconciler::default();
        match guard.assess("claude", Decimal::ZERO, dec!(500)) {
            Reconciliation::Committed { value, .. } => assert_eq!(value, dec!(500)),
            other => panic!("expected Committed, got {other:?}"),
        }
    }
}
