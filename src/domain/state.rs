use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision-execution state machine phases.
///
/// One decision travels Received → Validated → Sized → Submitted → Settled,
/// or exits early into Rejected (validation/sizing) or Failed (exchange).
/// Every terminal phase produces exactly one trade-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionPhase {
    /// Raw decision received from the provider
    Received,
    /// Passed strict schema/field validation
    Validated,
    /// Risk & sizing policy produced an executable order
    Sized,
    /// Dispatched to the exchange, awaiting confirmation
    Submitted,
    /// Exchange confirmed; ledger and audit trail updated
    Settled,
    /// Refused by validation or sizing
    Rejected,
    /// Exchange or network failure mid-submission
    Failed,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Received => "RECEIVED",
            ExecutionPhase::Validated => "VALIDATED",
            ExecutionPhase::Sized => "SIZED",
            ExecutionPhase::Submitted => "SUBMITTED",
            ExecutionPhase::Settled => "SETTLED",
            ExecutionPhase::Rejected => "REJECTED",
            ExecutionPhase::Failed => "FAILED",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: ExecutionPhase) -> bool {
        use ExecutionPhase::*;

        match (self, target) {
            // From Received
            (Received, Validated) => true,
            (Received, Rejected) => true, // Malformed payload

            // From Validated
            (Validated, Sized) => true,
            (Validated, Rejected) => true, // Sizing refusal

            // From Sized
            (Sized, Submitted) => true,
            (Sized, Settled) => true, // HOLD / no-op short-circuits the exchange

            // From Submitted
            (Submitted, Settled) => true,
            (Submitted, Failed) => true, // Network/exchange error

            // Terminal states go nowhere
            _ => false,
        }
    }

    pub fn valid_transitions(&self) -> Vec<ExecutionPhase> {
        use ExecutionPhase::*;

        match self {
            Received => vec![Validated, Rejected],
            Validated => vec![Sized, Rejected],
            Sized => vec![Submitted, Settled],
            Submitted => vec![Settled, Failed],
            Settled | Rejected | Failed => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionPhase::Settled | ExecutionPhase::Rejected | ExecutionPhase::Failed
        )
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ExecutionPhase {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "RECEIVED" => Ok(ExecutionPhase::Received),
            "VALIDATED" => Ok(ExecutionPhase::Validated),
            "SIZED" => Ok(ExecutionPhase::Sized),
            "SUBMITTED" => Ok(ExecutionPhase::Submitted),
            "SETTLED" => Ok(ExecutionPhase::Settled),
            "REJECTED" => Ok(ExecutionPhase::Rejected),
            "FAILED" => Ok(ExecutionPhase::Failed),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

/// Phase transition record (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ExecutionPhase,
    pub to: ExecutionPhase,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PhaseTransition {
    pub fn new(from: ExecutionPhase, to: ExecutionPhase, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use ExecutionPhase::*;

        assert!(Received.can_transition_to(Validated));
        assert!(Received.can_transition_to(Rejected));
        assert!(Validated.can_transition_to(Sized));
        assert!(Validated.can_transition_to(Rejected));
        assert!(Sized.can_transition_to(Submitted));
        assert!(Sized.can_transition_to(Settled));
        assert!(Submitted.can_transition_to(Settled));
        assert!(Submitted.can_transition_to(Failed));

        // Invalid transitions
        assert!(!Received.can_transition_to(Submitted));
        assert!(!Validated.can_transition_to(Failed));
        assert!(!Settled.can_transition_to(Received));
        assert!(!Rejected.can_transition_to(Validated));
        assert!(!Failed.can_transition_to(Submitted));
    }

    #[test]
    fn test_terminal_phases_have_no_exits() {
        assert!(ExecutionPhase::Settled.is_terminal());
        assert!(ExecutionPhase::Rejected.is_terminal());
        assert!(ExecutionPhase::Failed.is_terminal());
        assert!(ExecutionPhase::Settled.valid_transitions().is_empty());
        assert!(ExecutionPhase::Rejected.valid_transitions().is_empty());
        assert!(ExecutionPhase::Failed.valid_transitions().is_empty());

        assert!(!ExecutionPhase::Received.is_terminal());
        assert!(!ExecutionPhase::Submitted.is_terminal());
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!(
            ExecutionPhase::try_from("SETTLED").unwrap(),
            ExecutionPhase::Settled
        );
        assert_eq!(
            ExecutionPhase::try_from("sized").unwrap(),
            ExecutionPhase::Sized
        );
        assert!(ExecutionPhase::try_from("INVALID").is_err());
    }
}
