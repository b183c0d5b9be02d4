pub mod agent;
pub mod decision;
pub mod position;
pub mod state;
pub mod trade_log;

pub use agent::{AgentState, BalanceSnapshot};
pub use decision::{Decision, RawDecision};
pub use position::{ClosedPosition, Direction, Position};
pub use state::{ExecutionPhase, PhaseTransition};
pub use trade_log::{TradeAction, TradeLogEntry};
