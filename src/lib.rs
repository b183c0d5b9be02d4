pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod history;
pub mod ledger;
pub mod market;
pub mod providers;
pub mod ratelimit;
pub mod reconcile;
pub mod registry;
pub mod risk;
pub mod scheduler;
pub mod server;
pub mod store;

pub use config::AppConfig;
pub use domain::{
    AgentState, BalanceSnapshot, Decision, Direction, ExecutionPhase, Position, RawDecision,
    TradeAction, TradeLogEntry,
};
pub use error::{ArenaError, LedgerError, Result};
pub use executor::{CycleReport, DecisionExecutor, ExecutionConfig};
pub use history::RingBuffer;
pub use ledger::{LedgerConfig, PositionLedger};
pub use market::{InstrumentKind, MarketDataCache, MarketQuote};
pub use providers::{
    AccountState, DecisionContext, DecisionProvider, ExchangeClient, OpenAiProvider,
    PaperExchange, ScriptedProvider,
};
pub use ratelimit::ProviderGate;
pub use reconcile::{BalanceReconciler, Reconciliation};
pub use registry::{AgentHandle, AgentRegistry};
pub use risk::{OpenOrder, RiskParams, RiskPolicy, SizedOrder, SizingRejection};
pub use scheduler::{CycleScheduler, SchedulerHandle};
pub use store::{MemoryStore, PostgresStore, Store};
