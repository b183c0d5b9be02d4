//! Persistence seam
//!
//! The core needs only CRUD for agents/positions, append-only writes for
//! the trade log and balance snapshots, and last-write-wins market rows —
//! not a specific storage technology. `MemoryStore` backs tests and dry
//! runs; `PostgresStore` is the durable adapter.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AgentState, BalanceSnapshot, Position, TradeLogEntry};
use crate::error::Result;
use crate::market::MarketQuote;

#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Agents ====================

    async fn upsert_agent(&self, agent: &AgentState) -> Result<()>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentState>>;

    async fn list_agents(&self) -> Result<Vec<AgentState>>;

    // ==================== Positions ====================

    async fn upsert_position(&self, position: &Position) -> Result<()>;

    async fn remove_position(&self, position_id: &str) -> Result<()>;

    async fn list_positions(&self) -> Result<Vec<Position>>;

    // ==================== Trade log (append-only) ====================

    async fn append_trade(&self, entry: &TradeLogEntry) -> Result<()>;

    /// Most recent entries, newest first.
    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeLogEntry>>;

    /// Drop entries older than the cutoff; returns how many were removed.
    async fn prune_trades_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // ==================== Balance snapshots (append-only) ====================

    async fn append_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<()>;

    async fn recent_balance_snapshots(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>>;

    // ==================== Market data (last write wins per instrument) ====

    async fn replace_market(&self, quotes: &[MarketQuote]) -> Result<()>;

    async fn get_market(&self) -> Result<Vec<MarketQuote>>;
}
