//! In-memory store for tests and dry runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::Store;
use crate::domain::{AgentState, BalanceSnapshot, Position, TradeLogEntry};
use crate::error::Result;
use crate::market::MarketQuote;

#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<String, AgentState>>,
    positions: RwLock<HashMap<String, Position>>,
    trades: RwLock<Vec<TradeLogEntry>>,
    snapshots: RwLock<Vec<BalanceSnapshot>>,
    market: RwLock<HashMap<String, MarketQuote>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_agent(&self, agent: &AgentState) -> Result<()> {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentState>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentState>> {
        let mut agents: Vec<AgentState> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.position_id.clone(), position.clone());
        Ok(())
    }

    async fn remove_position(&self, position_id: &str) -> Result<()> {
        self.positions.write().await.remove(position_id);
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn append_trade(&self, entry: &TradeLogEntry) -> Result<()> {
        self.trades.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeLogEntry>> {
        let trades = self.trades.read().await;
        Ok(trades.iter().rev().take(limit).cloned().collect())
    }

    async fn prune_trades_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut trades = self.trades.write().await;
        let before = trades.len();
        trades.retain(|t| t.timestamp >= cutoff);
        Ok((before - trades.len()) as u64)
    }

    async fn append_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn recent_balance_snapshots(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .iter()
            .rev()
            .filter(|s| s.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn replace_market(&self, quotes: &[MarketQuote]) -> Result<()> {
        let mut market = self.market.write().await;
        market.clear();
        for quote in quotes {
            market.insert(quote.instrument.clone(), quote.clone());
        }
        Ok(())
    }

    async fn get_market(&self) -> Result<Vec<MarketQuote>> {
        let mut quotes: Vec<MarketQuote> = self.market.read().await.values().cloned().collect();
        quotes.sort_by(|a, b| b.volume.cmp(&a.volume));
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_agent_round_trip() {
        let store = MemoryStore::new();
        let agent = AgentState::new("claude", "Claude", "balanced", dec!(500), 24);
        store.upsert_agent(&agent).await.unwrap();

        let loaded = store.get_agent("claude").await.unwrap().unwrap();
        assert_eq!(loaded.cash_balance, dec!(500));
        assert!(store.get_agent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trade_log_is_append_only_and_prunable() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let mut entry = TradeLogEntry::hold("a", "A", &format!("r{i}"), "m");
            entry.timestamp = Utc::now() - chrono::Duration::hours(i);
            store.append_trade(&entry).await.unwrap();
        }

        let recent = store.recent_trades(2).await.unwrap();
        assert_eq!(recent.len(), 2);

        let pruned = store
            .prune_trades_before(Utc::now() - chrono::Duration::minutes(90))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.recent_trades(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_market_replace_is_last_write_wins() {
        let store = MemoryStore::new();
        let quote = |i: &str, v| {
            crate::market::MarketQuote::new(i, crate::market::InstrumentKind::Perpetual, dec!(1))
                .with_volume(v)
        };

        store
            .replace_market(&[quote("A", dec!(10)), quote("B", dec!(20))])
            .await
            .unwrap();
        store.replace_market(&[quote("B", dec!(30))]).await.unwrap();

        let market = store.get_market().await.unwrap();
        assert_eq!(market.len(), 1);
        assert_eq!(market[0].instrument, "B");
    }
}
