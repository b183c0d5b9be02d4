//! PostgreSQL storage adapter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::Store;
use crate::domain::{
    AgentState, BalanceSnapshot, Direction, Position, TradeAction, TradeLogEntry,
};
use crate::error::{ArenaError, Result};
use crate::history::RingBuffer;
use crate::market::{InstrumentKind, MarketQuote};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_agent(row: &sqlx::postgres::PgRow) -> Result<AgentState> {
        let history: serde_json::Value = row.get("pnl_history");
        let pnl_history: RingBuffer<Decimal> = serde_json::from_value(history)?;

        Ok(AgentState {
            id: row.get("id"),
            name: row.get("name"),
            persona: row.get("persona"),
            cash_balance: row.get("cash_balance"),
            account_value: row.get("account_value"),
            initial_balance: row.get("initial_balance"),
            total_return_pct: row.get("total_return_pct"),
            pnl_history,
            pnl_24h_pct: row.get("pnl_24h_pct"),
            total_trades: row.get::<i64, _>("total_trades") as u64,
            wins: row.get::<i64, _>("wins") as u64,
            losses: row.get::<i64, _>("losses") as u64,
            last_decision: row.get("last_decision"),
            last_update: row.get("last_update"),
        })
    }

    fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position> {
        let kind: String = row.get("kind");
        let direction: String = row.get("direction");

        Ok(Position {
            position_id: row.get("position_id"),
            agent_id: row.get("agent_id"),
            instrument: row.get("instrument"),
            kind: match kind.as_str() {
                "prediction" => InstrumentKind::Prediction,
                _ => InstrumentKind::Perpetual,
            },
            direction: Direction::try_from(direction.as_str())
                .map_err(ArenaError::Validation)?,
            quantity: row.get("quantity"),
            entry_price: row.get("entry_price"),
            leverage: row.get::<i32, _>("leverage") as u32,
            cost_basis: row.get("cost_basis"),
            notional: row.get("notional"),
            mark_price: row.get("mark_price"),
            unrealized_pnl: row.get("unrealized_pnl"),
            unrealized_pnl_pct: row.get("unrealized_pnl_pct"),
            opened_at: row.get("opened_at"),
            stop_loss: row.get("stop_loss"),
            take_profit: row.get("take_profit"),
            stop_loss_order_id: row.get("stop_loss_order_id"),
            take_profit_order_id: row.get("take_profit_order_id"),
        })
    }

    fn row_to_trade(row: &sqlx::postgres::PgRow) -> Result<TradeLogEntry> {
        let action: String = row.get("action");
        let direction: Option<String> = row.get("direction");

        Ok(TradeLogEntry {
            id: row.get::<Uuid, _>("id"),
            agent_id: row.get("agent_id"),
            agent_name: row.get("agent_name"),
            action: match action.as_str() {
                "OPEN" => TradeAction::Open,
                "CLOSE" => TradeAction::Close,
                "FAILED" => TradeAction::Failed,
                _ => TradeAction::Hold,
            },
            instrument: row.get("instrument"),
            direction: direction
                .as_deref()
                .map(Direction::try_from)
                .transpose()
                .map_err(ArenaError::Validation)?,
            quantity: row.get("quantity"),
            leverage: row.get::<Option<i32>, _>("leverage").map(|l| l as u32),
            entry_price: row.get("entry_price"),
            exit_price: row.get("exit_price"),
            notional: row.get("notional"),
            collateral: row.get("collateral"),
            pnl: row.get("pnl"),
            pnl_pct: row.get("pnl_pct"),
            holding_time: row.get("holding_time"),
            rationale: row.get("rationale"),
            message: row.get("message"),
            timestamp: row.get("timestamp"),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_agent(&self, agent: &AgentState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, persona, cash_balance, account_value, initial_balance,
                total_return_pct, pnl_history, pnl_24h_pct, total_trades, wins,
                losses, last_decision, last_update
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                cash_balance = EXCLUDED.cash_balance,
                account_value = EXCLUDED.account_value,
                total_return_pct = EXCLUDED.total_return_pct,
                pnl_history = EXCLUDED.pnl_history,
                pnl_24h_pct = EXCLUDED.pnl_24h_pct,
                total_trades = EXCLUDED.total_trades,
                wins = EXCLUDED.wins,
                losses = EXCLUDED.losses,
                last_decision = EXCLUDED.last_decision,
                last_update = EXCLUDED.last_update
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.persona)
        .bind(agent.cash_balance)
        .bind(agent.account_value)
        .bind(agent.initial_balance)
        .bind(agent.total_return_pct)
        .bind(serde_json::to_value(&agent.pnl_history)?)
        .bind(agent.pnl_24h_pct)
        .bind(agent.total_trades as i64)
        .bind(agent.wins as i64)
        .bind(agent.losses as i64)
        .bind(&agent.last_decision)
        .bind(agent.last_update)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentState>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<AgentState>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                position_id, agent_id, instrument, kind, direction, quantity,
                entry_price, leverage, cost_basis, notional, mark_price,
                unrealized_pnl, unrealized_pnl_pct, opened_at, stop_loss,
                take_profit, stop_loss_order_id, take_profit_order_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18)
            ON CONFLICT (position_id) DO UPDATE SET
                mark_price = EXCLUDED.mark_price,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                unrealized_pnl_pct = EXCLUDED.unrealized_pnl_pct,
                stop_loss_order_id = EXCLUDED.stop_loss_order_id,
                take_profit_order_id = EXCLUDED.take_profit_order_id
            "#,
        )
        .bind(&position.position_id)
        .bind(&position.agent_id)
        .bind(&position.instrument)
        .bind(position.kind.as_str())
        .bind(position.direction.as_str())
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.leverage as i32)
        .bind(position.cost_basis)
        .bind(position.notional)
        .bind(position.mark_price)
        .bind(position.unrealized_pnl)
        .bind(position.unrealized_pnl_pct)
        .bind(position.opened_at)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(&position.stop_loss_order_id)
        .bind(&position.take_profit_order_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_position(&self, position_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE position_id = $1")
            .bind(position_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY opened_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_position).collect()
    }

    async fn append_trade(&self, entry: &TradeLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_log (
                id, agent_id, agent_name, action, instrument, direction,
                quantity, leverage, entry_price, exit_price, notional,
                collateral, pnl, pnl_pct, holding_time, rationale, message,
                timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.agent_id)
        .bind(&entry.agent_name)
        .bind(entry.action.as_str())
        .bind(&entry.instrument)
        .bind(entry.direction.map(|d| d.as_str()))
        .bind(entry.quantity)
        .bind(entry.leverage.map(|l| l as i32))
        .bind(entry.entry_price)
        .bind(entry.exit_price)
        .bind(entry.notional)
        .bind(entry.collateral)
        .bind(entry.pnl)
        .bind(entry.pnl_pct)
        .bind(&entry.holding_time)
        .bind(&entry.rationale)
        .bind(&entry.message)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeLogEntry>> {
        let rows = sqlx::query("SELECT * FROM trade_log ORDER BY timestamp DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn prune_trades_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM trade_log WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balance_snapshots (
                agent_id, cash_balance, unrealized_pnl, account_value,
                total_return_pct, open_positions, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&snapshot.agent_id)
        .bind(snapshot.cash_balance)
        .bind(snapshot.unrealized_pnl)
        .bind(snapshot.account_value)
        .bind(snapshot.total_return_pct)
        .bind(snapshot.open_positions as i32)
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_balance_snapshots(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, cash_balance, unrealized_pnl, account_value,
                   total_return_pct, open_positions, timestamp
            FROM balance_snapshots
            WHERE agent_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| BalanceSnapshot {
                agent_id: row.get("agent_id"),
                cash_balance: row.get("cash_balance"),
                unrealized_pnl: row.get("unrealized_pnl"),
                account_value: row.get("account_value"),
                total_return_pct: row.get("total_return_pct"),
                open_positions: row.get::<i32, _>("open_positions") as usize,
                timestamp: row.get("timestamp"),
            })
            .collect())
    }

    async fn replace_market(&self, quotes: &[MarketQuote]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM market_data")
            .execute(&mut *tx)
            .await?;

        for quote in quotes {
            sqlx::query(
                r#"
                INSERT INTO market_data (
                    instrument, kind, price, change_24h_pct, volume, refreshed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (instrument) DO UPDATE SET
                    price = EXCLUDED.price,
                    change_24h_pct = EXCLUDED.change_24h_pct,
                    volume = EXCLUDED.volume,
                    refreshed_at = EXCLUDED.refreshed_at
                "#,
            )
            .bind(&quote.instrument)
            .bind(quote.kind.as_str())
            .bind(quote.price)
            .bind(quote.change_24h_pct)
            .bind(quote.volume)
            .bind(quote.refreshed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_market(&self) -> Result<Vec<MarketQuote>> {
        let rows = sqlx::query("SELECT * FROM market_data ORDER BY volume DESC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("kind");
                MarketQuote {
                    instrument: row.get("instrument"),
                    kind: match kind.as_str() {
                        "prediction" => InstrumentKind::Prediction,
                        _ => InstrumentKind::Perpetual,
                    },
                    price: row.get("price"),
                    change_24h_pct: row.get("change_24h_pct"),
                    volume: row.get("volume"),
                    refreshed_at: row.get("refreshed_at"),
                }
            })
            .collect())
    }
}
