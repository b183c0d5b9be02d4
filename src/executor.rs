//! Decision executor
//!
//! Drives one decision through the execution state machine
//! (Received → Validated → Sized → Submitted → terminal) and owns every
//! mutation of an agent's ledger entries and balances. Callers must hold
//! the agent's state lock for the duration of a call — the executor methods
//! take the guard-protected state by `&mut` to make that explicit.
//!
//! Every terminal phase appends exactly one trade-log entry. An exchange or
//! network failure is a Failed entry — a HOLD-equivalent for the book, but
//! distinguishable from a genuine no-op. Order placement is never retried;
//! the next tick re-fetches positions and balances before acting, so a
//! timed-out submission is never blindly resubmitted.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::{
    AgentState, Decision, ExecutionPhase, PhaseTransition, Position, RawDecision, TradeAction,
    TradeLogEntry,
};
use crate::error::{ArenaError, Result};
use crate::ledger::PositionLedger;
use crate::market::{MarketDataCache, MarketQuote};
use crate::providers::{DecisionContext, OrderTicket};
use crate::ratelimit::ProviderGate;
use crate::reconcile::{BalanceReconciler, Reconciliation};
use crate::registry::AgentHandle;
use crate::risk::{OpenOrder, SizedOrder};
use crate::store::Store;

/// Executor timeouts and retry bounds.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Hard ceiling on one decision-provider call.
    pub provider_timeout: Duration,
    /// Hard ceiling on each exchange call.
    pub exchange_timeout: Duration,
    /// Bounded attempts for idempotent reads. Orders get one attempt.
    pub max_read_retries: u8,
    /// Instruments shown to the provider per cycle.
    pub market_depth: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(60),
            exchange_timeout: Duration::from_secs(15),
            max_read_retries: 3,
            market_depth: 20,
        }
    }
}

/// Outcome summary of one decision cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub agent_id: String,
    pub phase: ExecutionPhase,
    pub action: TradeAction,
}

pub struct DecisionExecutor {
    ledger: Arc<PositionLedger>,
    store: Arc<dyn Store>,
    market: Arc<MarketDataCache>,
    reconciler: BalanceReconciler,
    provider_gate: Arc<ProviderGate>,
    config: ExecutionConfig,
}

impl DecisionExecutor {
    pub fn new(
        ledger: Arc<PositionLedger>,
        store: Arc<dyn Store>,
        market: Arc<MarketDataCache>,
        reconciler: BalanceReconciler,
        provider_gate: Arc<ProviderGate>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            market,
            reconciler,
            provider_gate,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    // ==================== Decision cycle ====================

    /// One full fetch → decide → size → execute → record pass for an agent.
    pub async fn run_cycle(&self, handle: &AgentHandle) -> Result<CycleReport> {
        let mut agent = handle.state.lock().await;
        info!("Running decision cycle for {}", agent.name);

        self.close_expired_locked(handle, &mut agent).await;
        self.sync_locked(handle, &mut agent).await;

        let open_positions = self.ledger.list_open(&agent.id).await;
        let ctx = DecisionContext::new(
            &agent,
            open_positions.clone(),
            self.market.top_by_volume(self.config.market_depth),
        );

        let mut phase = ExecutionPhase::Received;
        let raw = self.fetch_decision(handle, &agent, &ctx).await;

        if let Some(message) = raw.message.clone().or_else(|| raw.reasoning.clone()) {
            agent.set_last_decision(message);
        }

        // Received → Validated | Rejected
        let decision = match Decision::parse(&raw) {
            Ok(decision) => {
                self.advance(&agent.id, &mut phase, ExecutionPhase::Validated, "parsed");
                decision
            }
            Err(e) => {
                self.advance(&agent.id, &mut phase, ExecutionPhase::Rejected, &e.to_string());
                let entry = TradeLogEntry::hold(
                    &agent.id,
                    &agent.name,
                    &format!("decision rejected: {e}"),
                    &raw.rationale(),
                );
                return self.finish(&mut agent, phase, entry).await;
            }
        };

        // Validated → Sized | Rejected
        let quote = match &decision {
            Decision::Open { instrument, .. } => self.quote_for(handle, instrument).await,
            _ => None,
        };
        let sized = match handle.policy().size(
            &decision,
            agent.cash_balance,
            &open_positions,
            quote.as_ref(),
        ) {
            Ok(sized) => {
                self.advance(&agent.id, &mut phase, ExecutionPhase::Sized, "sized");
                sized
            }
            Err(rejection) => {
                self.advance(
                    &agent.id,
                    &mut phase,
                    ExecutionPhase::Rejected,
                    &rejection.to_string(),
                );
                let entry = TradeLogEntry::hold(
                    &agent.id,
                    &agent.name,
                    &format!("sizing rejected: {rejection}"),
                    decision.rationale(),
                );
                return self.finish(&mut agent, phase, entry).await;
            }
        };

        // Sized → Submitted → Settled | Failed, or a direct no-op settle
        match sized {
            SizedOrder::NoOp { rationale } => {
                self.advance(&agent.id, &mut phase, ExecutionPhase::Settled, "no-op");
                let message = raw.message.clone().unwrap_or_else(|| rationale.clone());
                let entry = TradeLogEntry::hold(&agent.id, &agent.name, &rationale, &message);
                self.finish(&mut agent, phase, entry).await
            }
            SizedOrder::Open(order) => {
                self.execute_open(handle, &mut agent, &mut phase, order, &raw).await
            }
            SizedOrder::Close {
                position,
                rationale,
            } => {
                self.execute_close(handle, &mut agent, &mut phase, position, &rationale, &raw)
                    .await
            }
        }
    }

    async fn execute_open(
        &self,
        handle: &AgentHandle,
        agent: &mut AgentState,
        phase: &mut ExecutionPhase,
        order: OpenOrder,
        raw: &RawDecision,
    ) -> Result<CycleReport> {
        let ticket = OrderTicket {
            instrument: order.instrument.clone(),
            direction: order.direction,
            quantity: order.quantity,
            leverage: order.leverage,
        };

        self.advance(&agent.id, phase, ExecutionPhase::Submitted, "order dispatched");
        info!(
            "{}: opening {} {} | stake ${} | {}x | notional ${}",
            agent.name, order.direction, order.instrument, order.stake, order.leverage, order.notional
        );

        let receipt = match self.submit_once(|| handle.exchange.place_order(&ticket)).await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.advance(&agent.id, phase, ExecutionPhase::Failed, &e.to_string());
                let entry = TradeLogEntry::failed(
                    &agent.id,
                    &agent.name,
                    &format!("open {} failed: {e}", order.instrument),
                    &raw.rationale(),
                );
                return self.finish(agent, *phase, entry).await;
            }
        };

        // Settlement: ledger insert + cash debit are one atomic step under
        // the agent lock.
        let position = match self.ledger.open(agent, &order, receipt.fill_price).await {
            Ok(position) => position,
            Err(e) => {
                // The fill landed but the ledger refused it. Surface loudly:
                // the audit trail must still record the cycle.
                error!("{}: settled fill refused by ledger: {e}", agent.name);
                self.advance(&agent.id, phase, ExecutionPhase::Failed, &e.to_string());
                let entry = TradeLogEntry::failed(
                    &agent.id,
                    &agent.name,
                    &format!("ledger refused settled open: {e}"),
                    &raw.rationale(),
                );
                return self.finish(agent, *phase, entry).await;
            }
        };
        agent.cash_balance -= order.stake;
        agent.refresh_account_value(self.ledger.unrealized_total(&agent.id).await);

        // Best-effort protective follow-ups. A failure here is logged and
        // never rolls back the settlement.
        let protective_ids = self.place_protective_orders(handle, agent, &order).await;
        if protective_ids != (None, None) {
            let _ = self
                .ledger
                .set_protective_orders(
                    &position.position_id,
                    protective_ids.0.clone(),
                    protective_ids.1.clone(),
                )
                .await;
        }
        let position = self.ledger.get(&position.position_id).await.unwrap_or(position);
        self.store.upsert_position(&position).await?;

        self.advance(&agent.id, phase, ExecutionPhase::Settled, "fill confirmed");
        let message = raw
            .message
            .clone()
            .unwrap_or_else(|| format!("Opened {} {}", order.direction, order.instrument));
        let entry = TradeLogEntry::open(&agent.id, &agent.name, &order, receipt.fill_price, &message);
        self.finish(agent, *phase, entry).await
    }

    async fn execute_close(
        &self,
        handle: &AgentHandle,
        agent: &mut AgentState,
        phase: &mut ExecutionPhase,
        position: Position,
        rationale: &str,
        raw: &RawDecision,
    ) -> Result<CycleReport> {
        self.advance(&agent.id, phase, ExecutionPhase::Submitted, "close dispatched");

        let fill = match self
            .submit_once(|| {
                handle.exchange.close_position(
                    &position.instrument,
                    position.direction,
                    position.quantity,
                )
            })
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                // Position stays exactly as it was — close is all or nothing.
                self.advance(&agent.id, phase, ExecutionPhase::Failed, &e.to_string());
                let entry = TradeLogEntry::failed(
                    &agent.id,
                    &agent.name,
                    &format!("close {} failed: {e}", position.instrument),
                    &raw.rationale(),
                );
                return self.finish(agent, *phase, entry).await;
            }
        };

        self.cancel_protective_orders(handle, agent, &position).await;

        let closed = match self.ledger.close(&position.position_id, fill.fill_price).await {
            Ok(closed) => closed,
            Err(_) => {
                // Already removed (protective fill raced us): idempotent no-op.
                self.advance(&agent.id, phase, ExecutionPhase::Settled, "already closed");
                let entry = TradeLogEntry::hold(
                    &agent.id,
                    &agent.name,
                    &format!("{} was already closed", position.instrument),
                    &raw.rationale(),
                );
                return self.finish(agent, *phase, entry).await;
            }
        };

        // Cash credit, counters and audit move together with the removal.
        agent.cash_balance += closed.position.cost_basis + closed.pnl;
        agent.record_close(closed.pnl);
        agent.refresh_account_value(self.ledger.unrealized_total(&agent.id).await);
        self.store.remove_position(&closed.position.position_id).await?;

        self.advance(&agent.id, phase, ExecutionPhase::Settled, "close confirmed");
        info!(
            "{}: closed {} {} | entry ${} -> exit ${} | PnL ${} ({}%) | held {}",
            agent.name,
            closed.position.direction,
            closed.position.instrument,
            closed.position.entry_price,
            closed.exit_price,
            closed.pnl.round_dp(2),
            closed.pnl_pct.round_dp(2),
            closed.holding_display()
        );

        let message = raw
            .message
            .clone()
            .unwrap_or_else(|| format!("Closed {}", closed.position.instrument));
        let entry = TradeLogEntry::close(&agent.id, &agent.name, &closed, rationale, &message);
        self.finish(agent, *phase, entry).await
    }

    // ==================== Balance / PnL sync ====================

    /// Mark-to-market plus reconciliation, without invoking the provider.
    pub async fn sync_balances(&self, handle: &AgentHandle) -> Result<()> {
        let mut agent = handle.state.lock().await;
        self.sync_locked(handle, &mut agent).await;
        Ok(())
    }

    async fn sync_locked(&self, handle: &AgentHandle, agent: &mut AgentState) {
        for position in self.ledger.list_open(&agent.id).await {
            match self.quote_with_retry(handle, &position.instrument).await {
                Ok(quote) => {
                    if self
                        .ledger
                        .mark_to_market(&position.position_id, quote.price)
                        .await
                        .is_ok()
                    {
                        if let Some(marked) = self.ledger.get(&position.position_id).await {
                            if let Err(e) = self.store.upsert_position(&marked).await {
                                warn!("{}: position write failed: {e}", agent.name);
                            }
                        }
                    }
                }
                Err(e) => warn!(
                    "{}: no mark price for {}: {e}",
                    agent.name, position.instrument
                ),
            }
        }

        let reported = match self.account_state_with_retry(handle).await {
            Ok(state) => state.account_value(),
            Err(e) => {
                warn!(
                    "{}: account state unavailable, keeping internal value: {e}",
                    agent.name
                );
                return;
            }
        };

        match self.reconciler.assess(&agent.id, agent.account_value, reported) {
            Reconciliation::Committed { value, change_pct } => {
                let unrealized = self.ledger.unrealized_total(&agent.id).await;
                agent.commit_account_value(value, unrealized);
                debug!(
                    "{}: committed account value ${} ({}%)",
                    agent.name,
                    value.round_dp(2),
                    change_pct.round_dp(2)
                );

                let open_count = self.ledger.open_count(&agent.id).await;
                if let Err(e) = self
                    .store
                    .append_balance_snapshot(&agent.snapshot(open_count))
                    .await
                {
                    warn!("{}: snapshot write failed: {e}", agent.name);
                }
                if let Err(e) = self.store.upsert_agent(agent).await {
                    warn!("{}: agent write failed: {e}", agent.name);
                }
            }
            Reconciliation::Anomaly { .. } => {
                // Prior value retained; history push and snapshot skipped
                // for this tick. Stale-but-plausible beats corrupt.
            }
        }
    }

    // ==================== Expiry sweep ====================

    async fn close_expired_locked(&self, handle: &AgentHandle, agent: &mut AgentState) {
        let expired = self
            .ledger
            .expired(&agent.id, chrono::Utc::now(), handle.max_holding())
            .await;

        for position in expired {
            info!(
                "{}: {} exceeded the {}-minute holding limit, closing",
                agent.name,
                position.instrument,
                handle.max_holding().num_minutes()
            );

            let fill = match self
                .submit_once(|| {
                    handle.exchange.close_position(
                        &position.instrument,
                        position.direction,
                        position.quantity,
                    )
                })
                .await
            {
                Ok(fill) => fill,
                Err(e) => {
                    warn!(
                        "{}: expiry close of {} failed: {e}",
                        agent.name, position.instrument
                    );
                    continue;
                }
            };

            self.cancel_protective_orders(handle, agent, &position).await;

            let Ok(closed) = self.ledger.close(&position.position_id, fill.fill_price).await
            else {
                continue;
            };

            agent.cash_balance += closed.position.cost_basis + closed.pnl;
            agent.record_close(closed.pnl);
            agent.refresh_account_value(self.ledger.unrealized_total(&agent.id).await);

            let rationale = format!(
                "auto-closed after {} (time limit exceeded)",
                closed.holding_display()
            );
            let entry = TradeLogEntry::close(&agent.id, &agent.name, &closed, &rationale, &rationale);
            if let Err(e) = self.store.remove_position(&closed.position.position_id).await {
                warn!("{}: position removal failed: {e}", agent.name);
            }
            if let Err(e) = self.store.append_trade(&entry).await {
                warn!("{}: audit write failed: {e}", agent.name);
            }
        }
    }

    // ==================== Helpers ====================

    /// Provider call behind the shared gate, degraded to a synthetic HOLD
    /// on any failure — a provider outage must never crash the cycle.
    async fn fetch_decision(
        &self,
        handle: &AgentHandle,
        agent: &AgentState,
        ctx: &DecisionContext,
    ) -> RawDecision {
        let _pass = self.provider_gate.acquire().await;

        match timeout(
            self.config.provider_timeout,
            handle.provider.get_decision(agent, ctx),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("{}: decision provider failed: {e}", agent.name);
                RawDecision::hold(format!("decision provider unavailable: {e}"))
            }
            Err(_) => {
                warn!(
                    "{}: decision provider timed out after {:?}",
                    agent.name, self.config.provider_timeout
                );
                RawDecision::hold("decision provider timed out")
            }
        }
    }

    /// Single-attempt submission with a hard timeout. Never retried: a
    /// retried market order risks duplicate execution.
    async fn submit_once<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match timeout(self.config.exchange_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ArenaError::OrderTimeout(format!(
                "no confirmation within {:?}; state re-fetched next tick",
                self.config.exchange_timeout
            ))),
        }
    }

    async fn quote_for(&self, handle: &AgentHandle, instrument: &str) -> Option<MarketQuote> {
        if let Some(quote) = self.market.fresh(instrument) {
            return Some(quote);
        }
        self.quote_with_retry(handle, instrument).await.ok()
    }

    async fn quote_with_retry(
        &self,
        handle: &AgentHandle,
        instrument: &str,
    ) -> Result<MarketQuote> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_read_retries.max(1) {
            match timeout(
                self.config.exchange_timeout,
                handle.exchange.get_quote(instrument),
            )
            .await
            {
                Ok(Ok(quote)) => return Ok(quote),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(ArenaError::MarketDataUnavailable(format!(
                        "quote request for {instrument} timed out"
                    )))
                }
            }
            if attempt < self.config.max_read_retries {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| ArenaError::QuoteUnavailable {
            instrument: instrument.to_string(),
        }))
    }

    async fn account_state_with_retry(
        &self,
        handle: &AgentHandle,
    ) -> Result<crate::providers::AccountState> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_read_retries.max(1) {
            match timeout(
                self.config.exchange_timeout,
                handle.exchange.get_account_state(),
            )
            .await
            {
                Ok(Ok(state)) => return Ok(state),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(ArenaError::StaleData(
                        "account state request timed out".to_string(),
                    ))
                }
            }
            if attempt < self.config.max_read_retries {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| ArenaError::StaleData("account state unavailable".to_string())))
    }

    async fn place_protective_orders(
        &self,
        handle: &AgentHandle,
        agent: &AgentState,
        order: &OpenOrder,
    ) -> (Option<String>, Option<String>) {
        let mut stop_id = None;
        let mut take_id = None;

        if let Some(trigger) = order.stop_loss {
            match self
                .submit_once(|| {
                    handle.exchange.place_stop_loss(
                        &order.instrument,
                        order.direction,
                        order.quantity,
                        trigger,
                    )
                })
                .await
            {
                Ok(receipt) => stop_id = Some(receipt.order_id),
                Err(e) => warn!("{}: stop-loss placement failed: {e}", agent.name),
            }
        }
        if let Some(trigger) = order.take_profit {
            match self
                .submit_once(|| {
                    handle.exchange.place_take_profit(
                        &order.instrument,
                        order.direction,
                        order.quantity,
                        trigger,
                    )
                })
                .await
            {
                Ok(receipt) => take_id = Some(receipt.order_id),
                Err(e) => warn!("{}: take-profit placement failed: {e}", agent.name),
            }
        }

        (stop_id, take_id)
    }

    async fn cancel_protective_orders(
        &self,
        handle: &AgentHandle,
        agent: &AgentState,
        position: &Position,
    ) {
        for order_id in [&position.stop_loss_order_id, &position.take_profit_order_id]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self
                .submit_once(|| {
                    handle.exchange.cancel_order(&position.instrument, order_id)
                })
                .await
            {
                // Orders may already be filled or cancelled; log and move on.
                warn!(
                    "{}: cancel of protective order {} failed: {e}",
                    agent.name, order_id
                );
            }
        }
    }

    fn advance(
        &self,
        agent_id: &str,
        phase: &mut ExecutionPhase,
        to: ExecutionPhase,
        reason: &str,
    ) {
        if !phase.can_transition_to(to) {
            error!("{agent_id}: illegal phase transition {phase} -> {to} ({reason})");
        }
        let transition = PhaseTransition::new(*phase, to, reason);
        debug!(
            "{agent_id}: {} -> {} ({})",
            transition.from, transition.to, transition.reason
        );
        *phase = to;
    }

    /// Append the single audit entry for the terminal phase and persist the
    /// agent. One terminal, one entry — a cycle with no observable outcome
    /// is a defect.
    async fn finish(
        &self,
        agent: &mut AgentState,
        phase: ExecutionPhase,
        entry: TradeLogEntry,
    ) -> Result<CycleReport> {
        debug_assert!(phase.is_terminal());
        let action = entry.action;
        self.store.append_trade(&entry).await?;
        self.store.upsert_agent(agent).await?;

        Ok(CycleReport {
            agent_id: agent.id.clone(),
            phase,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::ledger::LedgerConfig;
    use crate::market::InstrumentKind;
    use crate::providers::{
        AccountState, DecisionProvider, FillReceipt, MockExchangeClient, PaperExchange,
        ScriptedProvider,
    };
    use crate::risk::RiskParams;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn executor(store: Arc<MemoryStore>) -> DecisionExecutor {
        DecisionExecutor::new(
            Arc::new(PositionLedger::new(LedgerConfig::default())),
            store,
            Arc::new(MarketDataCache::new(Duration::from_secs(60))),
            BalanceReconciler::default(),
            Arc::new(ProviderGate::new(Duration::ZERO)),
            ExecutionConfig {
                provider_timeout: Duration::from_secs(2),
                exchange_timeout: Duration::from_secs(2),
                max_read_retries: 1,
                market_depth: 5,
            },
        )
    }

    fn paper_handle(
        script: Vec<RawDecision>,
        exchange: Arc<PaperExchange>,
    ) -> Arc<AgentHandle> {
        Arc::new(AgentHandle::new(
            AgentConfig {
                id: "claude".to_string(),
                name: "Claude".to_string(),
                persona: "balanced".to_string(),
                initial_balance: dec!(500),
                max_holding_mins: 45,
                risk: None,
            },
            &RiskParams::default(),
            24,
            exchange,
            Arc::new(ScriptedProvider::new("scripted", script)),
        ))
    }

    fn long_btc(stake: Decimal) -> RawDecision {
        RawDecision {
            action: "LONG".to_string(),
            instrument: Some("BTCUSDT".to_string()),
            stake: Some(stake),
            leverage: Some(10),
            stop_loss: Some(dec!(48500)),
            take_profit: Some(dec!(52500)),
            reasoning: Some("momentum".to_string()),
            message: Some("Opening a BTC long.".to_string()),
        }
    }

    #[tokio::test]
    async fn test_open_cycle_settles_and_audits_once() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new("paper", dec!(500)));
        exchange.post_quote(MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50000),
        ));

        let executor = executor(store.clone());
        let handle = paper_handle(vec![long_btc(dec!(60))], exchange);

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Settled);
        assert_eq!(report.action, TradeAction::Open);

        let agent = handle.state.lock().await;
        assert_eq!(agent.cash_balance, dec!(440));
        assert_eq!(executor.ledger().open_count("claude").await, 1);
        assert!(agent.invariant_holds(executor.ledger().unrealized_total("claude").await));

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, TradeAction::Open);
        assert_eq!(trades[0].collateral, Some(dec!(60)));
    }

    #[tokio::test]
    async fn test_exchange_outage_is_failed_entry_and_book_untouched() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new("paper", dec!(500)));
        exchange.post_quote(MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50000),
        ));
        exchange.set_fail_orders(true);

        let executor = executor(store.clone());
        let handle = paper_handle(vec![long_btc(dec!(60))], exchange);

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Failed);
        assert_eq!(report.action, TradeAction::Failed);

        let agent = handle.state.lock().await;
        assert_eq!(agent.cash_balance, dec!(500));
        assert_eq!(executor.ledger().open_count("claude").await, 0);

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, TradeAction::Failed);
    }

    #[tokio::test]
    async fn test_malformed_decision_rejected_with_reason() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new("paper", dec!(500)));

        let executor = executor(store.clone());
        let handle = paper_handle(
            vec![RawDecision {
                action: "MOON".to_string(),
                ..Default::default()
            }],
            exchange,
        );

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Rejected);

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, TradeAction::Hold);
        assert!(trades[0].rationale.contains("decision rejected"));
    }

    #[tokio::test]
    async fn test_sizing_rejection_audited() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new("paper", dec!(500)));
        exchange.post_quote(MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50000),
        ));

        let executor = executor(store.clone());
        // $5 stake cannot clear the $110 notional floor at 10x.
        let handle = paper_handle(vec![long_btc(dec!(5))], exchange);

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Rejected);

        let trades = store.recent_trades(10).await.unwrap();
        assert!(trades[0].rationale.contains("sizing rejected"));
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_hold() {
        struct BrokenProvider;

        #[async_trait::async_trait]
        impl DecisionProvider for BrokenProvider {
            fn name(&self) -> &str {
                "broken"
            }
            async fn get_decision(
                &self,
                _agent: &AgentState,
                _ctx: &DecisionContext,
            ) -> Result<RawDecision> {
                Err(ArenaError::Provider("connection refused".to_string()))
            }
        }

        let store = Arc::new(MemoryStore::new());
        let executor = executor(store.clone());
        let handle = Arc::new(AgentHandle::new(
            AgentConfig {
                id: "claude".to_string(),
                name: "Claude".to_string(),
                persona: "balanced".to_string(),
                initial_balance: dec!(500),
                max_holding_mins: 45,
                risk: None,
            },
            &RiskParams::default(),
            24,
            Arc::new(PaperExchange::new("paper", dec!(500))),
            Arc::new(BrokenProvider),
        ));

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Settled);
        assert_eq!(report.action, TradeAction::Hold);

        let trades = store.recent_trades(10).await.unwrap();
        assert!(trades[0].rationale.contains("provider unavailable"));
    }

    #[tokio::test]
    async fn test_protective_cancel_failure_does_not_roll_back_close() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(PositionLedger::new(LedgerConfig::default()));

        let mut mock = MockExchangeClient::new();
        mock.expect_close_position()
            .returning(|_, _, _| Ok(FillReceipt { fill_price: dec!(51000) }));
        mock.expect_cancel_order()
            .returning(|_, _| Err(ArenaError::OrderSubmission("cancel refused".to_string())));
        mock.expect_get_account_state().returning(|| {
            Ok(AccountState {
                cash_balance: dec!(440),
                unrealized_pnl: dec!(12),
            })
        });
        mock.expect_get_quote().returning(|_| {
            Ok(MarketQuote::new(
                "BTCUSDT",
                InstrumentKind::Perpetual,
                dec!(51000),
            ))
        });

        let executor = DecisionExecutor::new(
            ledger.clone(),
            store.clone(),
            Arc::new(MarketDataCache::new(Duration::from_secs(60))),
            BalanceReconciler::default(),
            Arc::new(ProviderGate::new(Duration::ZERO)),
            ExecutionConfig::default(),
        );

        let handle = Arc::new(AgentHandle::new(
            AgentConfig {
                id: "claude".to_string(),
                name: "Claude".to_string(),
                persona: "balanced".to_string(),
                initial_balance: dec!(500),
                max_holding_mins: 45,
                risk: None,
            },
            &RiskParams::default(),
            24,
            Arc::new(mock),
            Arc::new(ScriptedProvider::new(
                "scripted",
                vec![RawDecision {
                    action: "CLOSE".to_string(),
                    instrument: Some("BTCUSDT".to_string()),
                    reasoning: Some("take profit".to_string()),
                    ..Default::default()
                }],
            )),
        ));

        // Seed an open position with protective order ids attached.
        {
            let mut agent = handle.state.lock().await;
            agent.cash_balance = dec!(440);
            let order = OpenOrder {
                instrument: "BTCUSDT".to_string(),
                kind: InstrumentKind::Perpetual,
                direction: crate::domain::Direction::Long,
                stake: dec!(60),
                leverage: 10,
                notional: dec!(600),
                quantity: dec!(0.012),
                stop_loss: Some(dec!(48500)),
                take_profit: Some(dec!(52500)),
                rationale: "seed".to_string(),
            };
            let position = ledger.open(&agent, &order, dec!(50000)).await.unwrap();
            ledger
                .set_protective_orders(
                    &position.position_id,
                    Some("sl-1".to_string()),
                    Some("tp-1".to_string()),
                )
                .await
                .unwrap();
        }

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Settled);
        assert_eq!(report.action, TradeAction::Close);

        let agent = handle.state.lock().await;
        assert_eq!(agent.cash_balance, dec!(512));
        assert_eq!(agent.total_trades, 1);
        assert_eq!(agent.wins, 1);
        assert_eq!(ledger.open_count("claude").await, 0);
    }

    #[tokio::test]
    async fn test_close_of_missing_position_is_idempotent_noop() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new("paper", dec!(500)));

        let executor = executor(store.clone());
        let handle = paper_handle(
            vec![RawDecision {
                action: "CLOSE".to_string(),
                instrument: Some("ETHUSDT".to_string()),
                reasoning: Some("stale reference".to_string()),
                ..Default::default()
            }],
            exchange,
        );

        let report = executor.run_cycle(&handle).await.unwrap();
        assert_eq!(report.phase, ExecutionPhase::Settled);
        assert_eq!(report.action, TradeAction::Hold);

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert!(trades[0].rationale.contains("no open position"));
    }

    #[tokio::test]
    async fn test_sync_applies_marks_and_rejects_anomalies() {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new("paper", dec!(500)));
        exchange.post_quote(MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50000),
        ));

        let executor = executor(store.clone());
        let handle = paper_handle(vec![long_btc(dec!(60))], exchange.clone());

        executor.run_cycle(&handle).await.unwrap();

        // Scenario B: mark rises to $51,000.
        exchange.set_price("BTCUSDT", dec!(51000));
        executor.sync_balances(&handle).await.unwrap();
        {
            let agent = handle.state.lock().await;
            assert_eq!(agent.account_value, dec!(452));
            assert_eq!(agent.cash_balance, dec!(440));
        }

        // Scenario D: a garbage read is rejected and the prior value kept.
        exchange.override_account_state(Some(AccountState {
            cash_balance: dec!(5000),
            unrealized_pnl: Decimal::ZERO,
        }));
        let snapshots_before = store.recent_balance_snapshots("claude", 100).await.unwrap().len();
        executor.sync_balances(&handle).await.unwrap();
        {
            let agent = handle.state.lock().await;
            assert_eq!(agent.account_value, dec!(452));
        }
        let snapshots_after = store.recent_balance_snapshots("claude", 100).await.unwrap().len();
        assert_eq!(snapshots_before, snapshots_after);
    }
}
