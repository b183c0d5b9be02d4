//! Paper exchange
//!
//! In-memory venue simulator used for dry runs and tests. Fills market
//! orders at the posted price, tracks cash and open exposure so
//! `get_account_state` reports a plausible account value, and offers test
//! hooks to post prices, override the reported account state (for anomaly
//! drills) and simulate an outage.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

use super::traits::{
    AccountState, ExchangeClient, FillReceipt, OrderReceipt, OrderTicket, ProtectiveReceipt,
};
use crate::domain::Direction;
use crate::error::{ArenaError, Result};
use crate::market::MarketQuote;

#[derive(Debug, Clone)]
struct PaperHolding {
    direction: Direction,
    quantity: Decimal,
    entry_price: Decimal,
    collateral: Decimal,
    notional: Decimal,
}

pub struct PaperExchange {
    venue: String,
    quotes: DashMap<String, MarketQuote>,
    cash: RwLock<Decimal>,
    holdings: RwLock<HashMap<String, PaperHolding>>,
    order_seq: AtomicU64,
    fail_orders: AtomicBool,
    account_override: RwLock<Option<AccountState>>,
}

impl PaperExchange {
    pub fn new(venue: impl Into<String>, starting_cash: Decimal) -> Self {
        Self {
            venue: venue.into(),
            quotes: DashMap::new(),
            cash: RwLock::new(starting_cash),
            holdings: RwLock::new(HashMap::new()),
            order_seq: AtomicU64::new(0),
            fail_orders: AtomicBool::new(false),
            account_override: RwLock::new(None),
        }
    }

    /// Post or update a quote on the simulated venue.
    pub fn post_quote(&self, quote: MarketQuote) {
        self.quotes.insert(quote.instrument.clone(), quote);
    }

    pub fn set_price(&self, instrument: &str, price: Decimal) {
        if let Some(mut quote) = self.quotes.get_mut(instrument) {
            quote.price = price;
            quote.refreshed_at = chrono::Utc::now();
        }
    }

    /// Simulate a venue outage: all order-path calls fail.
    pub fn set_fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Force the next `get_account_state` reads to return this value
    /// (anomaly drills).
    pub fn override_account_state(&self, state: Option<AccountState>) {
        *self.account_override.write().expect("override lock") = state;
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_up(&self) -> Result<()> {
        if self.fail_orders.load(Ordering::SeqCst) {
            Err(ArenaError::OrderSubmission(
                "paper venue unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn posted_price(&self, instrument: &str) -> Result<MarketQuote> {
        self.quotes
            .get(instrument)
            .map(|q| q.clone())
            .filter(|q| q.price > Decimal::ZERO)
            .ok_or_else(|| ArenaError::QuoteUnavailable {
                instrument: instrument.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ExchangeClient for PaperExchange {
    fn venue(&self) -> &str {
        &self.venue
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn get_quote(&self, instrument: &str) -> Result<MarketQuote> {
        self.posted_price(instrument)
    }

    async fn list_instruments(&self) -> Result<Vec<MarketQuote>> {
        Ok(self.quotes.iter().map(|e| e.clone()).collect())
    }

    async fn place_order(&self, ticket: &OrderTicket) -> Result<OrderReceipt> {
        self.check_up()?;
        let quote = self.posted_price(&ticket.instrument)?;

        let notional = ticket.quantity * quote.price;
        let collateral = notional / Decimal::from(ticket.leverage.max(1));

        {
            let mut cash = self.cash.write().expect("cash lock");
            *cash -= collateral;
        }
        self.holdings.write().expect("holdings lock").insert(
            ticket.instrument.clone(),
            PaperHolding {
                direction: ticket.direction,
                quantity: ticket.quantity,
                entry_price: quote.price,
                collateral,
                notional,
            },
        );

        let order_id = self.next_order_id();
        debug!(
            "Paper fill {}: {} {} {} @ {}",
            order_id, ticket.direction, ticket.quantity, ticket.instrument, quote.price
        );
        Ok(OrderReceipt {
            order_id,
            fill_price: quote.price,
        })
    }

    async fn close_position(
        &self,
        instrument: &str,
        _direction: Direction,
        _quantity: Decimal,
    ) -> Result<FillReceipt> {
        self.check_up()?;
        let quote = self.posted_price(instrument)?;

        if let Some(holding) = self.holdings.write().expect("holdings lock").remove(instrument) {
            let diff = holding
                .direction
                .signed_diff(holding.entry_price, quote.price);
            let pnl = diff / holding.entry_price * holding.notional;
            let mut cash = self.cash.write().expect("cash lock");
            *cash += holding.collateral + pnl;
        }

        Ok(FillReceipt {
            fill_price: quote.price,
        })
    }

    async fn place_stop_loss(
        &self,
        _instrument: &str,
        _direction: Direction,
        _quantity: Decimal,
        _trigger_price: Decimal,
    ) -> Result<ProtectiveReceipt> {
        self.check_up()?;
        Ok(ProtectiveReceipt {
            order_id: self.next_order_id(),
        })
    }

    async fn place_take_profit(
        &self,
        _instrument: &str,
        _direction: Direction,
        _quantity: Decimal,
        _trigger_price: Decimal,
    ) -> Result<ProtectiveReceipt> {
        self.check_up()?;
        Ok(ProtectiveReceipt {
            order_id: self.next_order_id(),
        })
    }

    async fn cancel_order(&self, _instrument: &str, _order_id: &str) -> Result<bool> {
        self.check_up()?;
        Ok(true)
    }

    async fn get_account_state(&self) -> Result<AccountState> {
        if let Some(state) = self.account_override.read().expect("override lock").clone() {
            return Ok(state);
        }

        let cash = *self.cash.read().expect("cash lock");
        let unrealized: Decimal = self
            .holdings
            .read()
            .expect("holdings lock")
            .iter()
            .filter_map(|(instrument, holding)| {
                let quote = self.quotes.get(instrument)?;
                let diff = holding.direction.signed_diff(holding.entry_price, quote.price);
                Some(diff / holding.entry_price * holding.notional)
            })
            .sum();

        Ok(AccountState {
            cash_balance: cash,
            unrealized_pnl: unrealized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InstrumentKind;
    use rust_decimal_macros::dec;

    fn exchange() -> PaperExchange {
        let ex = PaperExchange::new("paper", dec!(500));
        ex.post_quote(MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50000),
        ));
        ex
    }

    #[tokio::test]
    async fn test_fill_debits_collateral_and_tracks_pnl() {
        let ex = exchange();
        let receipt = ex
            .place_order(&OrderTicket {
                instrument: "BTCUSDT".to_string(),
                direction: Direction::Long,
                quantity: dec!(0.012),
                leverage: 10,
            })
            .await
            .unwrap();
        assert_eq!(receipt.fill_price, dec!(50000));

        let state = ex.get_account_state().await.unwrap();
        assert_eq!(state.cash_balance, dec!(440));
        assert_eq!(state.unrealized_pnl, Decimal::ZERO);

        ex.set_price("BTCUSDT", dec!(51000));
        let state = ex.get_account_state().await.unwrap();
        assert_eq!(state.unrealized_pnl, dec!(12));
        assert_eq!(state.account_value(), dec!(452));

        ex.close_position("BTCUSDT", Direction::Long, dec!(0.012))
            .await
            .unwrap();
        let state = ex.get_account_state().await.unwrap();
        assert_eq!(state.cash_balance, dec!(512));
    }

    #[tokio::test]
    async fn test_outage_fails_order_path() {
        let ex = exchange();
        ex.set_fail_orders(true);

        let err = ex
            .place_order(&OrderTicket {
                instrument: "BTCUSDT".to_string(),
                direction: Direction::Long,
                quantity: dec!(0.012),
                leverage: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArenaError::OrderSubmission(_)));
    }

    #[tokio::test]
    async fn test_unknown_instrument_quote_unavailable() {
        let ex = exchange();
        let err = ex.get_quote("DOGEUSDT").await.unwrap_err();
        assert!(matches!(err, ArenaError::QuoteUnavailable { .. }));
    }
}
