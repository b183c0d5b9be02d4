//! Market data cache
//!
//! TTL-refreshed snapshot of tradable instruments. Entries are fully
//! replaceable and carry no persistent identity; a stale entry is treated
//! as absent by `fresh()` so callers fall back to a direct exchange read.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Instrument class, used to select the PnL policy and the protective-level
/// requirement at sizing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Leveraged perpetual future (e.g. BTCUSDT)
    Perpetual,
    /// Binary / prediction-style instrument, no leverage semantics
    Prediction,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Perpetual => "perpetual",
            InstrumentKind::Prediction => "prediction",
        }
    }

    /// Perpetuals must ship with stop-loss/take-profit; prediction-style
    /// instruments resolve on their own and are exempt.
    pub fn requires_protective_levels(&self) -> bool {
        matches!(self, InstrumentKind::Perpetual)
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One cached quote. Replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub instrument: String,
    pub kind: InstrumentKind,
    pub price: Decimal,
    pub change_24h_pct: Decimal,
    pub volume: Decimal,
    pub refreshed_at: DateTime<Utc>,
}

impl MarketQuote {
    pub fn new(instrument: impl Into<String>, kind: InstrumentKind, price: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            kind,
            price,
            change_24h_pct: Decimal::ZERO,
            volume: Decimal::ZERO,
            refreshed_at: Utc::now(),
        }
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.refreshed_at
    }
}

/// Concurrent TTL cache of instrument quotes.
pub struct MarketDataCache {
    quotes: DashMap<String, MarketQuote>,
    ttl: Duration,
}

impl MarketDataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            quotes: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, quote: MarketQuote) {
        self.quotes.insert(quote.instrument.clone(), quote);
    }

    /// Get a quote regardless of age.
    pub fn get(&self, instrument: &str) -> Option<MarketQuote> {
        self.quotes.get(instrument).map(|q| q.clone())
    }

    /// Get a quote only if it is within the TTL.
    pub fn fresh(&self, instrument: &str) -> Option<MarketQuote> {
        self.get(instrument).filter(|q| {
            q.age().to_std().map(|age| age <= self.ttl).unwrap_or(false)
        })
    }

    /// Replace the full cache contents with a new refresh batch.
    pub fn replace_all(&self, quotes: Vec<MarketQuote>) {
        self.quotes.clear();
        let count = quotes.len();
        for quote in quotes {
            self.insert(quote);
        }
        debug!("Market cache refreshed: {} instruments", count);
    }

    /// Top instruments by traded volume, descending.
    pub fn top_by_volume(&self, n: usize) -> Vec<MarketQuote> {
        let mut all: Vec<MarketQuote> = self.quotes.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| b.volume.cmp(&a.volume));
        all.truncate(n);
        all
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fresh_filters_stale_quotes() {
        let cache = MarketDataCache::new(Duration::from_secs(60));

        let mut quote = MarketQuote::new("BTCUSDT", InstrumentKind::Perpetual, dec!(50000));
        quote.refreshed_at = Utc::now() - chrono::Duration::seconds(120);
        cache.insert(quote);

        assert!(cache.get("BTCUSDT").is_some());
        assert!(cache.fresh("BTCUSDT").is_none());

        cache.insert(MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50100),
        ));
        assert_eq!(cache.fresh("BTCUSDT").unwrap().price, dec!(50100));
    }

    #[test]
    fn test_replace_all_drops_missing_instruments() {
        let cache = MarketDataCache::new(Duration::from_secs(60));
        cache.insert(MarketQuote::new("ETHUSDT", InstrumentKind::Perpetual, dec!(3000)));

        cache.replace_all(vec![MarketQuote::new(
            "BTCUSDT",
            InstrumentKind::Perpetual,
            dec!(50000),
        )]);

        assert!(cache.get("ETHUSDT").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_top_by_volume_orders_descending() {
        let cache = MarketDataCache::new(Duration::from_secs(60));
        cache.insert(
            MarketQuote::new("A", InstrumentKind::Perpetual, dec!(1)).with_volume(dec!(100)),
        );
        cache.insert(
            MarketQuote::new("B", InstrumentKind::Perpetual, dec!(1)).with_volume(dec!(300)),
        );
        cache.insert(
            MarketQuote::new("C", InstrumentKind::Perpetual, dec!(1)).with_volume(dec!(200)),
        );

        let top = cache.top_by_volume(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].instrument, "B");
        assert_eq!(top[1].instrument, "C");
    }

    #[test]
    fn test_protective_level_requirement_by_kind() {
        assert!(InstrumentKind::Perpetual.requires_protective_levels());
        assert!(!InstrumentKind::Prediction.requires_protective_levels());
    }
}
