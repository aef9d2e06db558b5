// Market-data adapter boundary.
//
// The exchange adapter is pure I/O behind the `MarketData` trait; all
// business logic stays on this side of the seam.

pub mod provider;
pub mod rest;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Candle, CandleInterval, InstrumentMeta, OrderBookSnapshot};

pub use provider::MarketDataProvider;
pub use rest::ExchangeRestClient;

/// Stable error kinds the adapter surfaces to the core
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("instrument not found: {0}")]
    NotFound(String),
    #[error("rate limited by the exchange")]
    RateLimited,
    #[error("transient adapter error: {0}")]
    Transient(String),
    #[error("permission denied: {0}")]
    Permission(String),
}

pub type MarketDataResult<T> = std::result::Result<T, MarketDataError>;

/// Exchange market-data contract consumed by the core
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn last_price(&self, ticker: &str) -> MarketDataResult<f64>;

    /// OHLCV candles, newest last
    async fn candles(
        &self,
        ticker: &str,
        interval: CandleInterval,
        count: usize,
    ) -> MarketDataResult<Vec<Candle>>;

    async fn order_book(&self, ticker: &str, depth: usize) -> MarketDataResult<OrderBookSnapshot>;

    async fn instrument_meta(&self, ticker: &str) -> MarketDataResult<InstrumentMeta>;
}

/// In-memory adapter serving pre-loaded data.
///
/// Used by tests and historical replay; unknown tickers behave exactly
/// like the live adapter's not-found path.
#[derive(Default)]
pub struct StaticMarketData {
    prices: Mutex<HashMap<String, f64>>,
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    books: Mutex<HashMap<String, OrderBookSnapshot>>,
    meta: Mutex<HashMap<String, InstrumentMeta>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, ticker: &str, price: f64) {
        self.prices
            .lock()
            .expect("static adapter lock poisoned")
            .insert(ticker.to_string(), price);
    }

    pub fn set_candles(&self, ticker: &str, candles: Vec<Candle>) {
        self.candles
            .lock()
            .expect("static adapter lock poisoned")
            .insert(ticker.to_string(), candles);
    }

    pub fn set_order_book(&self, ticker: &str, book: OrderBookSnapshot) {
        self.books
            .lock()
            .expect("static adapter lock poisoned")
            .insert(ticker.to_string(), book);
    }

    pub fn set_meta(&self, ticker: &str, meta: InstrumentMeta) {
        self.meta
            .lock()
            .expect("static adapter lock poisoned")
            .insert(ticker.to_string(), meta);
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn last_price(&self, ticker: &str) -> MarketDataResult<f64> {
        self.prices
            .lock()
            .expect("static adapter lock poisoned")
            .get(ticker)
            .copied()
            .ok_or_else(|| MarketDataError::NotFound(ticker.to_string()))
    }

    async fn candles(
        &self,
        ticker: &str,
        _interval: CandleInterval,
        count: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let map = self.candles.lock().expect("static adapter lock poisoned");
        let all = map
            .get(ticker)
            .ok_or_else(|| MarketDataError::NotFound(ticker.to_string()))?;
        let start = all.len().saturating_sub(count);
        Ok(all[start..].to_vec())
    }

    async fn order_book(&self, ticker: &str, _depth: usize) -> MarketDataResult<OrderBookSnapshot> {
        self.books
            .lock()
            .expect("static adapter lock poisoned")
            .get(ticker)
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound(ticker.to_string()))
    }

    async fn instrument_meta(&self, ticker: &str) -> MarketDataResult<InstrumentMeta> {
        self.meta
            .lock()
            .expect("static adapter lock poisoned")
            .get(ticker)
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound(ticker.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_adapter_not_found() {
        let adapter = StaticMarketData::new();
        let err = adapter.last_price("SBER").await.unwrap_err();
        assert!(matches!(err, MarketDataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_static_adapter_candle_tail() {
        let adapter = StaticMarketData::new();
        let now = crate::calendar::exchange_now();
        let candles: Vec<Candle> = (0..10)
            .map(|i| Candle {
                ticker: "SBER".to_string(),
                open_time: now + chrono::Duration::hours(i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1000.0,
                interval: CandleInterval::Hour,
                complete: true,
            })
            .collect();
        adapter.set_candles("SBER", candles);

        let tail = adapter
            .candles("SBER", CandleInterval::Hour, 3)
            .await
            .unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[2].close, 109.0);
    }
}
