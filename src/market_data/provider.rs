use std::sync::Arc;
use std::time::Duration;

use crate::cache::DataCache;
use crate::indicators::{
    calculate_atr, calculate_rsi, calculate_sma, calculate_volume_ratio, last_defined,
    mean_defined,
};
use crate::models::{Candle, CandleInterval, IndicatorWindow};
use crate::Result;

use super::MarketData;

/// Candle window used for indicator preparation
const WINDOW_CANDLES: usize = 100;
const WINDOW_INTERVAL: CandleInterval = CandleInterval::Hour;

/// Minimum bars for the longest RSI period (21) plus one delta
const MIN_WINDOW: usize = 22;

const CANDLE_TTL: Duration = Duration::from_secs(300);
const PRICE_TTL: Duration = Duration::from_secs(30);
const AVG_VOLUME_TTL: Duration = Duration::from_secs(3600);
const CACHE_ENTRIES: usize = 256;

/// Cache-through access to the exchange adapter plus indicator-window
/// preparation for the detector.
pub struct MarketDataProvider {
    adapter: Arc<dyn MarketData>,
    candles: DataCache<Vec<Candle>>,
    prices: DataCache<f64>,
    avg_volumes: DataCache<f64>,
}

impl MarketDataProvider {
    pub fn new(adapter: Arc<dyn MarketData>) -> Self {
        Self {
            adapter,
            candles: DataCache::new(CANDLE_TTL, CACHE_ENTRIES),
            prices: DataCache::new(PRICE_TTL, CACHE_ENTRIES),
            avg_volumes: DataCache::new(AVG_VOLUME_TTL, CACHE_ENTRIES),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn MarketData> {
        &self.adapter
    }

    /// Candle window, newest last. `live` bypasses the cache.
    pub async fn candle_window(
        &self,
        ticker: &str,
        interval: CandleInterval,
        count: usize,
        live: bool,
    ) -> Result<Vec<Candle>> {
        let key = format!("{}:{}:{}", ticker, interval.as_str(), count);

        if !live {
            if let Some(cached) = self.candles.get(&key) {
                return Ok(cached);
            }
        }

        let fetched = self.adapter.candles(ticker, interval, count).await?;
        self.candles.insert(key, fetched.clone());
        Ok(fetched)
    }

    /// Last traded price. `live` bypasses the cache.
    pub async fn last_price(&self, ticker: &str, live: bool) -> Result<f64> {
        let key = format!("{ticker}:last_price");

        if !live {
            if let Some(cached) = self.prices.get(&key) {
                return Ok(cached);
            }
        }

        let price = self.adapter.last_price(ticker).await?;
        self.prices.insert(key, price);
        Ok(price)
    }

    /// Mean daily volume over the last 20 sessions, cached for an hour.
    /// Backs the volume filter when the intraday history carries no
    /// usable volume.
    pub async fn average_volume(&self, ticker: &str) -> Result<f64> {
        let key = format!("{ticker}:avg_volume");

        if let Some(cached) = self.avg_volumes.get(&key) {
            return Ok(cached);
        }

        let daily = self
            .adapter
            .candles(ticker, CandleInterval::Day, 20)
            .await?;
        if daily.is_empty() {
            return Err(format!("no daily candles for {ticker}").into());
        }

        let avg = daily.iter().map(|c| c.volume).sum::<f64>() / daily.len() as f64;
        self.avg_volumes.insert(key, avg);
        Ok(avg)
    }

    /// Assemble the per-ticker detector input from the candle window.
    ///
    /// The window is owned by the scan step and dropped when it ends.
    pub async fn prepare_window(&self, ticker: &str, live: bool) -> Result<IndicatorWindow> {
        let candles = self
            .candle_window(ticker, WINDOW_INTERVAL, WINDOW_CANDLES, live)
            .await?;

        if candles.len() < MIN_WINDOW {
            return Err(format!(
                "insufficient history for {}: {} candles, need {}",
                ticker,
                candles.len(),
                MIN_WINDOW
            )
            .into());
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        validate_series(ticker, &closes)?;
        validate_series(ticker, &highs)?;
        validate_series(ticker, &lows)?;
        if volumes.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(format!("invalid volume data for {ticker}").into());
        }

        let mut window = IndicatorWindow::new(ticker);

        window.rsi_7 = last_defined(&calculate_rsi(&closes, 7));
        window.rsi_14 = last_defined(&calculate_rsi(&closes, 14));
        window.rsi_21 = last_defined(&calculate_rsi(&closes, 21));

        let atr_series = calculate_atr(&highs, &lows, &closes, 14);
        window.atr = last_defined(&atr_series);
        window.avg_atr = mean_defined(&atr_series);

        window.sma_20 = last_defined(&calculate_sma(&closes, 20));

        let current_volume = *volumes.last().expect("window length checked above");
        let history = &volumes[..volumes.len() - 1];
        window.current_volume = Some(current_volume);

        let has_history_volume = history.iter().any(|v| *v > 0.0);
        if has_history_volume {
            window.avg_volume =
                Some(history.iter().sum::<f64>() / history.len() as f64);
            window.volume_ratio = Some(calculate_volume_ratio(current_volume, history));
        } else {
            // Backfilled windows sometimes carry zero volumes; fall back
            // to the daily average from the adapter.
            match self.average_volume(ticker).await {
                Ok(avg) if avg > 0.0 => {
                    window.avg_volume = Some(avg);
                    window.volume_ratio = Some(current_volume / avg);
                }
                Ok(_) | Err(_) => {
                    tracing::warn!("No usable volume history for {}", ticker);
                }
            }
        }

        window.last_price = match self.last_price(ticker, live).await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::debug!(
                    "Last price unavailable for {} ({}), using last close",
                    ticker,
                    e
                );
                closes.last().copied()
            }
        };

        if let Ok(book) = self.adapter.order_book(ticker, 1).await {
            window.spread_percent = book.spread_percent;
        }

        window.closes = closes;
        window.highs = highs;
        window.lows = lows;
        window.volumes = volumes;

        Ok(window)
    }
}

fn validate_series(ticker: &str, values: &[f64]) -> Result<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(format!("non-finite price data for {ticker}").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::exchange_offset;
    use crate::market_data::StaticMarketData;
    use chrono::TimeZone;

    fn test_candles(ticker: &str, n: usize, volume: f64) -> Vec<Candle> {
        let start = exchange_offset()
            .with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + (i % 5) as f64;
                Candle {
                    ticker: ticker.to_string(),
                    open_time: start + chrono::Duration::hours(i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume,
                    interval: CandleInterval::Hour,
                    complete: true,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_prepare_window_computes_indicators() {
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_candles("SBER", test_candles("SBER", 60, 1000.0));
        adapter.set_price("SBER", 305.5);

        let provider = MarketDataProvider::new(adapter);
        let window = provider.prepare_window("SBER", false).await.unwrap();

        assert_eq!(window.ticker, "SBER");
        assert!(window.rsi_7.is_some());
        assert!(window.rsi_14.is_some());
        assert!(window.rsi_21.is_some());
        assert!(window.atr.is_some());
        assert!(window.avg_atr.is_some());
        assert!(window.sma_20.is_some());
        assert_eq!(window.last_price, Some(305.5));
        assert!((window.volume_ratio.unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_prepare_window_rejects_short_history() {
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_candles("SBER", test_candles("SBER", 10, 1000.0));

        let provider = MarketDataProvider::new(adapter);
        let err = provider.prepare_window("SBER", false).await.unwrap_err();
        assert!(err.to_string().contains("insufficient history"));
    }

    #[tokio::test]
    async fn test_prepare_window_falls_back_to_daily_volume() {
        let adapter = Arc::new(StaticMarketData::new());
        // Intraday volumes are all zero, daily candles carry volume
        let mut candles = test_candles("SBER", 60, 0.0);
        candles.last_mut().unwrap().volume = 500.0;
        adapter.set_candles("SBER", candles);

        let provider = MarketDataProvider::new(adapter.clone());
        // The daily fallback reads the same static candle store, which
        // here serves 500-volume bars for the Day interval too.
        let window = provider.prepare_window("SBER", false).await.unwrap();
        assert!(window.volume_ratio.is_some());
    }

    #[tokio::test]
    async fn test_candle_window_cache_hit() {
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_candles("SBER", test_candles("SBER", 30, 1000.0));

        let provider = MarketDataProvider::new(adapter.clone());
        let first = provider
            .candle_window("SBER", CandleInterval::Hour, 30, false)
            .await
            .unwrap();

        // Mutating the adapter does not affect the cached window
        adapter.set_candles("SBER", test_candles("SBER", 5, 1.0));
        let second = provider
            .candle_window("SBER", CandleInterval::Hour, 30, false)
            .await
            .unwrap();
        assert_eq!(first.len(), second.len());

        // A live read bypasses the cache
        let live = provider
            .candle_window("SBER", CandleInterval::Hour, 30, true)
            .await
            .unwrap();
        assert_eq!(live.len(), 5);
    }
}
