use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::{Candle, CandleInterval, InstrumentMeta, OrderBookSnapshot};

use super::{MarketData, MarketDataError, MarketDataResult};

const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type AdapterRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Reference REST adapter for the exchange market-data API.
///
/// Pure I/O: typed requests in, typed candles/prices/books out. Shares
/// one rate limiter across clones so the scan fan-out honors the
/// per-endpoint request spacing.
#[derive(Clone)]
pub struct ExchangeRestClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    rate_limiter: Arc<AdapterRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: Vec<CandleDto>,
}

#[derive(Debug, Deserialize)]
struct CandleDto {
    open_time: DateTime<FixedOffset>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default = "default_complete")]
    complete: bool,
}

fn default_complete() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    best_bid: f64,
    best_ask: f64,
    bid_volume: f64,
    ask_volume: f64,
}

#[derive(Debug, Deserialize)]
struct InstrumentResponse {
    name: String,
    lot_size: u32,
    currency: String,
    #[serde(default = "default_complete")]
    tradable: bool,
}

impl ExchangeRestClient {
    /// Build a client with a per-call timeout and inter-request spacing
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        request_delay: Duration,
    ) -> MarketDataResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Transient(format!("failed to build client: {e}")))?;

        let burst = NonZeroU32::new(1).expect("static burst is non-zero");
        let quota = Quota::with_period(request_delay.max(Duration::from_millis(1)))
            .expect("non-zero request delay")
            .allow_burst(burst);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Rate-limited GET with bounded retries and exponential backoff
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        ticker: &str,
    ) -> MarketDataResult<T> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let mut request = self.client.get(&url).query(query);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error for {} ({}), retrying in {}s (attempt {}/{})",
                        ticker,
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    continue;
                }
                Err(e) => {
                    return Err(MarketDataError::Transient(format!(
                        "network error after {MAX_RETRIES} attempts: {e}"
                    )))
                }
            };

            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    MarketDataError::Transient(format!("malformed exchange response: {e}"))
                });
            }

            match status {
                StatusCode::NOT_FOUND => {
                    return Err(MarketDataError::NotFound(ticker.to_string()));
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(MarketDataError::Permission(format!(
                        "exchange rejected the request for {ticker} ({status})"
                    )));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt < MAX_RETRIES {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Rate limited (429), backing off {}s (attempt {}/{})",
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }
                    return Err(MarketDataError::RateLimited);
                }
                s if s.is_server_error() => {
                    if attempt < MAX_RETRIES {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Server error {} for {}, retrying in {}s (attempt {}/{})",
                            s,
                            ticker,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }
                    return Err(MarketDataError::Transient(format!(
                        "exchange returned {s} after {MAX_RETRIES} attempts"
                    )));
                }
                s => {
                    return Err(MarketDataError::Transient(format!(
                        "unexpected exchange status {s}"
                    )));
                }
            }
        }

        Err(MarketDataError::Transient(format!(
            "request for {ticker} failed after {MAX_RETRIES} attempts"
        )))
    }
}

#[async_trait]
impl MarketData for ExchangeRestClient {
    async fn last_price(&self, ticker: &str) -> MarketDataResult<f64> {
        let response: PriceResponse = self
            .get_json("/v1/price", &[("ticker", ticker.to_string())], ticker)
            .await?;
        Ok(response.price)
    }

    async fn candles(
        &self,
        ticker: &str,
        interval: CandleInterval,
        count: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let response: CandlesResponse = self
            .get_json(
                "/v1/candles",
                &[
                    ("ticker", ticker.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("count", count.to_string()),
                ],
                ticker,
            )
            .await?;

        let mut candles: Vec<Candle> = response
            .candles
            .into_iter()
            .map(|dto| Candle {
                ticker: ticker.to_string(),
                open_time: dto.open_time,
                open: dto.open,
                high: dto.high,
                low: dto.low,
                close: dto.close,
                volume: dto.volume,
                interval,
                complete: dto.complete,
            })
            .collect();

        // Contract: newest last
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn order_book(&self, ticker: &str, depth: usize) -> MarketDataResult<OrderBookSnapshot> {
        let response: OrderBookResponse = self
            .get_json(
                "/v1/orderbook",
                &[
                    ("ticker", ticker.to_string()),
                    ("depth", depth.to_string()),
                ],
                ticker,
            )
            .await?;

        let mid = (response.best_bid + response.best_ask) / 2.0;
        let spread_percent = if mid > 0.0 {
            (response.best_ask - response.best_bid) / mid * 100.0
        } else {
            0.0
        };

        Ok(OrderBookSnapshot {
            ticker: ticker.to_string(),
            best_bid: response.best_bid,
            best_ask: response.best_ask,
            bid_volume: response.bid_volume,
            ask_volume: response.ask_volume,
            spread_percent,
        })
    }

    async fn instrument_meta(&self, ticker: &str) -> MarketDataResult<InstrumentMeta> {
        let response: InstrumentResponse = self
            .get_json("/v1/instrument", &[("ticker", ticker.to_string())], ticker)
            .await?;

        Ok(InstrumentMeta {
            ticker: ticker.to_string(),
            name: response.name,
            lot_size: response.lot_size,
            currency: response.currency,
            tradable: response.tradable,
        })
    }
}
