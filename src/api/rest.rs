use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::calendar::exchange_now;
use crate::db::TopPeriod;
use crate::market_data::MarketDataError;
use crate::models::{CandleInterval, PanicSignal};

use super::AppState;

/// Build the full REST router with CORS and shared state
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/scan", post(scan))
        .route("/api/v1/overheat/:ticker", get(overheat))
        .route("/api/v1/signals/top", get(top_signals))
        .route("/api/v1/signals/recent", get(recent_signals))
        .route("/api/v1/signals/stream", get(super::ws::stream_signals))
        .route("/api/v1/signals/:ticker/history", get(signal_history))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/heatmap", get(heatmap))
        .route("/api/v1/candles/:ticker", get(candles))
        .route("/api/v1/prices", post(current_prices))
        .route("/api/v1/ignore", post(ignore_instrument))
        .route("/api/v1/instruments/:ticker", get(instrument_meta))
        .route("/api/v1/calendar/reload", post(reload_calendar))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

/// Stable, user-safe API errors; upstream error text never leaks out
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "market data temporarily unavailable".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ApiError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast_ref::<MarketDataError>() {
            Some(MarketDataError::NotFound(ticker)) => {
                ApiError::NotFound(format!("instrument not found: {ticker}"))
            }
            Some(MarketDataError::RateLimited) | Some(MarketDataError::Transient(_)) => {
                ApiError::Unavailable
            }
            Some(MarketDataError::Permission(_)) => ApiError::Unavailable,
            None => {
                tracing::error!("API internal error: {}", err);
                ApiError::Internal
            }
        }
    }
}

// =============================================================================
// Wire DTOs
// =============================================================================

/// Signal as exposed on the wire: levels and types use the service
/// enumeration names (STRONG/MODERATE/URGENT, PANIC/GREED).
#[derive(Debug, Serialize)]
pub struct SignalDto {
    pub ticker: String,
    pub detected_at: DateTime<FixedOffset>,
    pub signal_type: &'static str,
    pub level: &'static str,
    pub base_level: String,
    pub rsi_7: Option<f64>,
    pub rsi_14: f64,
    pub rsi_21: Option<f64>,
    pub volume_ratio: f64,
    pub price: Option<f64>,
    pub atr: Option<f64>,
    pub sma_20: Option<f64>,
    pub spread_percent: f64,
    pub volume_clusters: Vec<crate::models::VolumeCluster>,
    pub cluster_summary: String,
    pub passed_filters: Vec<crate::models::FilterCheck>,
    pub failed_filters: Vec<crate::models::FilterCheck>,
    pub risk_score: f64,
    pub risk_level: String,
    pub interpretation: String,
    pub recommendation: String,
}

impl From<PanicSignal> for SignalDto {
    fn from(s: PanicSignal) -> Self {
        Self {
            ticker: s.ticker,
            detected_at: s.detected_at,
            signal_type: s.signal_type.wire_name(),
            level: s.final_level.wire_name(),
            base_level: s.base_level.as_str().to_string(),
            rsi_7: s.rsi_7,
            rsi_14: s.rsi_14,
            rsi_21: s.rsi_21,
            volume_ratio: s.volume_ratio,
            price: s.price,
            atr: s.atr,
            sma_20: s.sma_20,
            spread_percent: s.spread_percent,
            volume_clusters: s.volume_clusters,
            cluster_summary: s.cluster_summary,
            passed_filters: s.passed_filters,
            failed_filters: s.failed_filters,
            risk_score: s.risk_score,
            risk_level: s.risk_level_text,
            interpretation: s.interpretation,
            recommendation: s.recommendation,
        }
    }
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    schema_version: String,
    market_open: bool,
    server_time: DateTime<FixedOffset>,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let (market_open, _) = state.calendar.is_market_open_now();
    Ok(Json(HealthResponse {
        status: "ok",
        schema_version: state.store.schema_version().await?,
        market_open,
        server_time: exchange_now(),
    }))
}

// =============================================================================
// Scan
// =============================================================================

#[derive(Deserialize)]
struct ScanRequest {
    tickers: Vec<String>,
    #[serde(default)]
    real_time: bool,
}

#[derive(Serialize)]
struct ScanResponse {
    scan_id: uuid::Uuid,
    scanned_at: DateTime<FixedOffset>,
    total_scanned: usize,
    signals_found: usize,
    signals: Vec<SignalDto>,
}

async fn scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    if request.tickers.is_empty() {
        return Err(ApiError::BadRequest("tickers list is empty".to_string()));
    }

    let report = state
        .orchestrator
        .scan_batch(&request.tickers, request.real_time)
        .await;

    Ok(Json(ScanResponse {
        scan_id: report.scan_id,
        scanned_at: report.scanned_at,
        total_scanned: report.total_scanned,
        signals_found: report.signals_found,
        signals: report.signals.into_iter().map(SignalDto::from).collect(),
    }))
}

// =============================================================================
// Overheat index
// =============================================================================

#[derive(Serialize)]
struct OverheatResponse {
    ticker: String,
    overheat_pct: f64,
    rsi_14: Option<f64>,
    volume_ratio: Option<f64>,
    last_signal_at: Option<DateTime<FixedOffset>>,
    last_signal_level: Option<&'static str>,
}

/// Display metric: |RSI(14) - 50| * 2, nudged by unusual volume
fn overheat_pct(rsi_14: f64, volume_ratio: Option<f64>) -> f64 {
    let base = (rsi_14 - 50.0).abs() * 2.0;
    let modulation = volume_ratio.unwrap_or(1.0).clamp(0.8, 1.2);
    (base * modulation).clamp(0.0, 100.0)
}

async fn overheat(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<OverheatResponse>, ApiError> {
    let window = state.provider.prepare_window(&ticker, false).await?;

    let pct = window
        .rsi_14
        .map(|rsi| overheat_pct(rsi, window.volume_ratio))
        .unwrap_or(0.0);

    let last = state.store.last_signal(&ticker).await?;

    Ok(Json(OverheatResponse {
        ticker,
        overheat_pct: pct,
        rsi_14: window.rsi_14,
        volume_ratio: window.volume_ratio,
        last_signal_at: last.as_ref().map(|s| s.detected_at),
        last_signal_level: last.as_ref().map(|s| s.final_level.wire_name()),
    }))
}

// =============================================================================
// Signal queries
// =============================================================================

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_days")]
    days: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_days() -> i64 {
    7
}

fn default_limit() -> i64 {
    50
}

async fn signal_history(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SignalDto>>, ApiError> {
    let signals = state.store.history(&ticker, query.days, query.limit).await?;
    Ok(Json(signals.into_iter().map(SignalDto::from).collect()))
}

#[derive(Deserialize)]
struct TopQuery {
    #[serde(default = "default_period")]
    period: String,
    #[serde(default = "default_top_limit")]
    limit: i64,
}

fn default_period() -> String {
    "today".to_string()
}

fn default_top_limit() -> i64 {
    3
}

async fn top_signals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<SignalDto>>, ApiError> {
    let period = TopPeriod::parse(&query.period)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown period '{}'", query.period)))?;

    let signals = state.store.top_signals(period, query.limit).await?;
    Ok(Json(signals.into_iter().map(SignalDto::from).collect()))
}

async fn recent_signals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SignalDto>>, ApiError> {
    let signals = state.store.panic_signals(query.days, query.limit).await?;
    Ok(Json(signals.into_iter().map(SignalDto::from).collect()))
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default = "default_days")]
    days: i64,
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<crate::db::SignalStats>, ApiError> {
    Ok(Json(state.store.stats(query.days).await?))
}

async fn heatmap(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<crate::db::TickerHeat>>, ApiError> {
    Ok(Json(state.store.heatmap(query.days).await?))
}

// =============================================================================
// Market-data passthrough
// =============================================================================

#[derive(Deserialize)]
struct CandlesQuery {
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_count")]
    count: usize,
}

fn default_interval() -> String {
    "hour".to_string()
}

fn default_count() -> usize {
    50
}

async fn candles(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<CandlesQuery>,
) -> Result<Json<Vec<crate::models::Candle>>, ApiError> {
    let interval = CandleInterval::parse(&query.interval)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown interval '{}'", query.interval)))?;

    let candles = state
        .provider
        .candle_window(&ticker, interval, query.count.clamp(1, 1000), false)
        .await?;
    Ok(Json(candles))
}

#[derive(Deserialize)]
struct PricesRequest {
    tickers: Vec<String>,
}

async fn current_prices(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PricesRequest>,
) -> Result<Json<HashMap<String, f64>>, ApiError> {
    let mut prices = HashMap::new();
    for ticker in &request.tickers {
        match state.provider.last_price(ticker, false).await {
            Ok(price) => {
                prices.insert(ticker.clone(), price);
            }
            Err(e) => {
                tracing::warn!("Price lookup failed for {}: {}", ticker, e);
            }
        }
    }
    Ok(Json(prices))
}

async fn instrument_meta(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<crate::models::InstrumentMeta>, ApiError> {
    let meta = state
        .provider
        .adapter()
        .instrument_meta(&ticker)
        .await
        .map_err(|e| ApiError::from(Box::new(e) as Box<dyn std::error::Error + Send + Sync>))?;
    Ok(Json(meta))
}

// =============================================================================
// Ignore list & calendar
// =============================================================================

#[derive(Deserialize)]
struct IgnoreRequest {
    ticker: String,
    #[serde(default = "default_ignore_hours")]
    duration_hours: i64,
}

fn default_ignore_hours() -> i64 {
    4
}

#[derive(Serialize)]
struct IgnoreResponse {
    ok: bool,
    ticker: String,
    ignored_until: DateTime<FixedOffset>,
}

async fn ignore_instrument(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IgnoreRequest>,
) -> Result<Json<IgnoreResponse>, ApiError> {
    if request.ticker.is_empty() {
        return Err(ApiError::BadRequest("ticker is empty".to_string()));
    }

    let until = state
        .ignore_list
        .ignore(&request.ticker, request.duration_hours, exchange_now());

    Ok(Json(IgnoreResponse {
        ok: true,
        ticker: request.ticker,
        ignored_until: until,
    }))
}

#[derive(Serialize)]
struct ReloadResponse {
    ok: bool,
    holidays: usize,
}

async fn reload_calendar(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let holidays = state.calendar.reload(chrono::Utc::now())?;
    Ok(Json(ReloadResponse { ok: true, holidays }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::MarketCalendar;
    use crate::config::{AppConfig, ClusterConfig, RiskConfig};
    use crate::db::SignalStore;
    use crate::detector::PanicDetector;
    use crate::market_data::{MarketDataProvider, StaticMarketData};
    use crate::notifier::BroadcastNotifier;
    use crate::scanner::{IgnoreList, ScanOrchestrator};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use tower::util::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let config = AppConfig::default();
        let calendar = Arc::new(MarketCalendar::builtin(
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        ));
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_price("SBER", 305.5);
        let provider = Arc::new(MarketDataProvider::new(adapter));
        let store = Arc::new(SignalStore::connect("sqlite::memory:").await.unwrap());
        let broadcast = Arc::new(BroadcastNotifier::new(16));
        let ignore_list = Arc::new(IgnoreList::new());
        let detector = Arc::new(PanicDetector::new(
            config.thresholds,
            &config.filters,
            ClusterConfig::default(),
            RiskConfig::default(),
            calendar.clone(),
        ));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            config.clone(),
            provider.clone(),
            detector,
            store.clone(),
            calendar.clone(),
            broadcast.clone(),
            ignore_list.clone(),
        ));

        Arc::new(AppState {
            config,
            store,
            provider,
            orchestrator,
            calendar,
            ignore_list,
            broadcast,
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["schema_version"], "1");
    }

    #[tokio::test]
    async fn test_stats_endpoint_empty() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats?days=7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["total_signals"], 0);
        assert_eq!(parsed["market_tension"], "calm");
    }

    #[tokio::test]
    async fn test_ignore_endpoint_mutes_ticker() {
        let state = test_state().await;
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/ignore")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"ticker": "SBER", "duration_hours": 2}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.ignore_list.is_ignored("SBER", exchange_now()));
    }

    #[tokio::test]
    async fn test_unknown_instrument_maps_to_404() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/instruments/NOPE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_period_is_rejected() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/signals/top?period=decade")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_overheat_formula() {
        // Neutral RSI -> zero
        assert_eq!(overheat_pct(50.0, Some(1.0)), 0.0);
        // Deep oversold, neutral volume
        assert!((overheat_pct(20.0, Some(1.0)) - 60.0).abs() < 1e-6);
        // Volume modulation is clamped
        assert!((overheat_pct(20.0, Some(5.0)) - 72.0).abs() < 1e-6);
        assert!((overheat_pct(20.0, None) - 60.0).abs() < 1e-6);
        // Never exceeds 100
        assert!(overheat_pct(0.0, Some(5.0)) <= 100.0);
    }
}
