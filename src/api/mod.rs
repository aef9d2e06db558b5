// Service API boundary: request/response surface over the detector,
// the store, and the market-data provider.

pub mod rest;
pub mod ws;

use std::sync::Arc;

use tokio::sync::watch;

use crate::calendar::MarketCalendar;
use crate::config::AppConfig;
use crate::db::SignalStore;
use crate::market_data::MarketDataProvider;
use crate::notifier::BroadcastNotifier;
use crate::scanner::{IgnoreList, ScanOrchestrator};
use crate::Result;

/// Shared state behind every handler
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SignalStore>,
    pub provider: Arc<MarketDataProvider>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub calendar: Arc<MarketCalendar>,
    pub ignore_list: Arc<IgnoreList>,
    pub broadcast: Arc<BroadcastNotifier>,
}

/// Serve the REST + ws API until the shutdown flag flips
pub async fn serve(
    state: Arc<AppState>,
    listen_addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let router = rest::router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tracing::info!("🌐 API listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
