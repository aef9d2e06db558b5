use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use panicbot::api::{self, AppState};
use panicbot::calendar::MarketCalendar;
use panicbot::config::AppConfig;
use panicbot::db::SignalStore;
use panicbot::detector::PanicDetector;
use panicbot::market_data::{ExchangeRestClient, MarketDataProvider};
use panicbot::notifier::{format_signal, BroadcastNotifier, LogNotifier, Notifier};
use panicbot::scanner::{IgnoreList, ScanOrchestrator};
use panicbot::Result;

/// PanicBot - panic/greed anomaly scanner for exchange instruments
#[derive(Parser, Debug)]
#[command(name = "panicbot")]
#[command(about = "Scans exchange instruments for panic/greed anomalies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// One-shot scan of the given tickers, printed and persisted
    Scan {
        /// Comma-separated tickers (defaults to the configured list)
        #[arg(short, long)]
        tickers: Option<String>,

        /// Bypass the data cache and fetch live windows
        #[arg(long)]
        real_time: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Some(Commands::Scan { tickers, real_time }) => run_scan(config, tickers, real_time).await,
        None => run_service(config).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panicbot=info".into()),
        )
        .init();
}

struct Core {
    config: AppConfig,
    store: Arc<SignalStore>,
    provider: Arc<MarketDataProvider>,
    detector: Arc<PanicDetector>,
    calendar: Arc<MarketCalendar>,
    ignore_list: Arc<IgnoreList>,
    broadcast: Arc<BroadcastNotifier>,
}

/// Construct the shared dependency graph once, pass it down explicitly
async fn build_core(config: AppConfig) -> Result<Core> {
    let calendar = Arc::new(MarketCalendar::load(
        &config.holiday_cache_path,
        chrono::Utc::now(),
    ));

    let adapter = Arc::new(ExchangeRestClient::new(
        config.exchange.base_url.clone(),
        config.exchange.token.clone(),
        Duration::from_secs(config.adapter_timeout_secs),
        Duration::from_millis(config.request_delay_ms),
    )?);
    let provider = Arc::new(MarketDataProvider::new(adapter));

    let database_url = format!("sqlite://{}?mode=rwc", config.database_path);
    let store = Arc::new(SignalStore::connect(&database_url).await?);

    let detector = Arc::new(PanicDetector::new(
        config.thresholds,
        &config.filters,
        config.clusters,
        config.risk,
        calendar.clone(),
    ));

    Ok(Core {
        config,
        store,
        provider,
        detector,
        calendar,
        ignore_list: Arc::new(IgnoreList::new()),
        broadcast: Arc::new(BroadcastNotifier::new(64)),
    })
}

async fn run_service(config: AppConfig) -> Result<()> {
    tracing::info!("🚀 PanicBot starting");
    let core = build_core(config).await?;

    tracing::info!("📊 Configuration:");
    tracing::info!("  Instruments: {}", core.config.instruments.join(", "));
    tracing::info!("  Scan interval: {}s", core.config.scan_interval_secs);
    tracing::info!("  API: {}", core.config.listen_addr);

    let orchestrator = Arc::new(ScanOrchestrator::new(
        core.config.clone(),
        core.provider.clone(),
        core.detector.clone(),
        core.store.clone(),
        core.calendar.clone(),
        core.broadcast.clone(),
        core.ignore_list.clone(),
    ));

    let state = Arc::new(AppState {
        config: core.config.clone(),
        store: core.store.clone(),
        provider: core.provider.clone(),
        orchestrator: orchestrator.clone(),
        calendar: core.calendar.clone(),
        ignore_list: core.ignore_list.clone(),
        broadcast: core.broadcast.clone(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scan_task = {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            orchestrator.run(shutdown).await;
        })
    };

    let api_task = {
        let listen_addr = core.config.listen_addr.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, &listen_addr, shutdown).await {
                tracing::error!("API server failed: {}", e);
            }
        })
    };

    tracing::info!("✅ Scanner and API running. Press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = scan_task => {
            tracing::error!("Scan loop exited: {:?}", result);
            let _ = shutdown_tx.send(true);
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(12), api_task).await;

    tracing::info!("👋 PanicBot stopped");
    Ok(())
}

async fn run_scan(config: AppConfig, tickers: Option<String>, real_time: bool) -> Result<()> {
    let tickers: Vec<String> = match tickers {
        Some(raw) => raw
            .split(',')
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect(),
        None => config.instruments.clone(),
    };

    if tickers.is_empty() {
        return Err("no tickers to scan".into());
    }

    tracing::info!("🔍 One-shot scan: {}", tickers.join(", "));
    let core = build_core(config).await?;

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let orchestrator = ScanOrchestrator::new(
        core.config.clone(),
        core.provider.clone(),
        core.detector.clone(),
        core.store.clone(),
        core.calendar.clone(),
        notifier,
        core.ignore_list.clone(),
    );

    let report = orchestrator.scan_batch(&tickers, real_time).await;

    println!(
        "Scanned {} instrument(s), {} signal(s) found",
        report.total_scanned, report.signals_found
    );
    for signal in &report.signals {
        println!("\n{}", format_signal(signal));
    }

    Ok(())
}
