use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset};
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, Duration, MissedTickBehavior};
use uuid::Uuid;

use crate::calendar::{exchange_now, MarketCalendar};
use crate::config::AppConfig;
use crate::db::SignalStore;
use crate::detector::PanicDetector;
use crate::market_data::MarketDataProvider;
use crate::models::{FinalLevel, PanicSignal};
use crate::notifier::Notifier;

/// Grace period for in-flight work after a shutdown request
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Result of one batch scan, also served on the API
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub scanned_at: DateTime<FixedOffset>,
    pub total_scanned: usize,
    pub signals_found: usize,
    pub signals: Vec<PanicSignal>,
}

/// Process-memory mute list: ticker -> ignored-until. Not persisted
/// across restarts.
#[derive(Default)]
pub struct IgnoreList {
    map: RwLock<HashMap<String, DateTime<FixedOffset>>>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore(
        &self,
        ticker: &str,
        hours: i64,
        now: DateTime<FixedOffset>,
    ) -> DateTime<FixedOffset> {
        let until = now + ChronoDuration::hours(hours.max(1));
        self.map
            .write()
            .expect("ignore list lock poisoned")
            .insert(ticker.to_string(), until);
        tracing::info!("🔇 {} ignored until {}", ticker, until);
        until
    }

    pub fn is_ignored(&self, ticker: &str, now: DateTime<FixedOffset>) -> bool {
        self.map
            .read()
            .expect("ignore list lock poisoned")
            .get(ticker)
            .map(|until| *until > now)
            .unwrap_or(false)
    }

    /// Snapshot of currently muted tickers; expired entries are pruned
    pub fn snapshot(&self, now: DateTime<FixedOffset>) -> HashSet<String> {
        let mut map = self.map.write().expect("ignore list lock poisoned");
        map.retain(|_, until| *until > now);
        map.keys().cloned().collect()
    }
}

/// The periodic scan loop: calendar gate, bounded fan-out over the
/// configured instruments, persistence, red-level notification.
pub struct ScanOrchestrator {
    config: AppConfig,
    provider: Arc<MarketDataProvider>,
    detector: Arc<PanicDetector>,
    store: Arc<SignalStore>,
    calendar: Arc<MarketCalendar>,
    notifier: Arc<dyn Notifier>,
    ignore_list: Arc<IgnoreList>,
}

impl ScanOrchestrator {
    pub fn new(
        config: AppConfig,
        provider: Arc<MarketDataProvider>,
        detector: Arc<PanicDetector>,
        store: Arc<SignalStore>,
        calendar: Arc<MarketCalendar>,
        notifier: Arc<dyn Notifier>,
        ignore_list: Arc<IgnoreList>,
    ) -> Self {
        Self {
            config,
            provider,
            detector,
            store,
            calendar,
            notifier,
            ignore_list,
        }
    }

    /// Run until the shutdown flag flips. A tick that fires while the
    /// previous fan-out is still in flight is skipped, never stacked.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "🔄 Scan loop starting: {} instruments every {}s",
            self.config.instruments.len(),
            self.config.scan_interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let (open, reason) = self.calendar.is_market_open_now();
            if !open {
                tracing::info!(
                    "Market closed ({}), cooling down {}s",
                    reason,
                    self.config.cooldown_closed_secs
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(self.config.cooldown_closed_secs)) => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            }

            let tickers = self.active_tickers();
            if tickers.is_empty() {
                tracing::debug!("All instruments ignored this tick");
                continue;
            }

            let batch = self.scan_batch_at(&tickers, false, exchange_now());
            tokio::pin!(batch);

            let report = tokio::select! {
                report = &mut batch => report,
                _ = shutdown.changed() => {
                    tracing::info!("Shutdown requested, draining in-flight scan...");
                    match tokio::time::timeout(DRAIN_DEADLINE, &mut batch).await {
                        Ok(report) => {
                            tracing::info!(
                                "Drained tick {}: {} signal(s)",
                                report.scan_id,
                                report.signals_found
                            );
                        }
                        Err(_) => {
                            tracing::warn!("Drain deadline exceeded, abandoning tick");
                        }
                    }
                    break;
                }
            };

            tracing::info!(
                "Tick {} done: {}/{} instruments, {} signal(s)",
                report.scan_id,
                report.total_scanned,
                tickers.len(),
                report.signals_found
            );
        }

        tracing::info!("👋 Scan loop stopped");
    }

    fn active_tickers(&self) -> Vec<String> {
        let now = exchange_now();
        let muted = self.ignore_list.snapshot(now);
        self.config
            .instruments
            .iter()
            .filter(|t| !muted.contains(*t))
            .cloned()
            .collect()
    }

    /// Scan a batch of tickers at the current instant
    pub async fn scan_batch(&self, tickers: &[String], live: bool) -> ScanReport {
        self.scan_batch_at(tickers, live, exchange_now()).await
    }

    /// Scan a batch at an explicit instant. One bad instrument never
    /// stalls the rest of the batch.
    pub async fn scan_batch_at(
        &self,
        tickers: &[String],
        live: bool,
        now: DateTime<FixedOffset>,
    ) -> ScanReport {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut handles = Vec::with_capacity(tickers.len());

        for ticker in tickers {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let provider = self.provider.clone();
            let detector = self.detector.clone();
            let store = self.store.clone();
            let notifier = self.notifier.clone();
            let ticker = ticker.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                scan_one(&provider, &detector, &store, notifier.as_ref(), &ticker, live, now).await
            }));
        }

        let mut scanned = 0usize;
        let mut signals = Vec::new();

        for handle in handles {
            match handle.await {
                Ok(Some(signal)) => {
                    scanned += 1;
                    signals.push(signal);
                }
                Ok(None) => scanned += 1,
                Err(e) => {
                    tracing::error!("Scan task panicked: {}", e);
                }
            }
        }

        ScanReport {
            scan_id: Uuid::new_v4(),
            scanned_at: now,
            total_scanned: scanned,
            signals_found: signals.len(),
            signals,
        }
    }
}

/// Full per-instrument pipeline: window -> detector -> store -> notify.
/// Returns the produced signal, or None for expected drops and skips.
async fn scan_one(
    provider: &MarketDataProvider,
    detector: &PanicDetector,
    store: &SignalStore,
    notifier: &dyn Notifier,
    ticker: &str,
    live: bool,
    now: DateTime<FixedOffset>,
) -> Option<PanicSignal> {
    let window = match provider.prepare_window(ticker, live).await {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("  ✗ {} skipped this tick: {}", ticker, e);
            return None;
        }
    };

    let signal = detector.analyze(&window, now)?;

    // Persistence gets one retry; visibility beats durability, so a
    // store failure never suppresses the notification.
    let mut saved = false;
    for attempt in 1..=2 {
        match store.save(&signal).await {
            Ok(_) => {
                saved = true;
                break;
            }
            Err(e) if attempt == 1 => {
                tracing::warn!("Failed to save {} signal, retrying: {}", ticker, e);
            }
            Err(e) => {
                tracing::error!("Failed to save {} signal after retry: {}", ticker, e);
            }
        }
    }

    if !saved {
        tracing::error!(
            "Unsaved {} {} signal surfaced via notification channel",
            ticker,
            signal.final_level.as_str()
        );
    }
    if signal.final_level == FinalLevel::Red || !saved {
        notifier.notify(&signal).await;
    }

    Some(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::exchange_offset;
    use crate::config::{ClusterConfig, RiskConfig};
    use crate::market_data::StaticMarketData;
    use crate::models::{Candle, CandleInterval};
    use crate::notifier::BroadcastNotifier;
    use chrono::TimeZone;

    fn open_instant() -> DateTime<FixedOffset> {
        exchange_offset()
            .with_ymd_and_hms(2026, 3, 10, 12, 30, 0)
            .unwrap()
    }

    /// Candle tape that collapses hard on heavy volume at the end:
    /// deep oversold RSI on every period plus a volume spike.
    fn crashing_candles(ticker: &str) -> Vec<Candle> {
        let start = exchange_offset()
            .with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
            .unwrap();
        let mut candles = Vec::new();
        let mut price = 400.0;
        for i in 0..80 {
            // steady grind up, then a waterfall over the last 30 bars
            if i < 50 {
                price += 0.5;
            } else {
                price -= 3.0;
            }
            let volume = if i >= 77 { 9000.0 } else { 1000.0 };
            candles.push(Candle {
                ticker: ticker.to_string(),
                open_time: start + ChronoDuration::hours(i),
                open: price + 1.0,
                high: price + 2.0,
                low: price - 2.0,
                close: price,
                volume,
                interval: CandleInterval::Hour,
                complete: true,
            });
        }
        candles
    }

    async fn orchestrator(
        adapter: Arc<StaticMarketData>,
    ) -> (ScanOrchestrator, Arc<BroadcastNotifier>) {
        let mut config = AppConfig::default();
        // The crash tape leaves price far below its SMA(20); panic
        // signals would be dropped to nothing by the trend filter, so
        // trend alignment is disabled for these scenarios.
        config.filters.trend.require_trend_alignment = false;
        config.instruments = vec!["SBER".to_string(), "GAZP".to_string()];

        let calendar = Arc::new(MarketCalendar::builtin(
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        ));
        let detector = Arc::new(PanicDetector::new(
            config.thresholds,
            &config.filters,
            ClusterConfig::default(),
            RiskConfig::default(),
            calendar.clone(),
        ));
        let provider = Arc::new(MarketDataProvider::new(adapter));
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let store = Arc::new(SignalStore::connect("sqlite::memory:").await.unwrap());

        let orchestrator = ScanOrchestrator::new(
            config,
            provider,
            detector,
            store,
            calendar,
            notifier.clone(),
            Arc::new(IgnoreList::new()),
        );
        (orchestrator, notifier)
    }

    #[test]
    fn test_ignore_list_expiry() {
        let list = IgnoreList::new();
        let now = open_instant();

        let until = list.ignore("SBER", 2, now);
        assert!(until > now);
        assert!(list.is_ignored("SBER", now));
        assert!(list.is_ignored("SBER", now + ChronoDuration::hours(1)));
        assert!(!list.is_ignored("SBER", now + ChronoDuration::hours(3)));
        assert!(!list.is_ignored("GAZP", now));
    }

    #[test]
    fn test_ignore_list_snapshot_prunes() {
        let list = IgnoreList::new();
        let now = open_instant();
        list.ignore("SBER", 1, now);
        list.ignore("GAZP", 5, now);

        let later = now + ChronoDuration::hours(2);
        let snapshot = list.snapshot(later);
        assert!(!snapshot.contains("SBER"));
        assert!(snapshot.contains("GAZP"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_batch_produces_and_persists_signal() {
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_candles("SBER", crashing_candles("SBER"));
        let (orchestrator, notifier) = orchestrator(adapter).await;
        let mut rx = notifier.subscribe();

        let report = orchestrator
            .scan_batch_at(&["SBER".to_string()], false, open_instant())
            .await;

        assert_eq!(report.total_scanned, 1);
        assert_eq!(report.signals_found, 1);
        let signal = &report.signals[0];
        assert_eq!(signal.ticker, "SBER");
        assert!(signal.rsi_14 < 35.0);

        // Persisted
        let history = orchestrator.store.history("SBER", 1, 10).await.unwrap();
        assert_eq!(history.len(), 1);

        // Red signals reach the notification channel
        if signal.final_level == FinalLevel::Red {
            let delivered = rx.recv().await.unwrap();
            assert_eq!(delivered.ticker, "SBER");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_instrument_does_not_stall_batch() {
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_candles("SBER", crashing_candles("SBER"));
        // GAZP has no data at all
        let (orchestrator, _notifier) = orchestrator(adapter).await;

        let report = orchestrator
            .scan_batch_at(
                &["GAZP".to_string(), "SBER".to_string()],
                false,
                open_instant(),
            )
            .await;

        assert_eq!(report.total_scanned, 2);
        assert_eq!(report.signals_found, 1);
        assert_eq!(report.signals[0].ticker, "SBER");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_market_yields_no_signals() {
        let adapter = Arc::new(StaticMarketData::new());
        adapter.set_candles("SBER", crashing_candles("SBER"));
        let (orchestrator, _notifier) = orchestrator(adapter).await;

        let evening = exchange_offset()
            .with_ymd_and_hms(2026, 3, 10, 19, 30, 0)
            .unwrap();
        let report = orchestrator
            .scan_batch_at(&["SBER".to_string()], false, evening)
            .await;
        assert_eq!(report.signals_found, 0);
    }
}
