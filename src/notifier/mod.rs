use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::db::SignalStats;
use crate::models::{ClusterRole, FinalLevel, PanicSignal, SignalType};

/// Delivery seam for produced signals. The scanner forwards red-level
/// signals only; delivery is best-effort (at-most-once).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, signal: &PanicSignal);
}

/// Default sink: structured log lines
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, signal: &PanicSignal) {
        tracing::info!("📣 Notification:\n{}", format_signal(signal));
    }
}

/// Fans signals out to in-process subscribers (the ws stream, the chat
/// bot front-end). Lagging subscribers lose messages, they are never
/// retried.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<PanicSignal>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanicSignal> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, signal: &PanicSignal) {
        // Error just means nobody is listening right now
        let _ = self.sender.send(signal.clone());
    }
}

/// Chat-ready rendering of one signal
pub fn format_signal(signal: &PanicSignal) -> String {
    let kind = match signal.signal_type {
        SignalType::Panic => "PANIC",
        SignalType::Greed => "GREED",
    };

    let mut out = format!(
        "{} {} on {}\n",
        signal.final_level.emoji(),
        kind,
        signal.ticker
    );

    if let Some(price) = signal.price {
        out.push_str(&format!("Price: {:.2}\n", price));
    }
    out.push_str(&format!("RSI(14): {:.1}", signal.rsi_14));
    if let (Some(rsi_7), Some(rsi_21)) = (signal.rsi_7, signal.rsi_21) {
        out.push_str(&format!(" (7: {:.1}, 21: {:.1})", rsi_7, rsi_21));
    }
    out.push('\n');
    out.push_str(&format!("Volume: {:.2}x average\n", signal.volume_ratio));
    out.push_str(&format!(
        "Risk: {:.1}/100 ({})\n",
        signal.risk_score, signal.risk_level_text
    ));

    if !signal.volume_clusters.is_empty() {
        out.push_str("Levels: ");
        let levels: Vec<String> = signal
            .volume_clusters
            .iter()
            .map(|c| {
                let role = match c.role {
                    ClusterRole::Support => "S",
                    ClusterRole::Resistance => "R",
                    ClusterRole::Neutral => "N",
                };
                format!("{:.2}({})", c.price_level, role)
            })
            .collect();
        out.push_str(&levels.join(", "));
        out.push('\n');
    }

    out.push_str(&signal.interpretation);
    out.push('\n');
    out.push_str(&signal.recommendation);
    out
}

/// Chat-ready rendering of a stats window
pub fn format_stats(stats: &SignalStats, days: i64) -> String {
    let mut out = format!("📊 Signals over the last {} days\n", days);
    out.push_str(&format!("Total: {}\n", stats.total_signals));
    out.push_str(&format!(
        "🔴 {}  🟡 {}  ⚪ {}\n",
        stats.strong_signals, stats.moderate_signals, stats.urgent_signals
    ));

    if let Some(ticker) = &stats.most_active_ticker {
        out.push_str(&format!(
            "Most active: {} ({} signals)\n",
            ticker, stats.most_active_count
        ));
    }
    if let Some(ticker) = &stats.most_calm_ticker {
        out.push_str(&format!(
            "Most calm: {} ({} signals)\n",
            ticker, stats.most_calm_count
        ));
    }

    out.push_str(&format!("Market tension: {}", stats.market_tension));
    out
}

/// Chat-ready rendering of a top-signals list
pub fn format_top_signals(signals: &[PanicSignal], period_label: &str) -> String {
    if signals.is_empty() {
        return format!("No signals for {}", period_label);
    }

    let mut out = format!("🏆 Top signals ({})\n", period_label);
    for (i, signal) in signals.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} {} {} | volume {:.2}x | risk {:.1}\n",
            i + 1,
            signal.final_level.emoji(),
            signal.ticker,
            signal.signal_type.wire_name(),
            signal.volume_ratio,
            signal.risk_score
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::exchange_now;
    use crate::models::{BaseLevel, FilterCheck};

    fn red_signal() -> PanicSignal {
        PanicSignal {
            ticker: "SBER".to_string(),
            detected_at: exchange_now(),
            signal_type: SignalType::Panic,
            rsi_7: Some(22.0),
            rsi_14: 24.0,
            rsi_21: Some(26.0),
            volume_ratio: 2.3,
            current_volume: None,
            avg_volume: None,
            base_level: BaseLevel::Strong,
            final_level: FinalLevel::Red,
            passed_filters: vec![FilterCheck::new("volatility", "ok")],
            failed_filters: vec![],
            price: Some(310.0),
            atr: Some(5.0),
            sma_20: Some(305.0),
            spread_percent: 0.05,
            volume_clusters: vec![],
            cluster_summary: String::new(),
            risk_score: 43.0,
            risk_interpretation: String::new(),
            interpretation: "Strong panic".to_string(),
            recommendation: "Watch supports".to_string(),
            risk_level_text: "moderate".to_string(),
        }
    }

    #[test]
    fn test_format_signal_mentions_essentials() {
        let text = format_signal(&red_signal());
        assert!(text.contains("🔴"));
        assert!(text.contains("SBER"));
        assert!(text.contains("PANIC"));
        assert!(text.contains("2.30x"));
        assert!(text.contains("43.0/100"));
    }

    #[tokio::test]
    async fn test_broadcast_notifier_delivers() {
        let notifier = BroadcastNotifier::new(16);
        let mut rx = notifier.subscribe();

        notifier.notify(&red_signal()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.ticker, "SBER");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(16);
        notifier.notify(&red_signal()).await;
    }
}
