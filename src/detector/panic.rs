use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::calendar::MarketCalendar;
use crate::config::{ClusterConfig, FiltersConfig, RiskConfig, Thresholds};
use crate::models::{
    BaseLevel, FilterCheck, FinalLevel, IndicatorWindow, PanicSignal, SignalType,
};

use super::clusters::VolumeClusterAnalyzer;
use super::filters::{build_filter_chain, ContextFilter};
use super::risk::RiskCalculator;

/// The panic/greed detector: turns one prepared indicator window into
/// at most one graded signal per invocation.
///
/// Steps: market time -> data completeness -> type from RSI(14) ->
/// minimum volume -> multi-period base level -> volume promotion ->
/// context-filter downgrades -> final level -> volume clusters -> risk.
/// Every drop along the way is an expected outcome, not an error.
pub struct PanicDetector {
    thresholds: Thresholds,
    filters: Vec<Box<dyn ContextFilter>>,
    clusters: VolumeClusterAnalyzer,
    risk: RiskCalculator,
    calendar: Arc<MarketCalendar>,
}

impl PanicDetector {
    pub fn new(
        thresholds: Thresholds,
        filters_config: &FiltersConfig,
        cluster_config: ClusterConfig,
        risk_config: RiskConfig,
        calendar: Arc<MarketCalendar>,
    ) -> Self {
        Self {
            thresholds,
            filters: build_filter_chain(filters_config),
            clusters: VolumeClusterAnalyzer::new(
                cluster_config.num_clusters,
                cluster_config.min_volume_share,
            ),
            risk: RiskCalculator::new(risk_config.atr_normal),
            calendar,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run the full pipeline for one ticker at the given exchange-local
    /// instant. `None` means no anomaly; the reason is logged.
    pub fn analyze(
        &self,
        window: &IndicatorWindow,
        now: DateTime<FixedOffset>,
    ) -> Option<PanicSignal> {
        // Step 1: market time
        let (open, reason) = self.calendar.is_signal_window(now);
        if !open {
            tracing::info!("{}: dropped, market closed ({})", window.ticker, reason);
            return None;
        }

        // Step 2: data completeness
        let (rsi_14, volume_ratio, price) = match self.required_inputs(window) {
            Some(inputs) => inputs,
            None => return None,
        };

        // Step 3: signal type from RSI(14)
        let gate = self.thresholds.white;
        let signal_type = if rsi_14 <= gate.rsi_buy {
            SignalType::Panic
        } else if rsi_14 >= gate.rsi_sell {
            SignalType::Greed
        } else {
            tracing::debug!(
                "{}: dropped, rsi {:.1} in normal range",
                window.ticker,
                rsi_14
            );
            return None;
        };

        // Step 4: minimum volume
        if volume_ratio < gate.volume_min {
            tracing::debug!(
                "{}: dropped, volume {:.2}x below {:.2}x",
                window.ticker,
                volume_ratio,
                gate.volume_min
            );
            return None;
        }

        // Step 5: multi-period verification
        let base_level = self.base_level(window.rsi_7, rsi_14, window.rsi_21, signal_type);
        if base_level == BaseLevel::None {
            tracing::debug!(
                "{}: dropped, multi-period verification failed",
                window.ticker
            );
            return None;
        }

        // Step 6: volume promotion
        let promoted = self.adjust_level_by_volume(base_level, volume_ratio);

        // Step 7: context-filter downgrades
        let (filtered, passed_filters, failed_filters) =
            self.apply_context_filters(window, signal_type, promoted);

        // Step 8: final level
        let final_level = FinalLevel::from_base(filtered);
        if final_level == FinalLevel::Ignore {
            tracing::info!(
                "{}: {:?} signal filtered out ({} of {} filters failed)",
                window.ticker,
                signal_type,
                failed_filters.len(),
                self.filters.len()
            );
            return None;
        }

        // Step 9: volume clusters
        let volume_clusters = self.clusters.analyze(&window.closes, &window.volumes);
        let cluster_summary = self.clusters.summary(&volume_clusters);

        // Step 10: risk metrics and human texts
        let risk = self.risk.calculate(
            rsi_14,
            volume_ratio,
            window.atr.unwrap_or(0.0),
            signal_type,
        );

        let signal = PanicSignal {
            ticker: window.ticker.clone(),
            detected_at: now,
            signal_type,
            rsi_7: window.rsi_7,
            rsi_14,
            rsi_21: window.rsi_21,
            volume_ratio,
            current_volume: window.current_volume,
            avg_volume: window.avg_volume,
            base_level,
            final_level,
            passed_filters,
            failed_filters,
            price: Some(price),
            atr: window.atr,
            sma_20: window.sma_20,
            spread_percent: window.spread_percent,
            volume_clusters,
            cluster_summary,
            risk_score: risk.risk_score,
            risk_interpretation: risk.interpretation,
            interpretation: interpretation_for(signal_type, final_level),
            recommendation: recommendation_for(signal_type, final_level),
            risk_level_text: risk.risk_level.label().to_string(),
        };

        if !signal.is_consistent() {
            tracing::warn!(
                "{}: {:?} signal with rsi_14 {:.1} on the wrong side of 50",
                signal.ticker,
                signal.signal_type,
                signal.rsi_14
            );
        }

        tracing::info!(
            "{} {} {} signal, volume {:.2}x, risk {:.1}",
            signal.final_level.emoji(),
            signal.ticker,
            signal.signal_type.wire_name(),
            signal.volume_ratio,
            signal.risk_score
        );

        Some(signal)
    }

    fn required_inputs(&self, window: &IndicatorWindow) -> Option<(f64, f64, f64)> {
        if window.ticker.is_empty() {
            tracing::warn!("dropped window with empty ticker");
            return None;
        }

        let (Some(rsi_14), Some(volume_ratio), Some(price)) =
            (window.rsi_14, window.volume_ratio, window.last_price)
        else {
            tracing::debug!("{}: dropped, insufficient data", window.ticker);
            return None;
        };

        // NaN anywhere in the required inputs is an internal fault of
        // the upstream computation; skip the ticker rather than emit
        // garbage.
        if !rsi_14.is_finite() || !volume_ratio.is_finite() || !price.is_finite() {
            tracing::error!(
                "{}: non-finite detector input (rsi {:?}, volume {:?}, price {:?})",
                window.ticker,
                window.rsi_14,
                window.volume_ratio,
                window.last_price
            );
            return None;
        }

        Some((rsi_14, volume_ratio, price))
    }

    /// Step 5: grade by how many RSI periods sit outside the zone.
    /// Missing periods count as inside.
    fn base_level(
        &self,
        rsi_7: Option<f64>,
        rsi_14: f64,
        rsi_21: Option<f64>,
        signal_type: SignalType,
    ) -> BaseLevel {
        let gate = self.thresholds.white;
        let outside = |value: f64| match signal_type {
            SignalType::Panic => value < gate.rsi_buy,
            SignalType::Greed => value > gate.rsi_sell,
        };

        let o7 = rsi_7.map(outside).unwrap_or(false);
        let o14 = outside(rsi_14);
        let o21 = rsi_21.map(outside).unwrap_or(false);

        match (o7, o14, o21) {
            (true, true, true) => BaseLevel::Strong,
            (true, true, false) | (false, true, true) => BaseLevel::Good,
            (false, true, false) => BaseLevel::Urgent,
            _ => BaseLevel::None,
        }
    }

    /// Step 6: a pronounced volume spike promotes one rung
    fn adjust_level_by_volume(&self, level: BaseLevel, volume_ratio: f64) -> BaseLevel {
        if volume_ratio >= self.thresholds.red.volume_min {
            level.promoted()
        } else {
            level
        }
    }

    /// Step 7: run the fixed chain, one rung down per failed filter
    fn apply_context_filters(
        &self,
        window: &IndicatorWindow,
        signal_type: SignalType,
        level: BaseLevel,
    ) -> (BaseLevel, Vec<FilterCheck>, Vec<FilterCheck>) {
        let mut current = level;
        let mut passed = Vec::new();
        let mut failed = Vec::new();

        for filter in &self.filters {
            let outcome = filter.check(window, signal_type);
            let check = FilterCheck::new(filter.id(), outcome.reason);
            if outcome.passed {
                passed.push(check);
            } else {
                current = current.demoted();
                failed.push(check);
            }
        }

        (current, passed, failed)
    }
}

fn interpretation_for(signal_type: SignalType, level: FinalLevel) -> String {
    let text = match (signal_type, level) {
        (SignalType::Panic, FinalLevel::Red) => {
            "Strong panic: heavy selling pressed the price deep into oversold territory"
        }
        (SignalType::Panic, FinalLevel::Yellow) => {
            "Moderate panic: elevated selling with oversold momentum"
        }
        (SignalType::Panic, FinalLevel::White) => {
            "Early panic: RSI(14) oversold, confirmation still partial"
        }
        (SignalType::Greed, FinalLevel::Red) => {
            "Strong greed: aggressive buying pushed the price deep into overbought territory"
        }
        (SignalType::Greed, FinalLevel::Yellow) => {
            "Moderate greed: elevated buying with overbought momentum"
        }
        (SignalType::Greed, FinalLevel::White) => {
            "Early greed: RSI(14) overbought, confirmation still partial"
        }
        (_, FinalLevel::Ignore) => "No actionable signal",
    };
    text.to_string()
}

fn recommendation_for(signal_type: SignalType, level: FinalLevel) -> String {
    let text = match (signal_type, level) {
        (SignalType::Panic, FinalLevel::Red) => {
            "Watch for a contrarian entry near the support clusters"
        }
        (SignalType::Panic, FinalLevel::Yellow) => {
            "Track the support clusters; wait for the selling to exhaust"
        }
        (SignalType::Panic, FinalLevel::White) => "Monitor; no action yet",
        (SignalType::Greed, FinalLevel::Red) => {
            "Consider taking profits near the resistance clusters"
        }
        (SignalType::Greed, FinalLevel::Yellow) => {
            "Track the resistance clusters; momentum may be topping"
        }
        (SignalType::Greed, FinalLevel::White) => "Monitor; no action yet",
        (_, FinalLevel::Ignore) => "None",
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ClusterConfig, RiskConfig};
    use chrono::TimeZone;

    fn detector() -> PanicDetector {
        let config = AppConfig::default();
        let calendar = Arc::new(MarketCalendar::builtin(
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        ));
        PanicDetector::new(
            config.thresholds,
            &config.filters,
            ClusterConfig::default(),
            RiskConfig::default(),
            calendar,
        )
    }

    /// Tuesday inside the active zone
    fn open_instant() -> DateTime<FixedOffset> {
        crate::calendar::exchange_offset()
            .with_ymd_and_hms(2026, 3, 10, 12, 30, 0)
            .unwrap()
    }

    fn panic_window() -> IndicatorWindow {
        let mut w = IndicatorWindow::new("SBER");
        w.rsi_7 = Some(22.0);
        w.rsi_14 = Some(24.0);
        w.rsi_21 = Some(26.0);
        w.volume_ratio = Some(2.3);
        w.current_volume = Some(450_000_000.0);
        w.avg_volume = Some(195_000_000.0);
        w.last_price = Some(310.0);
        w.atr = Some(5.0);
        w.avg_atr = Some(3.0);
        w.sma_20 = Some(305.0);
        w.spread_percent = 0.05;
        w.closes = vec![310.0; 30];
        w.volumes = vec![1000.0; 30];
        w
    }

    #[test]
    fn test_base_level_grades() {
        let d = detector();
        assert_eq!(
            d.base_level(Some(22.0), 24.0, Some(26.0), SignalType::Panic),
            BaseLevel::Strong
        );
        assert_eq!(
            d.base_level(Some(22.0), 24.0, Some(45.0), SignalType::Panic),
            BaseLevel::Good
        );
        assert_eq!(
            d.base_level(Some(40.0), 28.0, Some(32.0), SignalType::Panic),
            BaseLevel::Good
        );
        assert_eq!(
            d.base_level(Some(40.0), 28.0, Some(45.0), SignalType::Panic),
            BaseLevel::Urgent
        );
        assert_eq!(
            d.base_level(Some(40.0), 45.0, Some(50.0), SignalType::Panic),
            BaseLevel::None
        );
        // Missing side periods count as inside the zone
        assert_eq!(
            d.base_level(None, 28.0, None, SignalType::Panic),
            BaseLevel::Urgent
        );
    }

    #[test]
    fn test_base_level_greed_mirrors_panic() {
        let d = detector();
        assert_eq!(
            d.base_level(Some(78.0), 76.0, Some(60.0), SignalType::Greed),
            BaseLevel::Good
        );
        assert_eq!(
            d.base_level(Some(78.0), 76.0, Some(66.0), SignalType::Greed),
            BaseLevel::Strong
        );
    }

    #[test]
    fn test_volume_adjustment() {
        let d = detector();
        assert_eq!(
            d.adjust_level_by_volume(BaseLevel::Urgent, 2.3),
            BaseLevel::Good
        );
        assert_eq!(
            d.adjust_level_by_volume(BaseLevel::Good, 2.1),
            BaseLevel::Strong
        );
        assert_eq!(
            d.adjust_level_by_volume(BaseLevel::Strong, 2.5),
            BaseLevel::Strong
        );
        assert_eq!(
            d.adjust_level_by_volume(BaseLevel::Urgent, 1.3),
            BaseLevel::Urgent
        );
    }

    #[test]
    fn test_strong_panic_emits_red() {
        let d = detector();
        let signal = d.analyze(&panic_window(), open_instant()).unwrap();

        assert_eq!(signal.ticker, "SBER");
        assert_eq!(signal.signal_type, SignalType::Panic);
        assert_eq!(signal.base_level, BaseLevel::Strong);
        assert_eq!(signal.final_level, FinalLevel::Red);
        assert!(signal.risk_score > 0.0);
        assert_eq!(signal.failed_filters.len(), 0);
        assert_eq!(signal.passed_filters.len(), 3);
        assert!(!signal.volume_clusters.is_empty());
    }

    #[test]
    fn test_market_closed_drops_everything() {
        let d = detector();
        let evening = crate::calendar::exchange_offset()
            .with_ymd_and_hms(2026, 3, 10, 19, 30, 0)
            .unwrap();
        assert!(d.analyze(&panic_window(), evening).is_none());

        let weekend = crate::calendar::exchange_offset()
            .with_ymd_and_hms(2026, 3, 7, 12, 0, 0)
            .unwrap();
        assert!(d.analyze(&panic_window(), weekend).is_none());
    }

    #[test]
    fn test_normal_rsi_range_drops() {
        let d = detector();
        let mut w = panic_window();
        w.rsi_14 = Some(50.0);
        w.volume_ratio = Some(3.0);
        assert!(d.analyze(&w, open_instant()).is_none());
    }

    #[test]
    fn test_insufficient_volume_drops() {
        let d = detector();
        let mut w = panic_window();
        w.volume_ratio = Some(1.0);
        assert!(d.analyze(&w, open_instant()).is_none());
    }

    #[test]
    fn test_missing_required_data_drops() {
        let d = detector();
        let mut w = panic_window();
        w.rsi_14 = None;
        assert!(d.analyze(&w, open_instant()).is_none());

        let mut w = panic_window();
        w.last_price = None;
        assert!(d.analyze(&w, open_instant()).is_none());
    }

    #[test]
    fn test_nan_input_drops_instead_of_emitting() {
        let d = detector();
        let mut w = panic_window();
        w.rsi_14 = Some(f64::NAN);
        assert!(d.analyze(&w, open_instant()).is_none());
    }

    #[test]
    fn test_one_failed_filter_downgrades() {
        let d = detector();
        let mut w = panic_window();
        // Break the trend filter: panic wants price above sma20
        w.last_price = Some(300.0);
        w.sma_20 = Some(305.0);

        let signal = d.analyze(&w, open_instant()).unwrap();
        assert_eq!(signal.base_level, BaseLevel::Strong);
        assert_eq!(signal.final_level, FinalLevel::Yellow);
        assert_eq!(signal.failed_filters.len(), 1);
        assert_eq!(signal.failed_filters[0].id, "trend");
    }

    #[test]
    fn test_urgent_promoted_by_volume_then_survives_filters() {
        let d = detector();
        let mut w = panic_window();
        // Only RSI(14) in the zone -> urgent; 2.1x volume promotes to good
        w.rsi_7 = Some(40.0);
        w.rsi_14 = Some(28.0);
        w.rsi_21 = Some(45.0);
        w.volume_ratio = Some(2.1);

        let signal = d.analyze(&w, open_instant()).unwrap();
        assert_eq!(signal.base_level, BaseLevel::Urgent);
        assert_eq!(signal.final_level, FinalLevel::Yellow);
    }

    #[test]
    fn test_determinism_excluding_timestamp() {
        let d = detector();
        let w = panic_window();
        let a = d.analyze(&w, open_instant()).unwrap();
        let b = d.analyze(&w, open_instant()).unwrap();

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_filters_never_promote() {
        let d = detector();
        // All filters passing leaves the level unchanged
        let (level, passed, failed) =
            d.apply_context_filters(&panic_window(), SignalType::Panic, BaseLevel::Good);
        assert_eq!(level, BaseLevel::Good);
        assert_eq!(passed.len(), 3);
        assert!(failed.is_empty());
    }
}
