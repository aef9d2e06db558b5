use crate::config::FiltersConfig;
use crate::models::{IndicatorWindow, SignalType, TradeAction};

/// Result of one filter check
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub passed: bool,
    pub reason: String,
}

impl FilterOutcome {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// One context predicate over a prepared window. Side-effect free;
/// every failure downgrades the signal by one rung.
pub trait ContextFilter: Send + Sync {
    fn id(&self) -> &'static str;
    fn check(&self, window: &IndicatorWindow, signal_type: SignalType) -> FilterOutcome;
}

/// Requires the market to actually move: ATR against its own average
/// and against the price.
pub struct VolatilityFilter {
    pub min_ratio: f64,
    pub min_absolute_atr_pct: f64,
}

impl ContextFilter for VolatilityFilter {
    fn id(&self) -> &'static str {
        "volatility"
    }

    fn check(&self, window: &IndicatorWindow, _signal_type: SignalType) -> FilterOutcome {
        let (Some(atr), Some(avg_atr), Some(price)) =
            (window.atr, window.avg_atr, window.last_price)
        else {
            return FilterOutcome::fail("volatility data unavailable");
        };

        if price <= 0.0 {
            return FilterOutcome::fail("volatility data unavailable");
        }

        let min_atr = self.min_ratio * avg_atr;
        if atr < min_atr {
            return FilterOutcome::fail(format!(
                "atr {:.2} below {:.2} ({}x average)",
                atr, min_atr, self.min_ratio
            ));
        }

        let atr_pct = atr / price * 100.0;
        if atr_pct < self.min_absolute_atr_pct {
            return FilterOutcome::fail(format!(
                "atr {:.2}% of price below {:.2}% floor",
                atr_pct, self.min_absolute_atr_pct
            ));
        }

        FilterOutcome::pass(format!("atr {:.2} ({:.2}% of price)", atr, atr_pct))
    }
}

/// Checks the signal against the SMA(20) trend: contrarian buys want
/// the price above the average, sells below.
pub struct TrendFilter {
    pub require_trend_alignment: bool,
}

impl ContextFilter for TrendFilter {
    fn id(&self) -> &'static str {
        "trend"
    }

    fn check(&self, window: &IndicatorWindow, signal_type: SignalType) -> FilterOutcome {
        if !self.require_trend_alignment {
            return FilterOutcome::pass("trend alignment disabled");
        }

        let (Some(price), Some(sma)) = (window.last_price, window.sma_20) else {
            return FilterOutcome::fail("trend data unavailable");
        };

        match signal_type.action() {
            TradeAction::Buy => {
                if price > sma {
                    FilterOutcome::pass(format!("price {:.2} above sma20 {:.2}", price, sma))
                } else {
                    FilterOutcome::fail(format!("price {:.2} not above sma20 {:.2}", price, sma))
                }
            }
            TradeAction::Sell => {
                if price < sma {
                    FilterOutcome::pass(format!("price {:.2} below sma20 {:.2}", price, sma))
                } else {
                    FilterOutcome::fail(format!("price {:.2} not below sma20 {:.2}", price, sma))
                }
            }
        }
    }
}

/// Requires the current volume to stand clear of the average
pub struct VolumeFilter {
    pub min_volume_ratio: f64,
}

impl ContextFilter for VolumeFilter {
    fn id(&self) -> &'static str {
        "volume"
    }

    fn check(&self, window: &IndicatorWindow, _signal_type: SignalType) -> FilterOutcome {
        let Some(ratio) = window.volume_ratio else {
            return FilterOutcome::fail("volume data unavailable");
        };

        if ratio >= self.min_volume_ratio {
            FilterOutcome::pass(format!(
                "volume {:.2}x average (min {:.2}x)",
                ratio, self.min_volume_ratio
            ))
        } else {
            FilterOutcome::fail(format!(
                "volume {:.2}x average below {:.2}x",
                ratio, self.min_volume_ratio
            ))
        }
    }
}

/// The fixed downgrade chain: volatility, then trend, then volume.
/// Session time is a detection precondition, not part of this chain.
pub fn build_filter_chain(config: &FiltersConfig) -> Vec<Box<dyn ContextFilter>> {
    vec![
        Box::new(VolatilityFilter {
            min_ratio: config.volatility.min_ratio,
            min_absolute_atr_pct: config.volatility.min_absolute_atr_pct,
        }),
        Box::new(TrendFilter {
            require_trend_alignment: config.trend.require_trend_alignment,
        }),
        Box::new(VolumeFilter {
            min_volume_ratio: config.volume.min_volume_ratio,
        }),
    ]
}
