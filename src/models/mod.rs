use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Candle interval supported by the exchange adapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CandleInterval {
    Min1,
    Min5,
    Min15,
    Hour,
    Day,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::Min1 => "1m",
            CandleInterval::Min5 => "5m",
            CandleInterval::Min15 => "15m",
            CandleInterval::Hour => "hour",
            CandleInterval::Day => "day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(CandleInterval::Min1),
            "5m" => Some(CandleInterval::Min5),
            "15m" => Some(CandleInterval::Min15),
            "hour" => Some(CandleInterval::Hour),
            "day" => Some(CandleInterval::Day),
            _ => None,
        }
    }
}

/// OHLCV candle, exchange-local time. Immutable once observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub open_time: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: CandleInterval,
    /// false while the bar is still forming
    pub complete: bool,
}

/// Top-of-book snapshot from the exchange adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub ticker: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub spread_percent: f64,
}

/// Static instrument metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub ticker: String,
    pub name: String,
    pub lot_size: u32,
    pub currency: String,
    pub tradable: bool,
}

/// Everything the detector needs for one ticker on one scan step.
///
/// Built by the provider from cached candles, dropped when the step ends.
#[derive(Debug, Clone)]
pub struct IndicatorWindow {
    pub ticker: String,
    pub closes: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub volumes: Vec<f64>,
    pub rsi_7: Option<f64>,
    pub rsi_14: Option<f64>,
    pub rsi_21: Option<f64>,
    pub atr: Option<f64>,
    pub avg_atr: Option<f64>,
    pub sma_20: Option<f64>,
    pub current_volume: Option<f64>,
    pub avg_volume: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub last_price: Option<f64>,
    pub spread_percent: f64,
}

impl IndicatorWindow {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            closes: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
            volumes: Vec::new(),
            rsi_7: None,
            rsi_14: None,
            rsi_21: None,
            atr: None,
            avg_atr: None,
            sma_20: None,
            current_volume: None,
            avg_volume: None,
            volume_ratio: None,
            last_price: None,
            spread_percent: 0.1,
        }
    }
}

/// Anomaly direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Panic,
    Greed,
}

impl SignalType {
    /// Enumeration name on the service wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            SignalType::Panic => "PANIC",
            SignalType::Greed => "GREED",
        }
    }

    /// The trade direction a signal of this type argues for
    pub fn action(&self) -> TradeAction {
        match self {
            SignalType::Panic => TradeAction::Buy,
            SignalType::Greed => TradeAction::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

/// Pre-filter grading from multi-period RSI verification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BaseLevel {
    Strong,
    Good,
    Urgent,
    None,
}

impl BaseLevel {
    pub fn rank(&self) -> u8 {
        match self {
            BaseLevel::Strong => 3,
            BaseLevel::Good => 2,
            BaseLevel::Urgent => 1,
            BaseLevel::None => 0,
        }
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            3.. => BaseLevel::Strong,
            2 => BaseLevel::Good,
            1 => BaseLevel::Urgent,
            0 => BaseLevel::None,
        }
    }

    /// One rung up; `Strong` is absorbing
    pub fn promoted(&self) -> Self {
        Self::from_rank(self.rank().saturating_add(1).min(3))
    }

    /// One rung down; `None` is absorbing
    pub fn demoted(&self) -> Self {
        Self::from_rank(self.rank().saturating_sub(1))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BaseLevel::Strong => "strong",
            BaseLevel::Good => "good",
            BaseLevel::Urgent => "urgent",
            BaseLevel::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strong" => Some(BaseLevel::Strong),
            "good" => Some(BaseLevel::Good),
            "urgent" => Some(BaseLevel::Urgent),
            "none" => Some(BaseLevel::None),
            _ => None,
        }
    }
}

/// Graded output after volume promotion and filter downgrades
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinalLevel {
    Red,
    Yellow,
    White,
    Ignore,
}

impl FinalLevel {
    pub fn from_base(base: BaseLevel) -> Self {
        match base {
            BaseLevel::Strong => FinalLevel::Red,
            BaseLevel::Good => FinalLevel::Yellow,
            BaseLevel::Urgent => FinalLevel::White,
            BaseLevel::None => FinalLevel::Ignore,
        }
    }

    /// Sort priority for top-signal queries: red > yellow > white
    pub fn priority(&self) -> i64 {
        match self {
            FinalLevel::Red => 3,
            FinalLevel::Yellow => 2,
            FinalLevel::White => 1,
            FinalLevel::Ignore => 0,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            FinalLevel::Red => "🔴",
            FinalLevel::Yellow => "🟡",
            FinalLevel::White => "⚪",
            FinalLevel::Ignore => "⚫",
        }
    }

    /// Enumeration name on the service wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            FinalLevel::Red => "STRONG",
            FinalLevel::Yellow => "MODERATE",
            FinalLevel::White => "URGENT",
            FinalLevel::Ignore => "IGNORE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinalLevel::Red => "red",
            FinalLevel::Yellow => "yellow",
            FinalLevel::White => "white",
            FinalLevel::Ignore => "ignore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "red" => Some(FinalLevel::Red),
            "yellow" => Some(FinalLevel::Yellow),
            "white" => Some(FinalLevel::White),
            "ignore" => Some(FinalLevel::Ignore),
            _ => None,
        }
    }
}

/// Position of a volume cluster relative to the current price
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Support,
    Resistance,
    Neutral,
}

/// Key price level extracted from the intraday volume distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCluster {
    pub price_level: f64,
    /// Share of volume among the selected clusters, 0..=100
    pub volume_percentage: f64,
    pub total_volume: f64,
    pub role: ClusterRole,
    /// 0..=1
    pub significance: f64,
}

/// Categorical strength of a risk score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "very low",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very high",
            RiskLevel::Extreme => "extreme",
        }
    }
}

/// Output of the risk scorer, embedded in the signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub rsi_component: f64,
    pub volume_component: f64,
    pub volatility_component: f64,
    pub interpretation: String,
}

/// Result of one context-filter check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterCheck {
    pub id: String,
    pub reason: String,
}

impl FilterCheck {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// The central entity: one graded panic/greed anomaly for one ticker.
///
/// Created by the detector in a single scan step, persisted once,
/// read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicSignal {
    pub ticker: String,
    pub detected_at: DateTime<FixedOffset>,
    pub signal_type: SignalType,
    pub rsi_7: Option<f64>,
    pub rsi_14: f64,
    pub rsi_21: Option<f64>,
    pub volume_ratio: f64,
    pub current_volume: Option<f64>,
    pub avg_volume: Option<f64>,
    pub base_level: BaseLevel,
    pub final_level: FinalLevel,
    pub passed_filters: Vec<FilterCheck>,
    pub failed_filters: Vec<FilterCheck>,
    pub price: Option<f64>,
    pub atr: Option<f64>,
    pub sma_20: Option<f64>,
    pub spread_percent: f64,
    pub volume_clusters: Vec<VolumeCluster>,
    pub cluster_summary: String,
    pub risk_score: f64,
    pub risk_interpretation: String,
    pub interpretation: String,
    pub recommendation: String,
    pub risk_level_text: String,
}

impl PanicSignal {
    /// Soft cross-field invariant: a panic signal is expected to come
    /// with an oversold RSI(14). Violations are warned about upstream,
    /// never rejected.
    pub fn is_consistent(&self) -> bool {
        match self.signal_type {
            SignalType::Panic => self.rsi_14 <= 50.0,
            SignalType::Greed => self.rsi_14 >= 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_level_promotion_absorbs_at_strong() {
        assert_eq!(BaseLevel::Urgent.promoted(), BaseLevel::Good);
        assert_eq!(BaseLevel::Good.promoted(), BaseLevel::Strong);
        assert_eq!(BaseLevel::Strong.promoted(), BaseLevel::Strong);
    }

    #[test]
    fn test_base_level_demotion_absorbs_at_none() {
        assert_eq!(BaseLevel::Strong.demoted(), BaseLevel::Good);
        assert_eq!(BaseLevel::Good.demoted(), BaseLevel::Urgent);
        assert_eq!(BaseLevel::Urgent.demoted(), BaseLevel::None);
        assert_eq!(BaseLevel::None.demoted(), BaseLevel::None);
    }

    #[test]
    fn test_final_level_mapping() {
        assert_eq!(FinalLevel::from_base(BaseLevel::Strong), FinalLevel::Red);
        assert_eq!(FinalLevel::from_base(BaseLevel::Good), FinalLevel::Yellow);
        assert_eq!(FinalLevel::from_base(BaseLevel::Urgent), FinalLevel::White);
        assert_eq!(FinalLevel::from_base(BaseLevel::None), FinalLevel::Ignore);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(FinalLevel::Red.wire_name(), "STRONG");
        assert_eq!(FinalLevel::Yellow.wire_name(), "MODERATE");
        assert_eq!(FinalLevel::White.wire_name(), "URGENT");
        assert_eq!(SignalType::Panic.wire_name(), "PANIC");
    }

    #[test]
    fn test_level_roundtrip_through_str() {
        for level in [
            FinalLevel::Red,
            FinalLevel::Yellow,
            FinalLevel::White,
            FinalLevel::Ignore,
        ] {
            assert_eq!(FinalLevel::parse(level.as_str()), Some(level));
        }
        for base in [
            BaseLevel::Strong,
            BaseLevel::Good,
            BaseLevel::Urgent,
            BaseLevel::None,
        ] {
            assert_eq!(BaseLevel::parse(base.as_str()), Some(base));
        }
    }

    #[test]
    fn test_signal_type_action() {
        assert_eq!(SignalType::Panic.action(), TradeAction::Buy);
        assert_eq!(SignalType::Greed.action(), TradeAction::Sell);
    }
}
