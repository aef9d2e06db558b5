use crate::models::{RiskLevel, RiskMetrics, SignalType};

/// Combines RSI deviation, volume ratio and volatility into a 0-100
/// score used to rank signal strength.
///
/// Score = (|RSI - 50| / 50) x log2(volume ratio + 1) x (ATR / norm),
/// each factor normalized before the product.
pub struct RiskCalculator {
    atr_normal: f64,
}

impl RiskCalculator {
    pub fn new(atr_normal: f64) -> Self {
        Self { atr_normal }
    }

    pub fn calculate(
        &self,
        rsi: f64,
        volume_ratio: f64,
        atr: f64,
        signal_type: SignalType,
    ) -> RiskMetrics {
        // RSI deviation from the neutral line, 0..1 with a soft tail
        // for out-of-range inputs
        let mut rsi_component = (rsi - 50.0).abs() / 50.0;
        if rsi_component > 1.0 {
            rsi_component = 1.0 + (rsi_component - 1.0) * 0.5;
        }

        let volume_component = if volume_ratio <= 0.0 {
            0.0
        } else {
            (volume_ratio + 1.0).log2().min(2.0) / 2.0
        };

        let volatility_component = if atr <= 0.0 || self.atr_normal <= 0.0 {
            0.0
        } else {
            (atr / self.atr_normal).min(3.0) / 3.0
        };

        let risk_score =
            rsi_component.min(1.0) * volume_component * volatility_component * 100.0;

        let risk_level = Self::level_for(risk_score);
        let interpretation = self.interpret(
            risk_score,
            risk_level,
            rsi_component,
            volume_component,
            volatility_component,
            signal_type,
        );

        RiskMetrics {
            risk_score,
            risk_level,
            rsi_component: rsi_component * 100.0,
            volume_component: volume_component * 100.0,
            volatility_component: volatility_component * 100.0,
            interpretation,
        }
    }

    fn level_for(score: f64) -> RiskLevel {
        if score <= 10.0 {
            RiskLevel::VeryLow
        } else if score <= 25.0 {
            RiskLevel::Low
        } else if score <= 50.0 {
            RiskLevel::Moderate
        } else if score <= 75.0 {
            RiskLevel::High
        } else if score <= 90.0 {
            RiskLevel::VeryHigh
        } else {
            RiskLevel::Extreme
        }
    }

    fn interpret(
        &self,
        score: f64,
        level: RiskLevel,
        rsi_component: f64,
        volume_component: f64,
        volatility_component: f64,
        signal_type: SignalType,
    ) -> String {
        let strength = match level {
            RiskLevel::VeryLow => "Very weak",
            RiskLevel::Low => "Weak",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "Strong",
            RiskLevel::VeryHigh => "Very strong",
            RiskLevel::Extreme => "EXTREME",
        };

        let kind = match signal_type {
            SignalType::Panic => "panic",
            SignalType::Greed => "greed",
        };

        let dominant = if rsi_component >= volume_component
            && rsi_component >= volatility_component
        {
            "RSI"
        } else if volume_component >= volatility_component {
            "volume"
        } else {
            "volatility"
        };

        let advice = match level {
            RiskLevel::VeryHigh | RiskLevel::Extreme => "Requires immediate attention.",
            RiskLevel::High => "Close watching recommended.",
            RiskLevel::Moderate => "Worth monitoring.",
            RiskLevel::VeryLow | RiskLevel::Low => "Can be deferred.",
        };

        format!(
            "{strength} {kind} signal. Risk score {score:.1}/100 ({}). Dominant factor: {dominant}. {advice}",
            level.label()
        )
    }
}
