// Technical indicators module
// Pure numerical kernels: RSI, ATR, SMA, EMA, volume ratio.
// All functions allocate fresh output and never mutate inputs;
// undefined prefix entries are NaN.

pub mod atr;
pub mod moving_average;
pub mod rsi;
pub mod volume;

pub use atr::calculate_atr;
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;
pub use volume::calculate_volume_ratio;

/// Last defined (non-NaN) value of an indicator series
pub fn last_defined(series: &[f64]) -> Option<f64> {
    series.iter().rev().copied().find(|v| !v.is_nan())
}

/// Mean of the defined (non-NaN) values of an indicator series
pub fn mean_defined(series: &[f64]) -> Option<f64> {
    let defined: Vec<f64> = series.iter().copied().filter(|v| !v.is_nan()).collect();
    if defined.is_empty() {
        return None;
    }
    Some(defined.iter().sum::<f64>() / defined.len() as f64)
}
