/// Calculate Relative Strength Index (RSI) with Wilder smoothing
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Returns a series the same length as the input; the first `period`
/// entries are NaN. A window with zero average loss reads 100, zero
/// average gain reads 0.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];

    if period == 0 || n < period + 1 {
        return out;
    }

    // Single-day gains/losses; index j corresponds to closes[j + 1]
    let mut gains = Vec::with_capacity(n - 1);
    let mut losses = Vec::with_capacity(n - 1);
    for i in 1..n {
        let change = closes[i] - closes[i - 1];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    out[period] = rsi_point(avg_gain, avg_loss);

    for j in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[j]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[j]) / period as f64;
        out[j + 1] = rsi_point(avg_gain, avg_loss);
    }

    out
}

fn rsi_point(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    if avg_gain == 0.0 {
        return 0.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
