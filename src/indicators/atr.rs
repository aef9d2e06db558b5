/// Average True Range (ATR) with Wilder smoothing
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The first ATR is the arithmetic mean of the first `period` true
/// ranges; subsequent values use Wilder's recurrence. Returns a series
/// the same length as the input with a NaN prefix of length `period`.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];

    if period == 0 || n < period + 1 || highs.len() != n || lows.len() != n {
        return out;
    }

    // True ranges; index j corresponds to closes[j + 1]
    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        true_ranges.push(tr);
    }

    let mut atr: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period] = atr;

    for j in period..true_ranges.len() {
        atr = (atr * (period as f64 - 1.0) + true_ranges[j]) / period as f64;
        out[j + 1] = atr;
    }

    out
}
