/// Calculate Simple Moving Average (SMA) series
///
/// Each defined entry is the mean of the trailing `period` values; the
/// first `period - 1` entries are NaN.
pub fn calculate_sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];

    if period == 0 || n < period {
        return out;
    }

    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = window_sum / period as f64;

    for i in period..n {
        window_sum += values[i] - values[i - period];
        out[i] = window_sum / period as f64;
    }

    out
}

/// Calculate Exponential Moving Average (EMA) series
///
/// Seeded with the SMA of the first `period` values, then
/// `ema = (x - prev) * (2 / (period + 1)) + prev`.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];

    if period == 0 || n < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = ema;

    for i in period..n {
        ema = (values[i] - ema) * multiplier + ema;
        out[i] = ema;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_matches_window_mean() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let sma = calculate_sma(&prices, 5);

        assert!(sma[..4].iter().all(|v| v.is_nan()));
        assert!((sma[4] - 104.0).abs() < 1e-6);
        assert!((sma[5] - 106.0).abs() < 1e-6);
    }

    #[test]
    fn test_sma_equals_mean_of_any_window() {
        let prices: Vec<f64> = (0..30).map(|i| (i * i % 17) as f64).collect();
        let period = 7;
        let sma = calculate_sma(&prices, period);

        for i in (period - 1)..prices.len() {
            let mean: f64 =
                prices[i + 1 - period..=i].iter().sum::<f64>() / period as f64;
            assert!((sma[i] - mean).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let ema = calculate_ema(&prices, 5);
        assert!((ema[4] - 104.0).abs() < 1e-6);
    }

    #[test]
    fn test_ema_tracks_rising_prices() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0, 112.0];
        let ema = calculate_ema(&prices, 5);
        // EMA lags price but follows it up above the seed
        assert!(ema[6] > 104.0);
        assert!(ema[6] < 112.0);
    }
}
