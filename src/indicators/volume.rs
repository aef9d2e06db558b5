/// Ratio of the current volume to the mean of historical volumes
///
/// Returns 1.0 when the history is empty or its mean is zero, so a
/// missing history never inflates nor suppresses a signal.
pub fn calculate_volume_ratio(current_volume: f64, historical_volumes: &[f64]) -> f64 {
    if historical_volumes.is_empty() {
        return 1.0;
    }

    let avg_volume = historical_volumes.iter().sum::<f64>() / historical_volumes.len() as f64;

    if avg_volume == 0.0 {
        return 1.0;
    }

    current_volume / avg_volume
}
