use crate::models::{ClusterRole, VolumeCluster};

const MAX_BINS: usize = 20;

/// Extracts key price levels from the intraday volume distribution.
///
/// Prices are binned into equal-width zones, insignificant zones are
/// dropped, and the top zones are labelled support/resistance/neutral
/// against the current price. Deterministic: ties in zone volume break
/// toward the lower price level.
pub struct VolumeClusterAnalyzer {
    num_clusters: usize,
    min_volume_share: f64,
}

impl VolumeClusterAnalyzer {
    pub fn new(num_clusters: usize, min_volume_share: f64) -> Self {
        Self {
            num_clusters: num_clusters.max(1),
            min_volume_share,
        }
    }

    pub fn analyze(&self, prices: &[f64], volumes: &[f64]) -> Vec<VolumeCluster> {
        if prices.is_empty() || volumes.is_empty() {
            tracing::warn!("No data for volume cluster analysis");
            return Vec::new();
        }

        if prices.len() != volumes.len() {
            tracing::warn!(
                "Cluster input length mismatch: {} prices vs {} volumes",
                prices.len(),
                volumes.len()
            );
            return Vec::new();
        }

        let current_price = prices[prices.len() - 1];

        let min_price = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max_price = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max_price - min_price;

        if range == 0.0 {
            // Flat tape: the whole session traded at one level
            let total: f64 = volumes.iter().sum();
            return vec![VolumeCluster {
                price_level: current_price,
                volume_percentage: 100.0,
                total_volume: total,
                role: ClusterRole::Neutral,
                significance: 1.0,
            }];
        }

        let zones = self.bin_volume(prices, volumes, min_price, range);
        let selected = self.select_significant(zones);
        self.assign_roles(selected, current_price)
    }

    /// Sum volume per equal-width price zone; empty zones are dropped
    fn bin_volume(
        &self,
        prices: &[f64],
        volumes: &[f64],
        min_price: f64,
        range: f64,
    ) -> Vec<(f64, f64)> {
        let mut distinct: Vec<f64> = prices.to_vec();
        distinct.sort_by(|a, b| a.partial_cmp(b).expect("finite prices"));
        distinct.dedup();

        let num_bins = MAX_BINS.min(distinct.len()).max(1);
        let width = range / num_bins as f64;

        let mut bins = vec![0.0f64; num_bins];
        for (&price, &volume) in prices.iter().zip(volumes) {
            let mut idx = ((price - min_price) / range * num_bins as f64) as usize;
            if idx >= num_bins {
                idx = num_bins - 1;
            }
            bins[idx] += volume;
        }

        bins.into_iter()
            .enumerate()
            .filter(|(_, v)| *v > 0.0)
            .map(|(i, v)| (min_price + (i as f64 + 0.5) * width, v))
            .collect()
    }

    /// Keep zones above the volume-share floor, take the top N, and
    /// renormalize percentages against the selection
    fn select_significant(&self, mut zones: Vec<(f64, f64)>) -> Vec<(f64, f64, f64)> {
        if zones.is_empty() {
            return Vec::new();
        }

        let total: f64 = zones.iter().map(|(_, v)| v).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        zones.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .expect("finite volumes")
                .then(a.0.partial_cmp(&b.0).expect("finite prices"))
        });

        let significant: Vec<(f64, f64)> = zones
            .into_iter()
            .filter(|(_, v)| v / total >= self.min_volume_share)
            .take(self.num_clusters)
            .collect();

        let selected_total: f64 = significant.iter().map(|(_, v)| v).sum();
        if selected_total <= 0.0 {
            return Vec::new();
        }

        significant
            .into_iter()
            .map(|(price, volume)| (price, volume, volume / selected_total * 100.0))
            .collect()
    }

    fn assign_roles(
        &self,
        zones: Vec<(f64, f64, f64)>,
        current_price: f64,
    ) -> Vec<VolumeCluster> {
        zones
            .into_iter()
            .map(|(price_level, total_volume, volume_percentage)| {
                let role = if price_level < current_price {
                    ClusterRole::Support
                } else if price_level > current_price {
                    ClusterRole::Resistance
                } else {
                    ClusterRole::Neutral
                };

                VolumeCluster {
                    price_level,
                    volume_percentage,
                    total_volume,
                    role,
                    significance: (volume_percentage / 100.0 * 2.0).min(1.0),
                }
            })
            .collect()
    }

    /// Prose summary of the key levels for chat and dashboard consumers
    pub fn summary(&self, clusters: &[VolumeCluster]) -> String {
        if clusters.is_empty() {
            return "No significant volume clusters detected".to_string();
        }

        let mut out = String::from("Key volume levels:\n");
        for (i, cluster) in clusters.iter().enumerate() {
            let role = match cluster.role {
                ClusterRole::Support => "support",
                ClusterRole::Resistance => "resistance",
                ClusterRole::Neutral => "neutral",
            };
            out.push_str(&format!(
                "{}. {:.2} ({}) - {:.1}% of volume, significance {:.2}\n",
                i + 1,
                cluster.price_level,
                role,
                cluster.volume_percentage,
                cluster.significance
            ));
        }
        out
    }
}
