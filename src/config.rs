use serde::Deserialize;

use crate::Result;

/// RSI/volume gates for one grading row
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct LevelThresholds {
    pub rsi_buy: f64,
    pub rsi_sell: f64,
    pub volume_min: f64,
}

/// The compatibility threshold table. Only the `white` row gates
/// detection; `red.volume_min` doubles as the volume-promotion bar.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    pub red: LevelThresholds,
    pub yellow: LevelThresholds,
    pub white: LevelThresholds,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            red: LevelThresholds {
                rsi_buy: 25.0,
                rsi_sell: 75.0,
                volume_min: 2.0,
            },
            yellow: LevelThresholds {
                rsi_buy: 30.0,
                rsi_sell: 70.0,
                volume_min: 1.5,
            },
            white: LevelThresholds {
                rsi_buy: 35.0,
                rsi_sell: 65.0,
                volume_min: 1.2,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VolatilityFilterConfig {
    pub min_ratio: f64,
    pub min_absolute_atr_pct: f64,
}

impl Default for VolatilityFilterConfig {
    fn default() -> Self {
        Self {
            min_ratio: 0.8,
            min_absolute_atr_pct: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TrendFilterConfig {
    pub ma_period: usize,
    pub require_trend_alignment: bool,
}

impl Default for TrendFilterConfig {
    fn default() -> Self {
        Self {
            ma_period: 20,
            require_trend_alignment: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VolumeFilterConfig {
    pub min_volume_ratio: f64,
}

impl Default for VolumeFilterConfig {
    fn default() -> Self {
        Self {
            min_volume_ratio: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct FiltersConfig {
    pub volatility: VolatilityFilterConfig,
    pub trend: TrendFilterConfig,
    pub volume: VolumeFilterConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub num_clusters: usize,
    pub min_volume_share: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_clusters: 3,
            min_volume_share: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub atr_normal: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { atr_normal: 2.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9100".to_string(),
            token: None,
        }
    }
}

/// Full configuration surface, layered from an optional `panicbot`
/// config file plus `PANICBOT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan_interval_secs: u64,
    pub cooldown_closed_secs: u64,
    pub request_delay_ms: u64,
    pub max_workers: usize,
    pub adapter_timeout_secs: u64,
    pub instruments: Vec<String>,
    pub database_path: String,
    pub holiday_cache_path: String,
    pub listen_addr: String,
    pub exchange: ExchangeConfig,
    pub thresholds: Thresholds,
    pub filters: FiltersConfig,
    pub clusters: ClusterConfig,
    pub risk: RiskConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            cooldown_closed_secs: 300,
            request_delay_ms: 200,
            max_workers: 8,
            adapter_timeout_secs: 10,
            instruments: vec![
                "SBER".to_string(),
                "GAZP".to_string(),
                "LKOH".to_string(),
                "YDEX".to_string(),
                "VTBR".to_string(),
            ],
            database_path: "signals.db".to_string(),
            holiday_cache_path: "holidays.json".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            exchange: ExchangeConfig::default(),
            thresholds: Thresholds::default(),
            filters: FiltersConfig::default(),
            clusters: ClusterConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `panicbot.{toml,yaml,json}` (optional) with
    /// `PANICBOT_*` environment overrides on top.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("panicbot").required(false))
            .add_source(
                config::Environment::with_prefix("PANICBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;

        if cfg.instruments.is_empty() {
            return Err("instrument list is empty".into());
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_match_compat_table() {
        let t = Thresholds::default();
        assert_eq!(t.red.rsi_buy, 25.0);
        assert_eq!(t.red.volume_min, 2.0);
        assert_eq!(t.yellow.rsi_sell, 70.0);
        assert_eq!(t.white.rsi_buy, 35.0);
        assert_eq!(t.white.volume_min, 1.2);
    }

    #[test]
    fn test_default_scan_parameters() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scan_interval_secs, 60);
        assert_eq!(cfg.cooldown_closed_secs, 300);
        assert_eq!(cfg.request_delay_ms, 200);
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.adapter_timeout_secs, 10);
        assert!(!cfg.instruments.is_empty());
    }

    #[test]
    fn test_partial_file_overrides_keep_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                scan_interval_secs = 30
                [thresholds.white]
                rsi_buy = 40.0
                rsi_sell = 60.0
                volume_min = 1.0
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let cfg: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(cfg.scan_interval_secs, 30);
        assert_eq!(cfg.thresholds.white.rsi_buy, 40.0);
        // untouched rows keep their defaults
        assert_eq!(cfg.thresholds.red.rsi_buy, 25.0);
        assert_eq!(cfg.filters.volume.min_volume_ratio, 1.5);
    }
}
