use chrono::{DateTime, Duration, FixedOffset, Timelike};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::calendar::exchange_now;
use crate::models::{
    BaseLevel, FilterCheck, FinalLevel, PanicSignal, SignalType, VolumeCluster,
};
use crate::Result;

const SCHEMA_VERSION: &str = "1";

/// Timestamp layout used for storage and range comparisons. The offset
/// is fixed, so lexicographic ordering matches chronological ordering.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Period selector for top-signal queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopPeriod {
    Today,
    Yesterday,
    Week,
    Month,
}

impl TopPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "today" => Some(TopPeriod::Today),
            "yesterday" => Some(TopPeriod::Yesterday),
            "week" => Some(TopPeriod::Week),
            "month" => Some(TopPeriod::Month),
            _ => None,
        }
    }
}

/// Aggregate counts for a stats window
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignalStats {
    pub total_signals: i64,
    pub strong_signals: i64,
    pub moderate_signals: i64,
    pub urgent_signals: i64,
    pub most_active_ticker: Option<String>,
    pub most_active_count: i64,
    pub most_calm_ticker: Option<String>,
    pub most_calm_count: i64,
    pub market_tension: String,
}

/// Per-ticker aggregate for the dashboard heatmap
#[derive(Debug, Clone, serde::Serialize)]
pub struct TickerHeat {
    pub ticker: String,
    pub signal_count: i64,
    pub worst_level: FinalLevel,
    pub avg_risk_score: f64,
}

/// Durable append-only store of produced signals.
///
/// Single writer (the orchestrator), concurrent readers. Signals are
/// read-only after insert; duplicates within one second collapse to the
/// first insert via the dedup index.
pub struct SignalStore {
    pool: SqlitePool,
}

impl SignalStore {
    /// Connect and create the schema idempotently
    pub async fn connect(database_url: &str) -> Result<Self> {
        // A shared pool over a private in-memory database would hand
        // every connection its own empty database; keep the single
        // connection pinned so the data survives idle periods.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?
        };

        let store = Self { pool };
        store.init_schema().await?;

        tracing::info!("Connected to signal store at {}", database_url);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                rsi_7 REAL,
                rsi_14 REAL NOT NULL,
                rsi_21 REAL,
                volume_ratio REAL NOT NULL,
                current_volume REAL,
                avg_volume REAL,
                base_level TEXT NOT NULL,
                final_level TEXT NOT NULL,
                price REAL,
                atr REAL,
                sma_20 REAL,
                spread_percent REAL NOT NULL DEFAULT 0.1,
                volume_clusters TEXT,
                cluster_summary TEXT,
                passed_filters TEXT,
                failed_filters TEXT,
                risk_score REAL NOT NULL DEFAULT 0,
                risk_interpretation TEXT,
                interpretation TEXT,
                recommendation TEXT,
                risk_level_text TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_signals_dedup
             ON signals (ticker, detected_at, final_level)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signals_ticker_time
             ON signals (ticker, detected_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signals_time ON signals (detected_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&self.pool)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<String> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("value"))
    }

    /// Persist one signal. Returns false when the dedup index collapsed
    /// it into an earlier insert.
    pub async fn save(&self, signal: &PanicSignal) -> Result<bool> {
        let detected_at = signal
            .detected_at
            .with_nanosecond(0)
            .unwrap_or(signal.detected_at)
            .format(TS_FORMAT)
            .to_string();

        let volume_clusters = serde_json::to_string(&signal.volume_clusters)?;
        let passed_filters = serde_json::to_string(&signal.passed_filters)?;
        let failed_filters = serde_json::to_string(&signal.failed_filters)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO signals
            (ticker, detected_at, signal_type, rsi_7, rsi_14, rsi_21,
             volume_ratio, current_volume, avg_volume, base_level, final_level,
             price, atr, sma_20, spread_percent, volume_clusters, cluster_summary,
             passed_filters, failed_filters, risk_score, risk_interpretation,
             interpretation, recommendation, risk_level_text)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.ticker)
        .bind(&detected_at)
        .bind(match signal.signal_type {
            SignalType::Panic => "panic",
            SignalType::Greed => "greed",
        })
        .bind(signal.rsi_7)
        .bind(signal.rsi_14)
        .bind(signal.rsi_21)
        .bind(signal.volume_ratio)
        .bind(signal.current_volume)
        .bind(signal.avg_volume)
        .bind(signal.base_level.as_str())
        .bind(signal.final_level.as_str())
        .bind(signal.price)
        .bind(signal.atr)
        .bind(signal.sma_20)
        .bind(signal.spread_percent)
        .bind(&volume_clusters)
        .bind(&signal.cluster_summary)
        .bind(&passed_filters)
        .bind(&failed_filters)
        .bind(signal.risk_score)
        .bind(&signal.risk_interpretation)
        .bind(&signal.interpretation)
        .bind(&signal.recommendation)
        .bind(&signal.risk_level_text)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::info!(
                "Saved {} {} signal ({})",
                signal.ticker,
                signal.final_level.as_str(),
                detected_at
            );
        } else {
            tracing::debug!(
                "Duplicate {} signal at {} ignored",
                signal.ticker,
                detected_at
            );
        }
        Ok(inserted)
    }

    /// Per-ticker history, newest first. `limit` of 0 means unbounded.
    pub async fn history(
        &self,
        ticker: &str,
        days_back: i64,
        limit: i64,
    ) -> Result<Vec<PanicSignal>> {
        let cutoff = cutoff_string(days_back);
        let limit = if limit <= 0 { i64::MAX } else { limit };

        let rows = sqlx::query(
            "SELECT * FROM signals
             WHERE ticker = ? AND detected_at >= ?
             ORDER BY detected_at DESC
             LIMIT ?",
        )
        .bind(ticker)
        .bind(&cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signal).collect()
    }

    /// Strongest signals for a period, ordered by level priority, then
    /// volume ratio, then risk score, all descending.
    pub async fn top_signals(&self, period: TopPeriod, limit: i64) -> Result<Vec<PanicSignal>> {
        let now = exchange_now();
        let today = now
            .with_hour(0)
            .and_then(|d| d.with_minute(0))
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(now);

        let (start, end) = match period {
            TopPeriod::Today => (today, now),
            TopPeriod::Yesterday => (today - Duration::days(1), today),
            TopPeriod::Week => (now - Duration::days(7), now),
            TopPeriod::Month => (now - Duration::days(30), now),
        };

        let rows = sqlx::query(
            r#"
            SELECT * FROM signals
            WHERE detected_at >= ? AND detected_at <= ?
            ORDER BY
                CASE final_level
                    WHEN 'red' THEN 3
                    WHEN 'yellow' THEN 2
                    WHEN 'white' THEN 1
                    ELSE 0
                END DESC,
                volume_ratio DESC,
                risk_score DESC
            LIMIT ?
            "#,
        )
        .bind(start.format(TS_FORMAT).to_string())
        .bind(end.format(TS_FORMAT).to_string())
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signal).collect()
    }

    /// Counts by level plus the most/least active tickers and the
    /// categorical market tension for the window.
    pub async fn stats(&self, days: i64) -> Result<SignalStats> {
        let cutoff = cutoff_string(days);

        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN final_level = 'red' THEN 1 ELSE 0 END) AS strong,
                SUM(CASE WHEN final_level = 'yellow' THEN 1 ELSE 0 END) AS moderate,
                SUM(CASE WHEN final_level = 'white' THEN 1 ELSE 0 END) AS urgent
            FROM signals
            WHERE detected_at >= ?
            "#,
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = totals.get("total");
        let strong: i64 = totals.get::<Option<i64>, _>("strong").unwrap_or(0);
        let moderate: i64 = totals.get::<Option<i64>, _>("moderate").unwrap_or(0);
        let urgent: i64 = totals.get::<Option<i64>, _>("urgent").unwrap_or(0);

        let most_active = sqlx::query(
            "SELECT ticker, COUNT(*) AS n FROM signals
             WHERE detected_at >= ?
             GROUP BY ticker ORDER BY n DESC, ticker ASC LIMIT 1",
        )
        .bind(&cutoff)
        .fetch_optional(&self.pool)
        .await?;

        let most_calm = sqlx::query(
            "SELECT ticker, COUNT(*) AS n FROM signals
             WHERE detected_at >= ?
             GROUP BY ticker ORDER BY n ASC, ticker ASC LIMIT 1",
        )
        .bind(&cutoff)
        .fetch_optional(&self.pool)
        .await?;

        let market_tension = if total == 0 {
            "calm"
        } else if strong as f64 / total as f64 > 0.3 {
            "high"
        } else if moderate as f64 / total as f64 > 0.5 {
            "moderate"
        } else {
            "calm"
        };

        Ok(SignalStats {
            total_signals: total,
            strong_signals: strong,
            moderate_signals: moderate,
            urgent_signals: urgent,
            most_active_ticker: most_active.as_ref().map(|r| r.get("ticker")),
            most_active_count: most_active.as_ref().map(|r| r.get("n")).unwrap_or(0),
            most_calm_ticker: most_calm.as_ref().map(|r| r.get("ticker")),
            most_calm_count: most_calm.as_ref().map(|r| r.get("n")).unwrap_or(0),
            market_tension: market_tension.to_string(),
        })
    }

    /// Bulk typed signals for the recent window, newest first
    pub async fn panic_signals(&self, days: i64, limit: i64) -> Result<Vec<PanicSignal>> {
        let cutoff = cutoff_string(days);

        let rows = sqlx::query(
            "SELECT * FROM signals
             WHERE detected_at >= ?
             ORDER BY detected_at DESC
             LIMIT ?",
        )
        .bind(&cutoff)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signal).collect()
    }

    /// Per-ticker aggregates backing the dashboard heatmap
    pub async fn heatmap(&self, days: i64) -> Result<Vec<TickerHeat>> {
        let cutoff = cutoff_string(days);

        let rows = sqlx::query(
            r#"
            SELECT
                ticker,
                COUNT(*) AS n,
                MAX(CASE final_level
                    WHEN 'red' THEN 3
                    WHEN 'yellow' THEN 2
                    WHEN 'white' THEN 1
                    ELSE 0
                END) AS worst,
                AVG(risk_score) AS avg_risk
            FROM signals
            WHERE detected_at >= ?
            GROUP BY ticker
            ORDER BY worst DESC, n DESC, ticker ASC
            "#,
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let worst: i64 = row.get("worst");
                TickerHeat {
                    ticker: row.get("ticker"),
                    signal_count: row.get("n"),
                    worst_level: match worst {
                        3 => FinalLevel::Red,
                        2 => FinalLevel::Yellow,
                        1 => FinalLevel::White,
                        _ => FinalLevel::Ignore,
                    },
                    avg_risk_score: row.get::<Option<f64>, _>("avg_risk").unwrap_or(0.0),
                }
            })
            .collect())
    }

    /// Latest stored signal for a ticker, if any
    pub async fn last_signal(&self, ticker: &str) -> Result<Option<PanicSignal>> {
        let row = sqlx::query(
            "SELECT * FROM signals WHERE ticker = ? ORDER BY detected_at DESC LIMIT 1",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_signal).transpose()
    }
}

fn cutoff_string(days: i64) -> String {
    (exchange_now() - Duration::days(days.max(0)))
        .format(TS_FORMAT)
        .to_string()
}

fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> Result<PanicSignal> {
    let detected_at_raw: String = row.get("detected_at");
    let detected_at: DateTime<FixedOffset> =
        DateTime::parse_from_str(&detected_at_raw, TS_FORMAT)
            .map_err(|e| format!("bad detected_at '{detected_at_raw}': {e}"))?;

    let signal_type_raw: String = row.get("signal_type");
    let signal_type = match signal_type_raw.as_str() {
        "panic" => SignalType::Panic,
        "greed" => SignalType::Greed,
        other => return Err(format!("unknown signal type '{other}'").into()),
    };

    let base_level_raw: String = row.get("base_level");
    let base_level = BaseLevel::parse(&base_level_raw)
        .ok_or_else(|| format!("unknown base level '{base_level_raw}'"))?;

    let final_level_raw: String = row.get("final_level");
    let final_level = FinalLevel::parse(&final_level_raw)
        .ok_or_else(|| format!("unknown final level '{final_level_raw}'"))?;

    let volume_clusters: Vec<VolumeCluster> = row
        .get::<Option<String>, _>("volume_clusters")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?
        .unwrap_or_default();

    let passed_filters: Vec<FilterCheck> = row
        .get::<Option<String>, _>("passed_filters")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?
        .unwrap_or_default();

    let failed_filters: Vec<FilterCheck> = row
        .get::<Option<String>, _>("failed_filters")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?
        .unwrap_or_default();

    Ok(PanicSignal {
        ticker: row.get("ticker"),
        detected_at,
        signal_type,
        rsi_7: row.get("rsi_7"),
        rsi_14: row.get("rsi_14"),
        rsi_21: row.get("rsi_21"),
        volume_ratio: row.get("volume_ratio"),
        current_volume: row.get("current_volume"),
        avg_volume: row.get("avg_volume"),
        base_level,
        final_level,
        passed_filters,
        failed_filters,
        price: row.get("price"),
        atr: row.get("atr"),
        sma_20: row.get("sma_20"),
        spread_percent: row.get("spread_percent"),
        volume_clusters,
        cluster_summary: row
            .get::<Option<String>, _>("cluster_summary")
            .unwrap_or_default(),
        risk_score: row.get("risk_score"),
        risk_interpretation: row
            .get::<Option<String>, _>("risk_interpretation")
            .unwrap_or_default(),
        interpretation: row
            .get::<Option<String>, _>("interpretation")
            .unwrap_or_default(),
        recommendation: row
            .get::<Option<String>, _>("recommendation")
            .unwrap_or_default(),
        risk_level_text: row
            .get::<Option<String>, _>("risk_level_text")
            .unwrap_or_default(),
    })
}
