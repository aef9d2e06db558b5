use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Exchange-local offset. All session times and timestamps in the
/// system are interpreted in this zone.
pub const EXCHANGE_OFFSET_HOURS: i32 = 3;

/// How long the on-disk holiday cache is considered fresh
const CACHE_FRESH_DAYS: i64 = 30;

const SESSION_OPEN: (u32, u32) = (10, 0);
const SESSION_CLOSE: (u32, u32) = (18, 30);
const SHORT_SESSION_CLOSE: (u32, u32) = (15, 30);

/// Intraday window in which signals are emitted; cuts the open/close noise
const ACTIVE_ZONE: ((u32, u32), (u32, u32)) = ((11, 0), (16, 0));

/// Fixed national holidays as (month, day); the January block is the
/// year-opening break. Non-January dates landing on a weekend shift to
/// the following Monday.
const FIXED_HOLIDAYS: &[(u32, u32)] = &[
    (1, 1),
    (1, 2),
    (1, 3),
    (1, 4),
    (1, 5),
    (1, 6),
    (1, 7),
    (1, 8),
    (2, 23),
    (3, 8),
    (5, 1),
    (5, 9),
    (6, 12),
    (11, 4),
];

/// Pre-holiday sessions with an early close, as (month, day)
const SHORT_SESSIONS: &[(u32, u32)] = &[
    (2, 22),
    (3, 7),
    (4, 30),
    (5, 8),
    (6, 11),
    (11, 3),
    (12, 30),
];

pub fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_OFFSET_HOURS * 3600)
        .expect("static offset is valid")
}

/// Current instant in exchange-local time
pub fn exchange_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&exchange_offset())
}

/// On-disk holiday cache layout
#[derive(Debug, Serialize, Deserialize)]
struct HolidayCacheFile {
    generated_at: DateTime<Utc>,
    holidays: Vec<NaiveDate>,
}

/// Trading-day and session-time oracle for the exchange.
///
/// Holidays come from a small JSON cache on disk when it is fresh,
/// otherwise from the built-in fixed list with weekend-to-Monday
/// shifts. Both paths are deterministic from their inputs.
pub struct MarketCalendar {
    holidays: RwLock<HashSet<NaiveDate>>,
    short_days: HashSet<NaiveDate>,
    cache_path: Option<PathBuf>,
}

impl MarketCalendar {
    /// Load the calendar, preferring a fresh on-disk cache
    pub fn load(cache_path: impl AsRef<Path>, now: DateTime<Utc>) -> Self {
        let cache_path = cache_path.as_ref().to_path_buf();
        let holidays = match Self::read_cache(&cache_path, now) {
            Some(set) => {
                tracing::info!("Loaded {} holidays from cache {:?}", set.len(), cache_path);
                set
            }
            None => {
                let set = Self::builtin_holidays(now.year() - 1, now.year() + 1);
                tracing::info!(
                    "Holiday cache missing or stale, using built-in list ({} dates)",
                    set.len()
                );
                set
            }
        };

        let short_days = Self::builtin_short_days(now.year() - 1, now.year() + 1);

        Self {
            holidays: RwLock::new(holidays),
            short_days,
            cache_path: Some(cache_path),
        }
    }

    /// Build a calendar from explicit sets (used by tests and replay)
    pub fn with_holidays(holidays: HashSet<NaiveDate>, short_days: HashSet<NaiveDate>) -> Self {
        Self {
            holidays: RwLock::new(holidays),
            short_days,
            cache_path: None,
        }
    }

    /// Calendar with the built-in holiday list for the years around `now`
    pub fn builtin(now: DateTime<Utc>) -> Self {
        Self {
            holidays: RwLock::new(Self::builtin_holidays(now.year() - 1, now.year() + 1)),
            short_days: Self::builtin_short_days(now.year() - 1, now.year() + 1),
            cache_path: None,
        }
    }

    fn read_cache(path: &Path, now: DateTime<Utc>) -> Option<HashSet<NaiveDate>> {
        let raw = std::fs::read_to_string(path).ok()?;
        let parsed: HolidayCacheFile = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Holiday cache {:?} unreadable: {}", path, e);
                return None;
            }
        };

        if now - parsed.generated_at > Duration::days(CACHE_FRESH_DAYS) {
            return None;
        }

        Some(parsed.holidays.into_iter().collect())
    }

    /// Re-read the holiday cache and swap the set atomically. Falls
    /// back to the built-in list when the cache is stale or missing.
    pub fn reload(&self, now: DateTime<Utc>) -> Result<usize> {
        let fresh = match &self.cache_path {
            Some(path) => Self::read_cache(path, now)
                .unwrap_or_else(|| Self::builtin_holidays(now.year() - 1, now.year() + 1)),
            None => Self::builtin_holidays(now.year() - 1, now.year() + 1),
        };

        let count = fresh.len();
        let mut guard = self
            .holidays
            .write()
            .map_err(|_| "holiday set lock poisoned")?;
        *guard = fresh;

        tracing::info!("Holiday set reloaded ({} dates)", count);
        Ok(count)
    }

    fn builtin_holidays(from_year: i32, to_year: i32) -> HashSet<NaiveDate> {
        let mut set = HashSet::new();

        for year in from_year..=to_year {
            for &(month, day) in FIXED_HOLIDAYS {
                let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                    continue;
                };

                set.insert(date);

                // Weekend holidays outside the January block carry over
                // to the following Monday.
                if month != 1 {
                    match date.weekday() {
                        Weekday::Sat => {
                            set.insert(date + Duration::days(2));
                        }
                        Weekday::Sun => {
                            set.insert(date + Duration::days(1));
                        }
                        _ => {}
                    }
                }
            }
        }

        set
    }

    fn builtin_short_days(from_year: i32, to_year: i32) -> HashSet<NaiveDate> {
        let mut set = HashSet::new();
        for year in from_year..=to_year {
            for &(month, day) in SHORT_SESSIONS {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    set.insert(date);
                }
            }
        }
        set
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays
            .read()
            .map(|set| set.contains(&date))
            .unwrap_or(false)
    }

    /// False on weekends and holidays
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// Session open/close for a trading day; errors on non-trading days
    pub fn trading_hours(&self, date: NaiveDate) -> Result<(NaiveTime, NaiveTime)> {
        if !self.is_trading_day(date) {
            return Err(format!("{} is not a trading day", date).into());
        }

        let open = time_of(SESSION_OPEN);
        let close = if self.short_days.contains(&date) {
            time_of(SHORT_SESSION_CLOSE)
        } else {
            time_of(SESSION_CLOSE)
        };

        Ok((open, close))
    }

    /// Is the market open at the given exchange-local instant, with a
    /// human-readable reason
    pub fn is_market_open_at(&self, at: DateTime<FixedOffset>) -> (bool, String) {
        let date = at.date_naive();

        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return (false, "weekend".to_string());
        }
        if self.is_holiday(date) {
            return (false, format!("exchange holiday {}", date));
        }

        let (open, close) = match self.trading_hours(date) {
            Ok(hours) => hours,
            Err(_) => return (false, "not a trading day".to_string()),
        };

        let t = at.time();
        if t < open {
            (false, format!("before session open ({})", open))
        } else if t >= close {
            (false, format!("after session close ({})", close))
        } else {
            (true, "market open".to_string())
        }
    }

    /// Convenience wrapper over the current instant
    pub fn is_market_open_now(&self) -> (bool, String) {
        self.is_market_open_at(exchange_now())
    }

    /// The narrower intraday window used by the detector's time gate
    pub fn in_active_zone(&self, at: DateTime<FixedOffset>) -> bool {
        let t = at.time();
        t >= time_of(ACTIVE_ZONE.0) && t < time_of(ACTIVE_ZONE.1)
    }

    /// Market open AND inside the active zone
    pub fn is_signal_window(&self, at: DateTime<FixedOffset>) -> (bool, String) {
        let (open, reason) = self.is_market_open_at(at);
        if !open {
            return (false, reason);
        }
        if !self.in_active_zone(at) {
            return (false, "outside active zone 11:00-16:00".to_string());
        }
        (true, "inside active zone".to_string())
    }

    pub fn next_trading_day(&self, from: NaiveDate) -> NaiveDate {
        let mut date = from + Duration::days(1);
        while !self.is_trading_day(date) {
            date += Duration::days(1);
        }
        date
    }

    pub fn previous_trading_day(&self, from: NaiveDate) -> NaiveDate {
        let mut date = from - Duration::days(1);
        while !self.is_trading_day(date) {
            date -= Duration::days(1);
        }
        date
    }
}

fn time_of((h, m): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("static session time is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar() -> MarketCalendar {
        MarketCalendar::builtin(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        exchange_offset()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_weekend_is_not_trading_day() {
        let cal = calendar();
        // 2026-03-07 is a Saturday
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()));
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 3, 8).unwrap()));
        // 2026-03-10 is a Tuesday
        assert!(cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()));
    }

    #[test]
    fn test_january_block_is_holiday() {
        let cal = calendar();
        for day in 1..=8 {
            assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 1, day).unwrap()));
        }
    }

    #[test]
    fn test_weekend_holiday_shifts_to_monday() {
        let cal = calendar();
        // 2026-11-04 is a Wednesday, no shift; 2025-06-12 is Thursday.
        // 2026-05-09 is a Saturday, so Monday 2026-05-11 is off too.
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 5, 11).unwrap()));
    }

    #[test]
    fn test_trading_hours_default_and_short() {
        let cal = calendar();
        // Regular Tuesday
        let (open, close) = cal
            .trading_hours(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
            .unwrap();
        assert_eq!(open, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(close, NaiveTime::from_hms_opt(18, 30, 0).unwrap());

        // 2026-04-30 is a Thursday short session
        let (_, close) = cal
            .trading_hours(NaiveDate::from_ymd_opt(2026, 4, 30).unwrap())
            .unwrap();
        assert_eq!(close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
    }

    #[test]
    fn test_trading_hours_errors_on_weekend() {
        let cal = calendar();
        assert!(cal
            .trading_hours(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap())
            .is_err());
    }

    #[test]
    fn test_market_open_at() {
        let cal = calendar();

        let (open, _) = cal.is_market_open_at(local(2026, 3, 10, 12, 30));
        assert!(open);

        let (open, reason) = cal.is_market_open_at(local(2026, 3, 10, 19, 30));
        assert!(!open);
        assert!(reason.contains("after session close"));

        let (open, reason) = cal.is_market_open_at(local(2026, 3, 10, 9, 30));
        assert!(!open);
        assert!(reason.contains("before session open"));

        let (open, reason) = cal.is_market_open_at(local(2026, 3, 7, 12, 0));
        assert!(!open);
        assert_eq!(reason, "weekend");
    }

    #[test]
    fn test_signal_window_excludes_session_edges() {
        let cal = calendar();

        let (ok, _) = cal.is_signal_window(local(2026, 3, 10, 12, 0));
        assert!(ok);

        // Open but before the active zone
        let (ok, reason) = cal.is_signal_window(local(2026, 3, 10, 10, 15));
        assert!(!ok);
        assert!(reason.contains("active zone"));

        // Open but after the active zone
        let (ok, _) = cal.is_signal_window(local(2026, 3, 10, 17, 0));
        assert!(!ok);
    }

    #[test]
    fn test_next_and_previous_trading_day_skip_weekend() {
        let cal = calendar();
        let friday = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        assert_eq!(
            cal.next_trading_day(friday),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap() // Mar 9 is the shifted Mar 8 holiday
        );
        let tuesday = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(cal.previous_trading_day(tuesday), friday);
    }

    #[test]
    fn test_cache_roundtrip_and_staleness() {
        let dir = std::env::temp_dir().join("panicbot-calendar-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("holidays.json");

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let file = HolidayCacheFile {
            generated_at: now,
            holidays: vec![NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()],
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let cal = MarketCalendar::load(&path, now);
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()));

        // 40 days later the cache is stale and the built-in list applies
        let later = now + Duration::days(40);
        let cal = MarketCalendar::load(&path, later);
        assert!(cal.is_trading_day(NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reload_swaps_holiday_set() {
        let cal = calendar();
        let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert!(cal.is_trading_day(date));

        // reload with no cache path falls back to the built-in list
        let count = cal
            .reload(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert!(count > 0);
        assert!(cal.is_trading_day(date));
    }
}
