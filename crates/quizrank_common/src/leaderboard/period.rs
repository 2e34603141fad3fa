//! Leaderboard windows and period resolution.
//!
//! Periods are half-open `[start, end)` ranges in UTC. Weeks start on Monday.

use crate::error::{ProgressionError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation window of a leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowType {
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl WindowType {
    pub const ALL: [WindowType; 4] = [
        WindowType::Daily,
        WindowType::Weekly,
        WindowType::Monthly,
        WindowType::AllTime,
    ];

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(WindowType::Daily),
            "weekly" => Ok(WindowType::Weekly),
            "monthly" => Ok(WindowType::Monthly),
            "all_time" | "alltime" | "all-time" => Ok(WindowType::AllTime),
            other => Err(ProgressionError::validation(format!(
                "unknown window type '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Daily => "daily",
            WindowType::Weekly => "weekly",
            WindowType::Monthly => "monthly",
            WindowType::AllTime => "all_time",
        }
    }
}

impl TryFrom<String> for WindowType {
    type Error = ProgressionError;

    fn try_from(value: String) -> Result<Self> {
        WindowType::parse(&value)
    }
}

impl From<WindowType> for String {
    fn from(w: WindowType) -> Self {
        w.as_str().to_string()
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved period of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub window: WindowType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// Period of `window` containing `now`
    pub fn resolve(window: WindowType, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let (start, end) = match window {
            WindowType::Daily => {
                let start = midnight(today);
                (start, start + Duration::days(1))
            }
            WindowType::Weekly => {
                let back = today.weekday().num_days_from_monday() as i64;
                let start = midnight(today - Duration::days(back));
                (start, start + Duration::days(7))
            }
            WindowType::Monthly => {
                let first = today.with_day(1).unwrap_or(today);
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                }
                .unwrap_or(first);
                (midnight(first), midnight(next))
            }
            WindowType::AllTime => (all_time_start(), all_time_end()),
        };
        Self { window, start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Fixed start of the all-time window (Unix epoch)
pub fn all_time_start() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Far-future end of the all-time window
pub fn all_time_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
    }

    #[test]
    fn test_parse_window_types() {
        assert_eq!(WindowType::parse("daily").unwrap(), WindowType::Daily);
        assert_eq!(WindowType::parse(" Weekly ").unwrap(), WindowType::Weekly);
        assert_eq!(WindowType::parse("all_time").unwrap(), WindowType::AllTime);
        assert!(WindowType::parse("hourly").unwrap_err().is_validation());
    }

    #[test]
    fn test_daily_period() {
        let p = Period::resolve(WindowType::Daily, at(2026, 10, 18, 17));
        assert_eq!(p.start, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap());
        assert_eq!(p.end, Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());
        assert!(p.contains(at(2026, 10, 18, 23)));
        assert!(!p.contains(p.end));
    }

    #[test]
    fn test_weekly_period_starts_monday() {
        // 2026-10-18 is a Sunday
        let p = Period::resolve(WindowType::Weekly, at(2026, 10, 18, 9));
        assert_eq!(p.start, Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap());
        assert_eq!(p.end, Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());

        let monday = Period::resolve(WindowType::Weekly, at(2026, 10, 19, 0));
        assert_eq!(monday.start, p.end);
    }

    #[test]
    fn test_monthly_period_rolls_year() {
        let p = Period::resolve(WindowType::Monthly, at(2026, 12, 31, 22));
        assert_eq!(p.start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(p.end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_all_time_is_fixed() {
        let a = Period::resolve(WindowType::AllTime, at(2020, 1, 1, 0));
        let b = Period::resolve(WindowType::AllTime, at(2026, 10, 18, 12));
        assert_eq!(a, b);
        assert_eq!(a.start.timestamp(), 0);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let now = at(2026, 2, 28, 5);
        for window in WindowType::ALL {
            let p = Period::resolve(window, now);
            assert_eq!(p, Period::resolve(window, now));
            assert!(p.contains(now));
        }
    }
}
