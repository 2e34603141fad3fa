//! Leaderboards
//!
//! Per-(user, window, category, period) aggregate rows, ranked at read time.
//!
//! Ordering: score desc, then xp earned desc, then earliest row creation, then
//! user id. Ranks are 1-based positions in that ordering.

pub mod period;
pub mod ranker;

pub use period::{Period, WindowType};
pub use ranker::LeaderboardRanker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub type CategoryId = u32;

/// Unique identity of a leaderboard row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardKey {
    pub user_id: Uuid,
    pub window: WindowType,
    pub category_id: Option<CategoryId>,
    pub period_start: DateTime<Utc>,
}

/// Increment applied to a row for one game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardDelta {
    pub score: u64,
    pub xp_earned: u64,
    pub games_played: u64,
}

/// Stored aggregate row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub window: WindowType,
    pub category_id: Option<CategoryId>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub score: u64,
    pub xp_earned: u64,
    pub games_played: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    pub fn new(key: &LeaderboardKey, period_end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id,
            window: key.window,
            category_id: key.category_id,
            period_start: key.period_start,
            period_end,
            score: 0,
            xp_earned: 0,
            games_played: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> LeaderboardKey {
        LeaderboardKey {
            user_id: self.user_id,
            window: self.window,
            category_id: self.category_id,
            period_start: self.period_start,
        }
    }

    pub fn apply(&mut self, delta: &LeaderboardDelta, now: DateTime<Utc>) {
        self.score = self.score.saturating_add(delta.score);
        self.xp_earned = self.xp_earned.saturating_add(delta.xp_earned);
        self.games_played = self.games_played.saturating_add(delta.games_played);
        self.updated_at = now;
    }
}

/// Deterministic ranking order
pub fn rank_order(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.xp_earned.cmp(&a.xp_earned))
        .then_with(|| a.period_start.cmp(&b.period_start))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Row annotated with its 1-based rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: u64,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub score: u64,
    pub xp_earned: u64,
    pub games_played: u64,
}

/// One page of a leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub window: WindowType,
    pub category_id: Option<CategoryId>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub entries: Vec<RankedEntry>,
    pub total: u64,
}

/// A user's standing in one leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserRank {
    Ranked {
        rank: u64,
        score: u64,
        percentile: f64,
        #[serde(rename = "totalEntries")]
        total_entries: u64,
    },
    NoEntries {
        #[serde(rename = "totalEntries")]
        total_entries: u64,
    },
}

impl UserRank {
    pub fn rank(&self) -> Option<u64> {
        match self {
            UserRank::Ranked { rank, .. } => Some(*rank),
            UserRank::NoEntries { .. } => None,
        }
    }
}

/// `100 * (1 - (rank - 1) / total)`
pub fn percentile(rank: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * (1.0 - (rank.saturating_sub(1)) as f64 / total as f64)
}

/// Global all-time standing by total XP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPlayer {
    pub rank: u64,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub total_xp: u64,
    pub level: u32,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(score: u64, xp: u64, created_offset_secs: i64) -> LeaderboardEntry {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let key = LeaderboardKey {
            user_id: Uuid::new_v4(),
            window: WindowType::Weekly,
            category_id: None,
            period_start: now,
        };
        let mut e = LeaderboardEntry::new(&key, now, now + Duration::seconds(created_offset_secs));
        e.score = score;
        e.xp_earned = xp;
        e
    }

    #[test]
    fn test_rank_order_tie_breaks() {
        let mut rows = vec![
            entry(50, 10, 0),
            entry(80, 5, 0),
            entry(50, 20, 0),
            entry(50, 10, -5),
        ];
        rows.sort_by(rank_order);
        let keys: Vec<(u64, u64)> = rows.iter().map(|e| (e.score, e.xp_earned)).collect();
        assert_eq!(keys, vec![(80, 5), (50, 20), (50, 10), (50, 10)]);
        assert!(rows[2].created_at < rows[3].created_at, "earlier row ranks first");
    }

    #[test]
    fn test_percentile() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(percentile(1, 10), 100.0));
        assert!(close(percentile(10, 10), 10.0));
        assert!(close(percentile(3, 4), 50.0));
        assert_eq!(percentile(1, 0), 0.0);
    }

    #[test]
    fn test_apply_is_additive() {
        let mut e = entry(0, 0, 0);
        let delta = LeaderboardDelta {
            score: 70,
            xp_earned: 105,
            games_played: 1,
        };
        e.apply(&delta, Utc::now());
        e.apply(&delta, Utc::now());
        assert_eq!((e.score, e.xp_earned, e.games_played), (140, 210, 2));
    }
}
