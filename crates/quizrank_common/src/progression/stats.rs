//! Per-user aggregates: progression row and gameplay statistics.

use super::levels::{LevelBand, LevelTable};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authoritative progression row for one user.
///
/// `level`, `title`, `current_level_xp` and `level_progress` are always derived
/// from `total_xp` through the level table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgression {
    pub user_id: Uuid,
    pub total_xp: u64,
    pub current_level_xp: u64,
    pub level: u32,
    pub title: String,
    pub level_progress: f64,
    pub updated_at: DateTime<Utc>,
}

impl UserProgression {
    /// Level 1, zero XP
    pub fn new(user_id: Uuid, table: &LevelTable) -> Self {
        Self::from_total(user_id, 0, table)
    }

    pub fn from_total(user_id: Uuid, total_xp: u64, table: &LevelTable) -> Self {
        Self::in_band(user_id, total_xp, table.band_for_xp(total_xp))
    }

    pub(crate) fn in_band(user_id: Uuid, total_xp: u64, band: &LevelBand) -> Self {
        let snap = LevelTable::snapshot_in(band, total_xp);
        Self {
            user_id,
            total_xp,
            current_level_xp: snap.current_level_xp,
            level: snap.level,
            title: snap.title,
            level_progress: snap.level_progress,
            updated_at: Utc::now(),
        }
    }
}

/// Display identity known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Counter changes produced by one completed game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatsDelta {
    pub won: bool,
    pub perfect: bool,
    pub multiplayer: bool,
    pub questions_answered: u64,
    pub correct_answers: u64,
    pub score: u64,
    pub played_at: DateTime<Utc>,
}

/// Running gameplay counters for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub user_id: Uuid,
    pub games_played: u64,
    pub games_won: u64,
    pub perfect_games: u64,
    pub multiplayer_games: u64,
    pub questions_answered: u64,
    pub correct_answers: u64,
    pub total_score: u64,
    /// Consecutive UTC days with at least one game
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_active_at: Option<DateTime<Utc>>,
    /// Activity timestamp before the most recent game (used for comeback checks)
    pub previous_active_at: Option<DateTime<Utc>>,
}

impl UserStats {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            games_played: 0,
            games_won: 0,
            perfect_games: 0,
            multiplayer_games: 0,
            questions_answered: 0,
            correct_answers: 0,
            total_score: 0,
            current_streak: 0,
            best_streak: 0,
            last_active_at: None,
            previous_active_at: None,
        }
    }

    /// Apply one game. Counters only grow; the streak follows calendar days.
    pub fn apply_game(&mut self, delta: &GameStatsDelta) {
        self.games_played += 1;
        if delta.won {
            self.games_won += 1;
        }
        if delta.perfect {
            self.perfect_games += 1;
        }
        if delta.multiplayer {
            self.multiplayer_games += 1;
        }
        self.questions_answered += delta.questions_answered;
        self.correct_answers += delta.correct_answers;
        self.total_score += delta.score;

        self.current_streak = next_streak(self.current_streak, self.last_active_at, delta.played_at);
        self.best_streak = self.best_streak.max(self.current_streak);

        self.previous_active_at = self.last_active_at;
        if self.last_active_at.map_or(true, |last| delta.played_at > last) {
            self.last_active_at = Some(delta.played_at);
        }
    }

    /// Overall accuracy in percent, 0 when nothing was answered
    pub fn accuracy_pct(&self) -> f64 {
        if self.questions_answered == 0 {
            return 0.0;
        }
        100.0 * self.correct_answers as f64 / self.questions_answered as f64
    }
}

fn next_streak(current: u32, last: Option<DateTime<Utc>>, at: DateTime<Utc>) -> u32 {
    let Some(last) = last else {
        return 1;
    };
    let (last_day, day) = (last.date_naive(), at.date_naive());
    if day <= last_day {
        current.max(1)
    } else if day - last_day == Duration::days(1) {
        current + 1
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn game(at: DateTime<Utc>) -> GameStatsDelta {
        GameStatsDelta {
            won: true,
            perfect: false,
            multiplayer: false,
            questions_answered: 10,
            correct_answers: 7,
            score: 70,
            played_at: at,
        }
    }

    #[test]
    fn test_new_progression_is_level_one() {
        let table = LevelTable::seeded();
        let p = UserProgression::new(Uuid::new_v4(), &table);
        assert_eq!((p.level, p.total_xp, p.current_level_xp), (1, 0, 0));
        assert_eq!(p.level_progress, 0.0);
    }

    #[test]
    fn test_apply_game_counters() {
        let mut stats = UserStats::new(Uuid::new_v4());
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        stats.apply_game(&game(at));
        stats.apply_game(&GameStatsDelta {
            won: false,
            perfect: true,
            ..game(at)
        });

        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.games_won, 1);
        assert_eq!(stats.perfect_games, 1);
        assert_eq!(stats.questions_answered, 20);
        assert_eq!(stats.total_score, 140);
        assert!((stats.accuracy_pct() - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_streak_follows_days() {
        let mut stats = UserStats::new(Uuid::new_v4());
        let day1 = Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap();

        stats.apply_game(&game(day1));
        assert_eq!(stats.current_streak, 1);

        stats.apply_game(&game(day1 + Duration::hours(1)));
        assert_eq!(stats.current_streak, 2, "next calendar day extends the streak");

        stats.apply_game(&game(day1 + Duration::hours(2)));
        assert_eq!(stats.current_streak, 2, "same day keeps it");

        stats.apply_game(&game(day1 + Duration::days(4)));
        assert_eq!(stats.current_streak, 1, "a gap resets it");
        assert_eq!(stats.best_streak, 2);
        assert_eq!(stats.previous_active_at, Some(day1 + Duration::hours(2)));
    }
}
