//! Achievement definitions and the seeded catalog.

use crate::leaderboard::WindowType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How rare an achievement is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// Running counters a threshold criterion can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    GamesPlayed,
    GamesWon,
    PerfectGames,
    QuestionsAnswered,
    TotalXp,
    CurrentStreak,
    MultiplayerGames,
}

/// Typed unlock predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criteria {
    /// Running counter >= threshold
    Counter {
        counter: Counter,
        threshold: u64,
        #[serde(default)]
        track_progress: bool,
    },
    /// Average answer time of the game <= max seconds
    SpeedDemon {
        max_avg_seconds: f64,
        #[serde(default)]
        min_questions: u64,
    },
    /// Accuracy of the game >= pct with a minimum sample size
    Accuracy { min_pct: f64, min_questions: u64 },
    /// Level >= threshold
    Level { threshold: u32 },
    /// Rank <= max_rank in the current period of `window`
    LeaderboardRank { max_rank: u64, window: WindowType },
    /// Game finished before `before_hour` local time
    EarlyBird { before_hour: u32 },
    /// Game finished between `from_hour` (inclusive) and `until_hour` (exclusive) local time
    NightOwl { from_hour: u32, until_hour: u32 },
    /// At least `min_days` since the previous activity
    Comeback { min_days: i64 },
}

impl Criteria {
    pub fn tracks_progress(&self) -> bool {
        matches!(
            self,
            Criteria::Counter {
                track_progress: true,
                ..
            }
        )
    }
}

/// Catalog entry, immutable per deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDefinition {
    pub code: String,
    pub name: String,
    pub description: String,
    pub criteria: Criteria,
    pub rarity: Rarity,
    pub xp_reward: u64,
    pub category: String,
    pub active: bool,
}

/// Earned (user, achievement) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
    pub user_id: Uuid,
    pub achievement_code: String,
    pub earned_at: DateTime<Utc>,
    pub progress: u8,
    pub notified: bool,
    /// Reward XP applied, or claimed by the pass applying it
    #[serde(default = "default_rewarded")]
    pub rewarded: bool,
}

fn default_rewarded() -> bool {
    true
}

/// Partial progress toward a trackable achievement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProgress {
    pub user_id: Uuid,
    pub achievement_code: String,
    pub progress: u8,
    pub updated_at: DateTime<Utc>,
}

fn def(
    code: &str,
    name: &str,
    description: &str,
    criteria: Criteria,
    rarity: Rarity,
    xp_reward: u64,
    category: &str,
) -> AchievementDefinition {
    AchievementDefinition {
        code: code.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        criteria,
        rarity,
        xp_reward,
        category: category.to_string(),
        active: true,
    }
}

fn counter(counter: Counter, threshold: u64, track_progress: bool) -> Criteria {
    Criteria::Counter {
        counter,
        threshold,
        track_progress,
    }
}

/// Seeded catalog loaded at startup
pub fn seeded_catalog() -> Vec<AchievementDefinition> {
    use Counter::*;
    use Rarity::*;

    vec![
        def("first_game", "First Steps", "Complete your first quiz",
            counter(GamesPlayed, 1, false), Common, 10, "milestone"),
        def("games_played_50", "Regular", "Complete 50 quizzes",
            counter(GamesPlayed, 50, true), Uncommon, 100, "milestone"),
        def("first_win", "Winner", "Win your first quiz",
            counter(GamesWon, 1, false), Common, 20, "victory"),
        def("games_won_10", "Contender", "Win 10 quizzes",
            counter(GamesWon, 10, true), Uncommon, 50, "victory"),
        def("games_won_100", "Champion", "Win 100 quizzes",
            counter(GamesWon, 100, true), Epic, 500, "victory"),
        def("perfect_game", "Flawless", "Finish a quiz without a single mistake",
            counter(PerfectGames, 1, false), Uncommon, 50, "skill"),
        def("perfect_games_10", "Perfectionist", "Finish 10 flawless quizzes",
            counter(PerfectGames, 10, true), Rare, 250, "skill"),
        def("questions_100", "Curious", "Answer 100 questions",
            counter(QuestionsAnswered, 100, true), Common, 30, "milestone"),
        def("questions_1000", "Encyclopedia", "Answer 1,000 questions",
            counter(QuestionsAnswered, 1_000, true), Rare, 300, "milestone"),
        def("xp_1000", "Rising Star", "Earn 1,000 XP",
            counter(TotalXp, 1_000, true), Uncommon, 50, "progression"),
        def("xp_10000", "Veteran", "Earn 10,000 XP",
            counter(TotalXp, 10_000, true), Epic, 500, "progression"),
        def("streak_3", "On a Roll", "Play 3 days in a row",
            counter(CurrentStreak, 3, true), Common, 30, "streak"),
        def("streak_7", "Dedicated", "Play 7 days in a row",
            counter(CurrentStreak, 7, true), Rare, 100, "streak"),
        def("multiplayer_10", "Social Butterfly", "Play 10 multiplayer quizzes",
            counter(MultiplayerGames, 10, true), Uncommon, 75, "social"),
        def("speed_demon", "Speed Demon", "Average 5 seconds or less per question",
            Criteria::SpeedDemon { max_avg_seconds: 5.0, min_questions: 5 }, Rare, 100, "skill"),
        def("sharpshooter", "Sharpshooter", "Score 90% or better on a quiz of 10+ questions",
            Criteria::Accuracy { min_pct: 90.0, min_questions: 10 }, Uncommon, 60, "skill"),
        def("level_5", "Getting Serious", "Reach level 5",
            Criteria::Level { threshold: 5 }, Common, 25, "progression"),
        def("level_10", "Seasoned", "Reach level 10",
            Criteria::Level { threshold: 10 }, Rare, 100, "progression"),
        def("weekly_top_10", "Top Ten", "Reach the weekly top 10",
            Criteria::LeaderboardRank { max_rank: 10, window: WindowType::Weekly }, Epic, 200, "competition"),
        def("early_bird", "Early Bird", "Finish a quiz before 6 AM",
            Criteria::EarlyBird { before_hour: 6 }, Uncommon, 40, "time"),
        def("night_owl", "Night Owl", "Finish a quiz between midnight and 4 AM",
            Criteria::NightOwl { from_hour: 0, until_hour: 4 }, Uncommon, 40, "time"),
        def("comeback", "Welcome Back", "Return after 14 days away",
            Criteria::Comeback { min_days: 14 }, Uncommon, 50, "time"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_codes_unique() {
        let catalog = seeded_catalog();
        let codes: HashSet<&str> = catalog.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes.len(), catalog.len());
        assert!(catalog.iter().all(|d| d.active));
    }

    #[test]
    fn test_criteria_json_shape() {
        let json = r#"{"type":"counter","counter":"games_won","threshold":10,"track_progress":true}"#;
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        assert!(criteria.tracks_progress());

        let json = r#"{"type":"leaderboard_rank","max_rank":3,"window":"daily"}"#;
        let criteria: Criteria = serde_json::from_str(json).unwrap();
        assert_eq!(
            criteria,
            Criteria::LeaderboardRank {
                max_rank: 3,
                window: WindowType::Daily
            }
        );
    }
}
