//! Achievement evaluation.
//!
//! One pass over every active, not-yet-earned definition. Grants are
//! insert-if-absent in the store, so concurrent or repeated checks unlock an
//! achievement at most once. Reward XP goes through the progression updater
//! and never triggers a second pass.

use super::catalog::{AchievementDefinition, AchievementProgress, Counter, Criteria, UserAchievement};
use crate::error::Result;
use crate::leaderboard::{CategoryId, LeaderboardRanker};
use crate::progression::{AddXpOutcome, GameSummary, ProgressionUpdater, UserProgression, UserStats};
use crate::store::ProgressionStore;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What happened in the game being evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameContext {
    #[serde(flatten)]
    pub summary: GameSummary,
    #[serde(default)]
    pub perfect_game: Option<bool>,
    #[serde(default)]
    pub time_taken_seconds: Option<f64>,
    #[serde(default)]
    pub current_streak: Option<u32>,
    #[serde(default)]
    pub is_multiplayer: Option<bool>,
    #[serde(default)]
    pub leaderboard_rank: Option<u64>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    /// Player's offset from UTC, used for time-of-day criteria
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl GameContext {
    pub fn new(summary: GameSummary) -> Self {
        Self {
            summary,
            perfect_game: None,
            time_taken_seconds: None,
            current_streak: None,
            is_multiplayer: None,
            leaderboard_rank: None,
            category_id: None,
            occurred_at: Utc::now(),
            utc_offset_minutes: 0,
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn is_perfect(&self) -> bool {
        self.perfect_game
            .or(self.summary.is_perfect_game)
            .unwrap_or(self.summary.total_questions > 0
                && self.summary.correct_answers == self.summary.total_questions)
    }

    /// Average seconds per question, from the summary or derived from total time
    pub fn avg_seconds(&self) -> Option<f64> {
        self.summary.avg_time_per_question.or_else(|| {
            let total = self.summary.total_questions;
            self.time_taken_seconds
                .filter(|_| total > 0)
                .map(|t| t / total as f64)
        })
    }

    fn local_hour(&self) -> u32 {
        (self.occurred_at + Duration::minutes(self.utc_offset_minutes as i64)).hour()
    }
}

/// A grant made by this evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedAchievement {
    pub achievement: AchievementDefinition,
    pub earned_at: DateTime<Utc>,
    /// Progression after the reward was applied
    pub reward: Option<AddXpOutcome>,
    /// Reward settled for a grant made by an earlier pass
    #[serde(default)]
    pub resumed: bool,
}

/// A previously earned achievement joined with its definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnedAchievement {
    pub code: String,
    pub name: String,
    pub description: String,
    pub xp_reward: u64,
    pub earned_at: DateTime<Utc>,
}

struct Verdict {
    satisfied: bool,
    progress: Option<u8>,
}

impl Verdict {
    fn met(satisfied: bool) -> Self {
        Self {
            satisfied,
            progress: None,
        }
    }
}

pub struct AchievementEvaluator {
    store: Arc<dyn ProgressionStore>,
    updater: Arc<ProgressionUpdater>,
    ranker: Option<Arc<LeaderboardRanker>>,
    track_progress: bool,
}

impl AchievementEvaluator {
    pub fn new(store: Arc<dyn ProgressionStore>, updater: Arc<ProgressionUpdater>) -> Self {
        Self {
            store,
            updater,
            ranker: None,
            track_progress: true,
        }
    }

    /// Resolve leaderboard-rank criteria the context does not carry
    pub fn with_ranker(mut self, ranker: Arc<LeaderboardRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Skip writing partial-progress rows
    pub fn without_progress(mut self) -> Self {
        self.track_progress = false;
        self
    }

    /// Evaluate every active definition the user has not earned yet.
    ///
    /// Rewards left unpaid by an earlier pass are settled first and reported
    /// with `resumed` set. A reward that fails to apply keeps its grant and is
    /// retried on the next pass.
    pub async fn check(&self, user_id: Uuid, ctx: &GameContext) -> Result<Vec<UnlockedAchievement>> {
        ctx.summary.validate()?;

        let definitions = self.store.active_achievements().await?;
        let grants = self.store.user_achievements(user_id).await?;
        let mut unlocked = self.settle_rewards(user_id, &definitions, &grants).await;

        let earned: HashSet<&str> = grants.iter().map(|g| g.achievement_code.as_str()).collect();
        let pending: Vec<&AchievementDefinition> = definitions
            .iter()
            .filter(|d| !earned.contains(d.code.as_str()))
            .collect();
        if pending.is_empty() {
            return Ok(unlocked);
        }

        let stats = self
            .store
            .get_stats(user_id)
            .await?
            .unwrap_or_else(|| UserStats::new(user_id));
        let progression = self.updater.get(user_id).await?;

        for definition in pending {
            let verdict = self
                .evaluate(user_id, &definition.criteria, &stats, &progression, ctx)
                .await;

            if !verdict.satisfied {
                if let Some(progress) = verdict.progress.filter(|_| self.track_progress) {
                    let row = AchievementProgress {
                        user_id,
                        achievement_code: definition.code.clone(),
                        progress,
                        updated_at: Utc::now(),
                    };
                    if let Err(e) = self.store.set_achievement_progress(row).await {
                        warn!(%user_id, code = %definition.code, error = %e, "Failed to record achievement progress");
                    }
                }
                continue;
            }

            // Inserting the grant also claims its reward
            let earned_at = Utc::now();
            let granted = self
                .store
                .grant_achievement(UserAchievement {
                    user_id,
                    achievement_code: definition.code.clone(),
                    earned_at,
                    progress: 100,
                    notified: false,
                    rewarded: true,
                })
                .await;
            match granted {
                Ok(true) => {}
                Ok(false) => {
                    debug!(%user_id, code = %definition.code, "Achievement already granted");
                    continue;
                }
                Err(e) if unlocked.is_empty() => return Err(e),
                Err(e) => {
                    warn!(%user_id, code = %definition.code, error = %e, "Grant failed, ending pass early");
                    break;
                }
            }

            let reward = self.apply_reward(user_id, definition).await;
            info!(%user_id, code = %definition.code, xp = definition.xp_reward, "Achievement unlocked");
            unlocked.push(UnlockedAchievement {
                achievement: definition.clone(),
                earned_at,
                reward,
                resumed: false,
            });
        }

        Ok(unlocked)
    }

    /// Pay rewards for grants whose reward never landed
    async fn settle_rewards(
        &self,
        user_id: Uuid,
        definitions: &[AchievementDefinition],
        grants: &[UserAchievement],
    ) -> Vec<UnlockedAchievement> {
        let mut settled = Vec::new();
        for grant in grants.iter().filter(|g| !g.rewarded) {
            let Some(definition) = definitions.iter().find(|d| d.code == grant.achievement_code) else {
                continue;
            };
            match self
                .store
                .set_achievement_rewarded(user_id, &definition.code, true)
                .await
            {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(%user_id, code = %definition.code, error = %e, "Failed to claim pending reward");
                    continue;
                }
            }
            if let Some(reward) = self.apply_reward(user_id, definition).await {
                info!(%user_id, code = %definition.code, xp = definition.xp_reward, "Pending achievement reward settled");
                settled.push(UnlockedAchievement {
                    achievement: definition.clone(),
                    earned_at: grant.earned_at,
                    reward: Some(reward),
                    resumed: true,
                });
            }
        }
        settled
    }

    /// Apply a claimed reward; on failure the claim is released for a later pass
    async fn apply_reward(&self, user_id: Uuid, definition: &AchievementDefinition) -> Option<AddXpOutcome> {
        if definition.xp_reward == 0 {
            return None;
        }
        match self.updater.add_xp(user_id, definition.xp_reward).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(%user_id, code = %definition.code, error = %e, "Achievement reward failed, retrying on next check");
                if let Err(e) = self
                    .store
                    .set_achievement_rewarded(user_id, &definition.code, false)
                    .await
                {
                    error!(%user_id, code = %definition.code, error = %e, "Failed to release reward claim");
                }
                None
            }
        }
    }

    /// Most recent grants first
    pub async fn recent(&self, user_id: Uuid, limit: usize) -> Result<Vec<EarnedAchievement>> {
        let definitions: HashMap<String, AchievementDefinition> = self
            .store
            .active_achievements()
            .await?
            .into_iter()
            .map(|d| (d.code.clone(), d))
            .collect();

        Ok(self
            .store
            .user_achievements(user_id)
            .await?
            .into_iter()
            .filter_map(|grant| {
                definitions.get(&grant.achievement_code).map(|d| EarnedAchievement {
                    code: d.code.clone(),
                    name: d.name.clone(),
                    description: d.description.clone(),
                    xp_reward: d.xp_reward,
                    earned_at: grant.earned_at,
                })
            })
            .take(limit)
            .collect())
    }

    async fn evaluate(
        &self,
        user_id: Uuid,
        criteria: &Criteria,
        stats: &UserStats,
        progression: &UserProgression,
        ctx: &GameContext,
    ) -> Verdict {
        match criteria {
            Criteria::Counter {
                counter,
                threshold,
                track_progress,
            } => {
                let value = counter_value(*counter, stats, progression, ctx);
                Verdict {
                    satisfied: value >= *threshold,
                    progress: track_progress.then(|| progress_pct(value, *threshold)),
                }
            }
            Criteria::SpeedDemon {
                max_avg_seconds,
                min_questions,
            } => Verdict::met(
                ctx.summary.total_questions as u64 >= *min_questions
                    && ctx.avg_seconds().is_some_and(|avg| avg <= *max_avg_seconds),
            ),
            Criteria::Accuracy {
                min_pct,
                min_questions,
            } => {
                let total = ctx.summary.total_questions;
                let satisfied = total > 0
                    && total as u64 >= *min_questions
                    && 100.0 * ctx.summary.correct_answers as f64 / total as f64 >= *min_pct;
                Verdict::met(satisfied)
            }
            Criteria::Level { threshold } => Verdict::met(progression.level >= *threshold),
            Criteria::LeaderboardRank { max_rank, window } => {
                let rank = match (ctx.leaderboard_rank, &self.ranker) {
                    (Some(rank), _) => Some(rank),
                    (None, Some(ranker)) => match ranker.get_user_rank(user_id, *window, None).await {
                        Ok(standing) => standing.rank(),
                        Err(e) => {
                            warn!(%user_id, %window, error = %e, "Rank lookup failed during evaluation");
                            None
                        }
                    },
                    (None, None) => None,
                };
                Verdict::met(rank.is_some_and(|r| r <= *max_rank))
            }
            Criteria::EarlyBird { before_hour } => Verdict::met(ctx.local_hour() < *before_hour),
            Criteria::NightOwl {
                from_hour,
                until_hour,
            } => {
                let hour = ctx.local_hour();
                Verdict::met(hour >= *from_hour && hour < *until_hour)
            }
            Criteria::Comeback { min_days } => {
                let satisfied = activity_before(stats, ctx.occurred_at)
                    .is_some_and(|prev| ctx.occurred_at - prev >= Duration::days(*min_days));
                Verdict::met(satisfied)
            }
        }
    }
}

fn counter_value(counter: Counter, stats: &UserStats, progression: &UserProgression, ctx: &GameContext) -> u64 {
    // The game in `ctx` may not be in `stats` yet; it counts once either way
    match counter {
        Counter::GamesPlayed => stats.games_played.max(1),
        Counter::GamesWon => stats.games_won,
        Counter::PerfectGames => stats.perfect_games.max(ctx.is_perfect() as u64),
        Counter::QuestionsAnswered => stats
            .questions_answered
            .max(ctx.summary.total_questions.max(0) as u64),
        Counter::TotalXp => progression.total_xp,
        Counter::CurrentStreak => stats.current_streak.max(ctx.current_streak.unwrap_or(0)) as u64,
        Counter::MultiplayerGames => stats
            .multiplayer_games
            .max(ctx.is_multiplayer.unwrap_or(false) as u64),
    }
}

fn progress_pct(value: u64, threshold: u64) -> u8 {
    if threshold == 0 {
        return 100;
    }
    (value.saturating_mul(100) / threshold).min(100) as u8
}

/// Last activity strictly before `at`
fn activity_before(stats: &UserStats, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match stats.last_active_at {
        Some(last) if last < at => Some(last),
        _ => stats.previous_active_at.filter(|prev| *prev < at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::catalog::Rarity;
    use crate::progression::{Difficulty, GameStatsDelta, LevelTable};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn definition(code: &str, criteria: Criteria, xp_reward: u64) -> AchievementDefinition {
        AchievementDefinition {
            code: code.to_string(),
            name: code.to_string(),
            description: String::new(),
            criteria,
            rarity: Rarity::Common,
            xp_reward,
            category: "test".to_string(),
            active: true,
        }
    }

    async fn setup(definitions: Vec<AchievementDefinition>) -> (Arc<MemoryStore>, AchievementEvaluator) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_achievement_definitions(definitions).await.unwrap();
        let updater = Arc::new(ProgressionUpdater::new(
            store.clone(),
            Arc::new(LevelTable::seeded()),
        ));
        let evaluator = AchievementEvaluator::new(store.clone(), updater);
        (store, evaluator)
    }

    fn ctx(correct: i64, total: i64) -> GameContext {
        GameContext::new(GameSummary::new(correct, total, Difficulty::Medium))
    }

    #[tokio::test]
    async fn test_grant_is_idempotent_and_rewards_once() {
        let (store, evaluator) = setup(vec![definition(
            "sharp",
            Criteria::Accuracy {
                min_pct: 90.0,
                min_questions: 10,
            },
            60,
        )])
        .await;
        let user = Uuid::new_v4();

        let first = evaluator.check(user, &ctx(10, 10)).await.unwrap();
        let second = evaluator.check(user, &ctx(10, 10)).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(first[0].reward.as_ref().unwrap().total_xp, 60);
        assert_eq!(store.get_progression(user).await.unwrap().unwrap().total_xp, 60);
    }

    #[tokio::test]
    async fn test_failed_reward_settles_on_next_check() {
        let (store, evaluator) = setup(vec![definition(
            "sharp",
            Criteria::Accuracy {
                min_pct: 90.0,
                min_questions: 10,
            },
            60,
        )])
        .await;
        let user = Uuid::new_v4();

        store.set_progression_writes_failing(true);
        let first = evaluator.check(user, &ctx(10, 10)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].reward.is_none());
        let grants = store.user_achievements(user).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert!(!grants[0].rewarded);

        store.set_progression_writes_failing(false);
        let second = evaluator.check(user, &ctx(2, 10)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].resumed);
        assert_eq!(second[0].reward.as_ref().unwrap().total_xp, 60);
        assert!(store.user_achievements(user).await.unwrap()[0].rewarded);

        assert!(evaluator.check(user, &ctx(10, 10)).await.unwrap().is_empty());
        assert_eq!(store.get_progression(user).await.unwrap().unwrap().total_xp, 60);
    }

    #[tokio::test]
    async fn test_context_flags_count_the_current_game() {
        let counter_def = |code: &str, counter| {
            definition(
                code,
                Criteria::Counter {
                    counter,
                    threshold: 1,
                    track_progress: false,
                },
                0,
            )
        };
        let (_, evaluator) = setup(vec![
            counter_def("perfect_1", Counter::PerfectGames),
            counter_def("multi_1", Counter::MultiplayerGames),
            counter_def("played_1", Counter::GamesPlayed),
            counter_def("won_1", Counter::GamesWon),
        ])
        .await;
        let user = Uuid::new_v4();

        // no stats row exists yet for this game
        let mut context = ctx(7, 10);
        context.perfect_game = Some(true);
        context.is_multiplayer = Some(true);
        let codes: HashSet<String> = evaluator
            .check(user, &context)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.achievement.code)
            .collect();
        let expected: HashSet<String> = ["perfect_1", "multi_1", "played_1"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(codes, expected);
    }

    #[tokio::test]
    async fn test_progress_rows_skipped_when_disabled() {
        let (store, evaluator) = setup(vec![definition(
            "answered_100",
            Criteria::Counter {
                counter: Counter::QuestionsAnswered,
                threshold: 100,
                track_progress: true,
            },
            10,
        )])
        .await;
        let evaluator = evaluator.without_progress();
        let user = Uuid::new_v4();

        assert!(evaluator.check(user, &ctx(5, 10)).await.unwrap().is_empty());
        assert!(store.achievement_progress(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counter_progress_tracked() {
        let (store, evaluator) = setup(vec![definition(
            "won_10",
            Criteria::Counter {
                counter: Counter::GamesWon,
                threshold: 10,
                track_progress: true,
            },
            50,
        )])
        .await;
        let user = Uuid::new_v4();
        let delta = GameStatsDelta {
            won: true,
            perfect: false,
            multiplayer: false,
            questions_answered: 10,
            correct_answers: 8,
            score: 80,
            played_at: Utc::now(),
        };
        for _ in 0..3 {
            store.record_game_stats(user, &delta).await.unwrap();
        }

        assert!(evaluator.check(user, &ctx(8, 10)).await.unwrap().is_empty());
        let progress = store.achievement_progress(user).await.unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].progress, 30);
    }

    #[tokio::test]
    async fn test_speed_and_time_of_day() {
        let (_, evaluator) = setup(vec![
            definition(
                "speedy",
                Criteria::SpeedDemon {
                    max_avg_seconds: 5.0,
                    min_questions: 5,
                },
                0,
            ),
            definition("early", Criteria::EarlyBird { before_hour: 6 }, 0),
            definition(
                "owl",
                Criteria::NightOwl {
                    from_hour: 0,
                    until_hour: 4,
                },
                0,
            ),
        ])
        .await;

        // 23:30 UTC is 05:30 at UTC+6
        let mut game = ctx(5, 10).at(Utc.with_ymd_and_hms(2026, 5, 4, 23, 30, 0).unwrap());
        game.time_taken_seconds = Some(40.0);
        game.utc_offset_minutes = 360;

        let codes: Vec<String> = evaluator
            .check(Uuid::new_v4(), &game)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.achievement.code)
            .collect();
        assert_eq!(codes, vec!["speedy".to_string(), "early".to_string()]);
    }

    #[tokio::test]
    async fn test_comeback_uses_previous_activity() {
        let (store, evaluator) = setup(vec![definition("back", Criteria::Comeback { min_days: 14 }, 0)]).await;
        let user = Uuid::new_v4();
        let first = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap();
        for at in [first, later] {
            let delta = GameStatsDelta {
                won: false,
                perfect: false,
                multiplayer: false,
                questions_answered: 5,
                correct_answers: 1,
                score: 10,
                played_at: at,
            };
            store.record_game_stats(user, &delta).await.unwrap();
        }

        let unlocked = evaluator.check(user, &ctx(1, 5).at(later)).await.unwrap();
        assert_eq!(unlocked.len(), 1);
    }

    #[tokio::test]
    async fn test_context_rank_and_level() {
        let (_, evaluator) = setup(vec![
            definition(
                "top10",
                Criteria::LeaderboardRank {
                    max_rank: 10,
                    window: crate::leaderboard::WindowType::Weekly,
                },
                0,
            ),
            definition("lvl5", Criteria::Level { threshold: 5 }, 0),
        ])
        .await;
        let mut game = ctx(3, 10);
        game.leaderboard_rank = Some(4);

        let unlocked = evaluator.check(Uuid::new_v4(), &game).await.unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].achievement.code, "top10");
    }

    #[tokio::test]
    async fn test_rejects_malformed_context() {
        let (_, evaluator) = setup(vec![]).await;
        let err = evaluator.check(Uuid::new_v4(), &ctx(-1, 10)).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let (_, evaluator) = setup(vec![
            definition("a", Criteria::Level { threshold: 1 }, 0),
            definition("b", Criteria::Accuracy { min_pct: 0.0, min_questions: 1 }, 0),
        ])
        .await;
        let user = Uuid::new_v4();
        evaluator.check(user, &ctx(1, 1)).await.unwrap();

        let recent = evaluator.recent(user, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
