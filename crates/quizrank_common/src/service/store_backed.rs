//! Full progression pipeline: cached reads, achievements, leaderboards and
//! real-time notifications.

use super::{unchanged, CompletedGame, GameOutcome, ProgressionService, ProgressionView, RECENT_ACHIEVEMENTS};
use crate::achievements::{AchievementEvaluator, GameContext, UnlockedAchievement};
use crate::cache::keys::{progression_key, stats_key};
use crate::cache::CacheLayer;
use crate::error::Result;
use crate::leaderboard::{CategoryId, LeaderboardDelta, LeaderboardPage, LeaderboardRanker, TopPlayer, UserRank, WindowType};
use crate::notifier::{AchievementSummary, Notifier, ServerEvent};
use crate::progression::{AddXpOutcome, GameSummary, ProgressionUpdater, UserProgression, XpAward, XpCalculator};
use crate::store::ProgressionStore;
use crate::sync::UserStatsSnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct StoreBackedService {
    store: Arc<dyn ProgressionStore>,
    updater: Arc<ProgressionUpdater>,
    calculator: XpCalculator,
    evaluator: AchievementEvaluator,
    ranker: Arc<LeaderboardRanker>,
    cache: Arc<CacheLayer>,
    notifier: Arc<Notifier>,
}

impl StoreBackedService {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        updater: Arc<ProgressionUpdater>,
        calculator: XpCalculator,
        ranker: Arc<LeaderboardRanker>,
        cache: Arc<CacheLayer>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let evaluator = AchievementEvaluator::new(Arc::clone(&store), Arc::clone(&updater))
            .with_ranker(Arc::clone(&ranker));
        Self {
            store,
            updater,
            calculator,
            evaluator,
            ranker,
            cache,
            notifier,
        }
    }

    async fn username(&self, user_id: Uuid) -> String {
        match self.store.get_profile(user_id).await {
            Ok(Some(profile)) => profile.username,
            Ok(None) => format!("player-{}", user_id.simple()),
            Err(e) => {
                warn!(%user_id, error = %e, "Profile lookup failed");
                "player".to_string()
            }
        }
    }

    async fn invalidate_user(&self, user_id: Uuid) {
        self.cache.delete(&progression_key(user_id)).await;
        self.cache.delete(&stats_key(user_id)).await;
    }

    /// Cache invalidation and push events after a progression write
    async fn publish_progress(&self, user_id: Uuid, outcome: &AddXpOutcome) {
        self.invalidate_user(user_id).await;

        self.notifier
            .notify_user(
                user_id,
                ServerEvent::ProgressionUpdate {
                    total_xp: outcome.total_xp,
                    level: outcome.level,
                    earned_xp: outcome.earned_xp,
                },
            )
            .await;

        if !outcome.leveled_up {
            return;
        }
        self.notifier
            .notify_user(
                user_id,
                ServerEvent::LevelUp {
                    level: outcome.level,
                    previous_level: outcome.previous_level,
                    title: outcome.title.clone(),
                },
            )
            .await;

        let milestone = (outcome.previous_level + 1..=outcome.level).any(|l| self.notifier.is_level_milestone(l));
        if milestone {
            let username = self.username(user_id).await;
            self.notifier
                .broadcast_global(ServerEvent::GlobalLevelUp {
                    user_id,
                    username,
                    new_level: outcome.level,
                })
                .await;
        }
    }

    async fn publish_unlocks(&self, user_id: Uuid, unlocked: &[UnlockedAchievement]) {
        for unlock in unlocked {
            if unlock.resumed {
                // announced when granted; only the late reward is new
                if let Some(reward) = &unlock.reward {
                    self.publish_progress(user_id, reward).await;
                }
                continue;
            }
            let delivered = self
                .notifier
                .notify_user(
                    user_id,
                    ServerEvent::AchievementUnlocked {
                        achievement: AchievementSummary::from(&unlock.achievement),
                    },
                )
                .await;
            if delivered > 0 {
                if let Err(e) = self
                    .store
                    .mark_achievement_notified(user_id, &unlock.achievement.code)
                    .await
                {
                    warn!(%user_id, code = %unlock.achievement.code, error = %e, "Failed to mark achievement notified");
                }
            }
            if let Some(reward) = &unlock.reward {
                self.publish_progress(user_id, reward).await;
            }
        }
    }

    async fn current_progression(&self, user_id: Uuid) -> Result<UserProgression> {
        let updater = Arc::clone(&self.updater);
        self.cache
            .get_with_refresh(
                &progression_key(user_id),
                self.cache.config().progression_ttl(),
                move || async move { updater.get(user_id).await },
            )
            .await
    }
}

#[async_trait]
impl ProgressionService for StoreBackedService {
    async fn get_user_progression(&self, user_id: Uuid) -> Result<ProgressionView> {
        let progression = self.current_progression(user_id).await?;
        let recent = self.evaluator.recent(user_id, RECENT_ACHIEVEMENTS).await?;
        Ok(ProgressionView::new(progression, recent))
    }

    fn calculate_xp(&self, summary: &GameSummary) -> Result<XpAward> {
        self.calculator.calculate(summary)
    }

    async fn add_xp(&self, user_id: Uuid, earned_xp: u64) -> Result<AddXpOutcome> {
        let outcome = self.updater.add_xp(user_id, earned_xp).await?;
        self.publish_progress(user_id, &outcome).await;
        Ok(outcome)
    }

    async fn check_achievements(&self, user_id: Uuid, ctx: &GameContext) -> Result<Vec<UnlockedAchievement>> {
        let unlocked = self.evaluator.check(user_id, ctx).await?;
        self.publish_unlocks(user_id, &unlocked).await;
        Ok(unlocked)
    }

    async fn record_game(&self, game: CompletedGame) -> Result<GameOutcome> {
        game.summary.validate()?;
        let user_id = game.user_id;

        let stats = self.store.record_game_stats(user_id, &game.stats_delta()).await?;
        let xp = self.calculator.calculate(&game.xp_summary(&stats))?;
        let progression = if xp.earned_xp > 0 {
            self.add_xp(user_id, xp.earned_xp).await?
        } else {
            self.invalidate_user(user_id).await;
            unchanged(&self.updater.get(user_id).await?)
        };

        let rows = self
            .ranker
            .record_game(
                user_id,
                game.category_id,
                LeaderboardDelta {
                    score: game.score,
                    xp_earned: xp.earned_xp,
                    games_played: 1,
                },
                game.played_at,
            )
            .await?;

        let achievements = self.check_achievements(user_id, &game.context(&stats)).await?;

        let username = self.username(user_id).await;
        self.notifier
            .broadcast_global(ServerEvent::GlobalQuizComplete {
                user_id,
                username: username.clone(),
                score: game.score,
                category: game.category_id,
            })
            .await;

        let first_game_today = stats
            .previous_active_at
            .map_or(true, |prev| prev.date_naive() != game.played_at.date_naive());
        if first_game_today && self.notifier.is_streak_milestone(stats.current_streak) {
            self.notifier
                .broadcast_global(ServerEvent::GlobalStreak {
                    user_id,
                    username,
                    streak: stats.current_streak,
                })
                .await;
        }

        info!(
            %user_id,
            earned_xp = xp.earned_xp,
            level = progression.level,
            unlocked = achievements.len(),
            "Game recorded"
        );
        Ok(GameOutcome {
            xp,
            progression,
            achievements,
            stats,
            leaderboard_rows: rows.len(),
        })
    }

    async fn get_user_stats(&self, user_id: Uuid) -> Result<UserStatsSnapshot> {
        let store = Arc::clone(&self.store);
        let table = self.updater.table_handle();
        debug!(%user_id, "Reading statistics snapshot");
        self.cache
            .get_with_refresh(
                &stats_key(user_id),
                self.cache.config().stats_ttl(),
                move || async move { UserStatsSnapshot::compute(&*store, &table, user_id).await },
            )
            .await
    }

    async fn get_leaderboard(
        &self,
        window: &str,
        category_id: Option<CategoryId>,
        limit: usize,
        offset: usize,
    ) -> Result<LeaderboardPage> {
        let window = WindowType::parse(window)?;
        self.ranker.get_leaderboard(window, category_id, limit, offset).await
    }

    async fn get_user_rank(&self, user_id: Uuid, window: &str, category_id: Option<CategoryId>) -> Result<UserRank> {
        let window = WindowType::parse(window)?;
        self.ranker.get_user_rank(user_id, window, category_id).await
    }

    async fn get_top_players(&self, limit: usize) -> Result<Vec<TopPlayer>> {
        self.ranker.get_top_players(limit).await
    }
}
