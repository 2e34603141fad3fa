//! Progression straight against the store, without the cache or push
//! notifications. Achievements are evaluated from stored stats and the game
//! context only: no rank lookups and no partial-progress rows.

use super::{unchanged, CompletedGame, GameOutcome, ProgressionService, ProgressionView, RECENT_ACHIEVEMENTS};
use crate::achievements::{AchievementEvaluator, GameContext, UnlockedAchievement};
use crate::error::Result;
use crate::leaderboard::{CategoryId, LeaderboardDelta, LeaderboardPage, LeaderboardRanker, TopPlayer, UserRank, WindowType};
use crate::progression::{AddXpOutcome, GameSummary, ProgressionUpdater, XpAward, XpCalculator};
use crate::store::ProgressionStore;
use crate::sync::UserStatsSnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct SimpleService {
    store: Arc<dyn ProgressionStore>,
    updater: Arc<ProgressionUpdater>,
    calculator: XpCalculator,
    evaluator: AchievementEvaluator,
    ranker: Arc<LeaderboardRanker>,
}

impl SimpleService {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        updater: Arc<ProgressionUpdater>,
        calculator: XpCalculator,
        ranker: Arc<LeaderboardRanker>,
    ) -> Self {
        let evaluator = AchievementEvaluator::new(Arc::clone(&store), Arc::clone(&updater)).without_progress();
        Self {
            store,
            updater,
            calculator,
            evaluator,
            ranker,
        }
    }
}

#[async_trait]
impl ProgressionService for SimpleService {
    async fn get_user_progression(&self, user_id: Uuid) -> Result<ProgressionView> {
        let progression = self.updater.get(user_id).await?;
        let recent = self.evaluator.recent(user_id, RECENT_ACHIEVEMENTS).await?;
        Ok(ProgressionView::new(progression, recent))
    }

    fn calculate_xp(&self, summary: &GameSummary) -> Result<XpAward> {
        self.calculator.calculate(summary)
    }

    async fn add_xp(&self, user_id: Uuid, earned_xp: u64) -> Result<AddXpOutcome> {
        self.updater.add_xp(user_id, earned_xp).await
    }

    async fn check_achievements(&self, user_id: Uuid, ctx: &GameContext) -> Result<Vec<UnlockedAchievement>> {
        self.evaluator.check(user_id, ctx).await
    }

    async fn record_game(&self, game: CompletedGame) -> Result<GameOutcome> {
        game.summary.validate()?;
        let user_id = game.user_id;

        let stats = self.store.record_game_stats(user_id, &game.stats_delta()).await?;
        let xp = self.calculator.calculate(&game.xp_summary(&stats))?;
        let progression = if xp.earned_xp > 0 {
            self.updater.add_xp(user_id, xp.earned_xp).await?
        } else {
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

        let achievements = self.evaluator.check(user_id, &game.context(&stats)).await?;

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
        UserStatsSnapshot::compute(&*self.store, self.updater.table(), user_id).await
    }

    async fn get_leaderboard(
        &self,
        window: &str,
        category_id: Option<CategoryId>,
        limit: usize,
        offset: usize,
    ) -> Result<LeaderboardPage> {
        self.ranker
            .get_leaderboard(WindowType::parse(window)?, category_id, limit, offset)
            .await
    }

    async fn get_user_rank(&self, user_id: Uuid, window: &str, category_id: Option<CategoryId>) -> Result<UserRank> {
        self.ranker
            .get_user_rank(user_id, WindowType::parse(window)?, category_id)
            .await
    }

    async fn get_top_players(&self, limit: usize) -> Result<Vec<TopPlayer>> {
        self.ranker.get_top_players(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::seeded_catalog;
    use crate::cache::CacheLayer;
    use crate::config::{CacheConfig, XpConfig};
    use crate::progression::{Difficulty, LevelTable};
    use crate::store::MemoryStore;

    async fn service() -> (Arc<MemoryStore>, SimpleService) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_achievement_definitions(seeded_catalog()).await.unwrap();
        let table = Arc::new(LevelTable::seeded());
        let cache = Arc::new(CacheLayer::local_only(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        }));
        let updater = Arc::new(ProgressionUpdater::new(store.clone(), table.clone()));
        let ranker = Arc::new(LeaderboardRanker::new(store.clone(), cache, table));
        let service = SimpleService::new(store.clone(), updater, XpCalculator::new(XpConfig::default()), ranker);
        (store, service)
    }

    #[tokio::test]
    async fn test_record_game_grants_achievements() {
        let (store, service) = service().await;
        let user = Uuid::new_v4();
        let mut game = CompletedGame::new(user, GameSummary::new(10, 10, Difficulty::Easy), 100);
        game.won = true;

        let outcome = service.record_game(game).await.unwrap();
        // 10 * 10 * 1.0 * 1.5 perfect
        assert_eq!(outcome.xp.earned_xp, 150);
        assert_eq!(outcome.progression.level, 2);
        let codes: Vec<&str> = outcome.achievements.iter().map(|u| u.achievement.code.as_str()).collect();
        assert!(codes.contains(&"first_game"));
        assert!(codes.contains(&"perfect_game"));
        assert_eq!(store.user_achievements(user).await.unwrap().len(), codes.len());
        // no rows for trackable counters
        assert!(store.achievement_progress(user).await.unwrap().is_empty());

        let rewards: u64 = outcome.achievements.iter().map(|u| u.achievement.xp_reward).sum();
        let view = service.get_user_progression(user).await.unwrap();
        assert_eq!(view.total_xp, 150 + rewards);
        assert_eq!(view.recent_achievements.len(), codes.len().min(RECENT_ACHIEVEMENTS));
    }

    #[tokio::test]
    async fn test_stats_read_through() {
        let (_, service) = service().await;
        let user = Uuid::new_v4();
        for _ in 0..2 {
            service
                .record_game(CompletedGame::new(user, GameSummary::new(5, 10, Difficulty::Medium), 40))
                .await
                .unwrap();
        }
        let stats = service.get_user_stats(user).await.unwrap();
        assert_eq!((stats.games_played, stats.total_score), (2, 80));
        assert_eq!(stats.accuracy_pct, 50.0);
    }

    #[tokio::test]
    async fn test_leaderboard_pages() {
        let (_, service) = service().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        service
            .record_game(CompletedGame::new(a, GameSummary::new(3, 10, Difficulty::Easy), 30))
            .await
            .unwrap();
        service
            .record_game(CompletedGame::new(b, GameSummary::new(8, 10, Difficulty::Easy), 80))
            .await
            .unwrap();

        let page = service.get_leaderboard("all_time", None, 10, 0).await.unwrap();
        let order: Vec<Uuid> = page.entries.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![b, a]);
        assert_eq!(service.get_user_rank(a, "all_time", None).await.unwrap().rank(), Some(2));
        assert!(service.get_leaderboard("all_time", None, 0, 0).await.is_err());
    }
}
