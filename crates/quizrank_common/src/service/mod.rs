//! Progression service
//!
//! The operations a thin API layer calls. Two implementations exist and one is
//! chosen at startup from `service.mode`:
//! - `StoreBackedService`: cache, achievements, leaderboards and notifications
//! - `SimpleService`: XP, levels, achievements and leaderboards straight
//!   against the store, with no cache and no push notifications
//!
//! `Services` owns every long-lived component and their lifecycle.

pub mod simple;
pub mod store_backed;

pub use simple::SimpleService;
pub use store_backed::StoreBackedService;

use crate::achievements::{seeded_catalog, EarnedAchievement, GameContext, UnlockedAchievement};
use crate::cache::{CacheLayer, SharedCacheStore};
use crate::config::{CacheConfig, QuizRankConfig, ServiceMode};
use crate::error::Result;
use crate::leaderboard::{CategoryId, LeaderboardPage, LeaderboardRanker, TopPlayer, UserRank};
use crate::notifier::Notifier;
use crate::progression::{
    AddXpOutcome, GameStatsDelta, GameSummary, LevelTable, ProgressionUpdater, UserProgression, UserStats,
    XpAward, XpCalculator,
};
use crate::store::ProgressionStore;
use crate::supervisor::{BackoffConfig, Supervisor};
use crate::sync::{SyncReconciler, UserStatsSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// Achievements listed with a progression read
pub const RECENT_ACHIEVEMENTS: usize = 5;

/// Progression read model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionView {
    pub user_id: Uuid,
    pub level: u32,
    pub total_xp: u64,
    pub current_level_xp: u64,
    pub title: String,
    pub level_progress: f64,
    pub recent_achievements: Vec<EarnedAchievement>,
}

impl ProgressionView {
    fn new(progression: UserProgression, recent_achievements: Vec<EarnedAchievement>) -> Self {
        Self {
            user_id: progression.user_id,
            level: progression.level,
            total_xp: progression.total_xp,
            current_level_xp: progression.current_level_xp,
            title: progression.title,
            level_progress: progression.level_progress,
            recent_achievements,
        }
    }
}

/// A finished game as reported by the game server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedGame {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub summary: GameSummary,
    pub score: u64,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub won: bool,
    #[serde(default)]
    pub is_multiplayer: bool,
    #[serde(default)]
    pub time_taken_seconds: Option<f64>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "Utc::now")]
    pub played_at: DateTime<Utc>,
}

impl CompletedGame {
    pub fn new(user_id: Uuid, summary: GameSummary, score: u64) -> Self {
        Self {
            user_id,
            summary,
            score,
            category_id: None,
            won: false,
            is_multiplayer: false,
            time_taken_seconds: None,
            utc_offset_minutes: 0,
            played_at: Utc::now(),
        }
    }

    pub fn is_perfect(&self) -> bool {
        self.summary.is_perfect_game.unwrap_or(
            self.summary.total_questions > 0 && self.summary.correct_answers == self.summary.total_questions,
        )
    }

    fn stats_delta(&self) -> GameStatsDelta {
        GameStatsDelta {
            won: self.won,
            perfect: self.is_perfect(),
            multiplayer: self.is_multiplayer,
            questions_answered: self.summary.total_questions.max(0) as u64,
            correct_answers: self.summary.correct_answers.max(0) as u64,
            score: self.score,
            played_at: self.played_at,
        }
    }

    /// Summary used for XP: flags the caller left unset are filled in from
    /// the game and the user's updated statistics
    fn xp_summary(&self, stats: &UserStats) -> GameSummary {
        let mut summary = self.summary.clone();
        if summary.is_perfect_game.is_none() {
            summary.is_perfect_game = Some(self.is_perfect());
        }
        if summary.avg_time_per_question.is_none() {
            summary.avg_time_per_question = self
                .time_taken_seconds
                .filter(|_| summary.total_questions > 0)
                .map(|t| t / summary.total_questions as f64);
        }
        if summary.has_active_streak.is_none() {
            summary.has_active_streak = Some(stats.current_streak >= 2);
        }
        summary
    }

    fn context(&self, stats: &UserStats) -> GameContext {
        let mut ctx = GameContext::new(self.summary.clone()).at(self.played_at);
        ctx.perfect_game = Some(self.is_perfect());
        ctx.time_taken_seconds = self.time_taken_seconds;
        ctx.current_streak = Some(stats.current_streak);
        ctx.is_multiplayer = Some(self.is_multiplayer);
        ctx.category_id = self.category_id;
        ctx.utc_offset_minutes = self.utc_offset_minutes;
        ctx
    }
}

/// Everything one completed game changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOutcome {
    pub xp: XpAward,
    pub progression: AddXpOutcome,
    pub achievements: Vec<UnlockedAchievement>,
    pub stats: UserStats,
    pub leaderboard_rows: usize,
}

#[async_trait]
pub trait ProgressionService: Send + Sync {
    async fn get_user_progression(&self, user_id: Uuid) -> Result<ProgressionView>;

    fn calculate_xp(&self, summary: &GameSummary) -> Result<XpAward>;

    async fn add_xp(&self, user_id: Uuid, earned_xp: u64) -> Result<AddXpOutcome>;

    async fn check_achievements(&self, user_id: Uuid, ctx: &GameContext) -> Result<Vec<UnlockedAchievement>>;

    /// Statistics, XP, leaderboards and achievements for one finished game
    async fn record_game(&self, game: CompletedGame) -> Result<GameOutcome>;

    async fn get_user_stats(&self, user_id: Uuid) -> Result<UserStatsSnapshot>;

    async fn get_leaderboard(
        &self,
        window: &str,
        category_id: Option<CategoryId>,
        limit: usize,
        offset: usize,
    ) -> Result<LeaderboardPage>;

    async fn get_user_rank(&self, user_id: Uuid, window: &str, category_id: Option<CategoryId>) -> Result<UserRank>;

    async fn get_top_players(&self, limit: usize) -> Result<Vec<TopPlayer>>;
}

/// Outcome for a game that earned no XP
fn unchanged(progression: &UserProgression) -> AddXpOutcome {
    AddXpOutcome {
        total_xp: progression.total_xp,
        earned_xp: 0,
        level: progression.level,
        leveled_up: false,
        previous_level: progression.level,
        title: progression.title.clone(),
        current_level_xp: progression.current_level_xp,
        level_progress: progression.level_progress,
    }
}

/// Long-lived components, built once at startup
pub struct Services {
    pub config: QuizRankConfig,
    pub store: Arc<dyn ProgressionStore>,
    pub table: Arc<LevelTable>,
    pub cache: Arc<CacheLayer>,
    pub notifier: Arc<Notifier>,
    pub ranker: Arc<LeaderboardRanker>,
    pub reconciler: Arc<SyncReconciler>,
    pub supervisor: Supervisor,
    pub progression: Arc<dyn ProgressionService>,
    warm_interval: watch::Sender<Duration>,
}

impl Services {
    pub fn build(
        config: QuizRankConfig,
        store: Arc<dyn ProgressionStore>,
        shared_cache: Option<Arc<dyn SharedCacheStore>>,
    ) -> Result<Self> {
        config.validate()?;
        let table = Arc::new(config.leveling.table()?);
        let cache = Arc::new(CacheLayer::new(shared_cache, config.cache.clone()));
        let notifier = Arc::new(Notifier::new(config.notifier.clone()));
        let updater = Arc::new(ProgressionUpdater::new(Arc::clone(&store), Arc::clone(&table)));
        let calculator = XpCalculator::new(config.xp.clone());

        // Simple mode reads leaderboards straight from the store and pushes nothing
        let ranker = Arc::new(match config.service.mode {
            ServiceMode::StoreBacked => {
                LeaderboardRanker::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&table))
                    .with_notifier(Arc::clone(&notifier))
            }
            ServiceMode::Simple => {
                let uncached = CacheLayer::local_only(CacheConfig {
                    enabled: false,
                    ..config.cache.clone()
                });
                LeaderboardRanker::new(Arc::clone(&store), Arc::new(uncached), Arc::clone(&table))
            }
        });
        let reconciler = Arc::new(SyncReconciler::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&table),
            config.sync.clone(),
        ));

        let progression: Arc<dyn ProgressionService> = match config.service.mode {
            ServiceMode::StoreBacked => Arc::new(StoreBackedService::new(
                Arc::clone(&store),
                updater,
                calculator,
                Arc::clone(&ranker),
                Arc::clone(&cache),
                Arc::clone(&notifier),
            )),
            ServiceMode::Simple => Arc::new(SimpleService::new(
                Arc::clone(&store),
                updater,
                calculator,
                Arc::clone(&ranker),
            )),
        };
        info!(mode = ?config.service.mode, levels = table.max_level(), "Progression services built");

        let (warm_interval, _) = watch::channel(config.cache.warm_interval());
        Ok(Self {
            config,
            store,
            table,
            cache,
            notifier,
            ranker,
            reconciler,
            supervisor: Supervisor::new(BackoffConfig::default()),
            progression,
            warm_interval,
        })
    }

    /// Load the seeded achievement catalog into the store
    pub async fn seed_catalog(&self) -> Result<usize> {
        let catalog = seeded_catalog();
        let count = catalog.len();
        self.store.upsert_achievement_definitions(catalog).await?;
        info!(count, "Achievement catalog loaded");
        Ok(count)
    }

    /// Start the reconciler and cache warmer under supervision
    pub async fn start_background(&self) {
        if self.config.sync.enabled {
            let reconciler = Arc::clone(&self.reconciler);
            self.supervisor
                .spawn_periodic("sync_reconciler", self.reconciler.interval_watch(), move || {
                    let reconciler = Arc::clone(&reconciler);
                    async move { reconciler.run_scheduled().await }
                })
                .await;
        }

        let warmable = self.config.service.mode == ServiceMode::StoreBacked;
        if warmable && self.config.cache.enabled && self.config.cache.warm_enabled {
            let ranker = Arc::clone(&self.ranker);
            self.supervisor
                .spawn_periodic("cache_warmer", self.warm_interval.subscribe(), move || {
                    let ranker = Arc::clone(&ranker);
                    async move { ranker.warm().await.map(|_| ()) }
                })
                .await;
        }
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        info!("Background tasks stopped");
    }
}
