//! Authoritative store contract.
//!
//! The relational engine behind this trait is an external collaborator. Every
//! method that mutates shared aggregates is atomic at the row level:
//! - progression rows change only through compare-and-swap
//! - statistics and leaderboard rows change through in-store increments
//! - achievement grants are insert-if-absent on the (user, code) pair
//! - one game's leaderboard rows change in a single transaction

pub mod memory;

pub use memory::MemoryStore;

use crate::achievements::{AchievementDefinition, AchievementProgress, UserAchievement};
use crate::error::Result;
use crate::leaderboard::{CategoryId, LeaderboardDelta, LeaderboardEntry, LeaderboardKey, WindowType};
use crate::progression::{GameStatsDelta, UserProfile, UserProgression, UserStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ProgressionStore: Send + Sync {
    // Users

    async fn upsert_profile(&self, profile: UserProfile) -> Result<()>;

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Every user that has a progression or statistics row
    async fn list_user_ids(&self) -> Result<Vec<Uuid>>;

    // Progression

    async fn get_progression(&self, user_id: Uuid) -> Result<Option<UserProgression>>;

    /// Store `next` only if the current total equals `expected_total`
    /// (`None` means "no row yet"). Returns false when another writer won.
    async fn compare_and_swap_progression(
        &self,
        expected_total: Option<u64>,
        next: UserProgression,
    ) -> Result<bool>;

    /// Highest total XP first, ties by user id
    async fn top_progressions(&self, limit: usize) -> Result<Vec<UserProgression>>;

    // Statistics

    async fn get_stats(&self, user_id: Uuid) -> Result<Option<UserStats>>;

    /// Atomically apply one game to the user's counters
    async fn record_game_stats(&self, user_id: Uuid, delta: &GameStatsDelta) -> Result<UserStats>;

    // Achievements

    async fn upsert_achievement_definitions(&self, definitions: Vec<AchievementDefinition>) -> Result<()>;

    async fn active_achievements(&self) -> Result<Vec<AchievementDefinition>>;

    async fn user_achievements(&self, user_id: Uuid) -> Result<Vec<UserAchievement>>;

    /// Insert-if-absent. Returns false when the pair already exists.
    async fn grant_achievement(&self, grant: UserAchievement) -> Result<bool>;

    async fn mark_achievement_notified(&self, user_id: Uuid, code: &str) -> Result<()>;

    /// Set the grant's `rewarded` flag. Returns false when the flag already
    /// had that value (or no grant exists), so setting it to true doubles as
    /// an exclusive claim on paying the reward.
    async fn set_achievement_rewarded(&self, user_id: Uuid, code: &str, rewarded: bool) -> Result<bool>;

    async fn set_achievement_progress(&self, progress: AchievementProgress) -> Result<()>;

    async fn achievement_progress(&self, user_id: Uuid) -> Result<Vec<AchievementProgress>>;

    // Leaderboards

    /// Add `delta` to every `(key, period_end)` row, creating absent rows, in
    /// one transaction: either all rows change or none do.
    async fn increment_leaderboards(
        &self,
        rows: &[(LeaderboardKey, DateTime<Utc>)],
        delta: LeaderboardDelta,
    ) -> Result<Vec<LeaderboardEntry>>;

    async fn leaderboard_rows(
        &self,
        window: WindowType,
        category_id: Option<CategoryId>,
        period_start: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>>;
}
