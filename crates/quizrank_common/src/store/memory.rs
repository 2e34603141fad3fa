//! In-process reference store.
//!
//! Backs tests and single-instance deployments. Each table sits behind its own
//! lock so writers on different tables never contend; no lock is held across an
//! await point.

use super::ProgressionStore;
use crate::achievements::{AchievementDefinition, AchievementProgress, UserAchievement};
use crate::error::{ProgressionError, Result};
use crate::leaderboard::{CategoryId, LeaderboardDelta, LeaderboardEntry, LeaderboardKey, WindowType};
use crate::progression::{GameStatsDelta, UserProfile, UserProgression, UserStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    profiles: RwLock<HashMap<Uuid, UserProfile>>,
    progressions: RwLock<HashMap<Uuid, UserProgression>>,
    stats: RwLock<HashMap<Uuid, UserStats>>,
    definitions: RwLock<Vec<AchievementDefinition>>,
    grants: RwLock<HashMap<(Uuid, String), UserAchievement>>,
    progress: RwLock<HashMap<(Uuid, String), AchievementProgress>>,
    leaderboard: RwLock<HashMap<LeaderboardKey, LeaderboardEntry>>,
    failing: AtomicBool,
    progression_writes_failing: AtomicBool,
    rejected_windows: RwLock<HashSet<WindowType>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, simulating an unreachable database
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make progression writes fail while reads keep working
    pub fn set_progression_writes_failing(&self, failing: bool) {
        self.progression_writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Reject leaderboard batches touching `window`, simulating a transaction
    /// that aborts partway
    pub fn reject_window(&self, window: WindowType, rejected: bool) {
        if let Ok(mut windows) = self.rejected_windows.write() {
            if rejected {
                windows.insert(window);
            } else {
                windows.remove(&window);
            }
        }
    }

    /// Overwrite a user's statistics row (fixtures and repair tooling)
    pub fn put_stats(&self, stats: UserStats) -> Result<()> {
        self.check()?;
        write(&self.stats)?.insert(stats.user_id, stats);
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProgressionError::store("memory store marked as failing"));
        }
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| ProgressionError::store("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| ProgressionError::store("store lock poisoned"))
}

#[async_trait]
impl ProgressionStore for MemoryStore {
    async fn upsert_profile(&self, profile: UserProfile) -> Result<()> {
        self.check()?;
        write(&self.profiles)?.insert(profile.user_id, profile);
        Ok(())
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        self.check()?;
        Ok(read(&self.profiles)?.get(&user_id).cloned())
    }

    async fn list_user_ids(&self) -> Result<Vec<Uuid>> {
        self.check()?;
        let mut ids: BTreeSet<Uuid> = read(&self.progressions)?.keys().copied().collect();
        ids.extend(read(&self.stats)?.keys().copied());
        Ok(ids.into_iter().collect())
    }

    async fn get_progression(&self, user_id: Uuid) -> Result<Option<UserProgression>> {
        self.check()?;
        Ok(read(&self.progressions)?.get(&user_id).cloned())
    }

    async fn compare_and_swap_progression(
        &self,
        expected_total: Option<u64>,
        next: UserProgression,
    ) -> Result<bool> {
        self.check()?;
        if self.progression_writes_failing.load(Ordering::SeqCst) {
            return Err(ProgressionError::store("progression write failed"));
        }
        let mut rows = write(&self.progressions)?;
        let current = rows.get(&next.user_id).map(|p| p.total_xp);
        if current != expected_total {
            return Ok(false);
        }
        rows.insert(next.user_id, next);
        Ok(true)
    }

    async fn top_progressions(&self, limit: usize) -> Result<Vec<UserProgression>> {
        self.check()?;
        let mut rows: Vec<UserProgression> = read(&self.progressions)?.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.total_xp
                .cmp(&a.total_xp)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_stats(&self, user_id: Uuid) -> Result<Option<UserStats>> {
        self.check()?;
        Ok(read(&self.stats)?.get(&user_id).cloned())
    }

    async fn record_game_stats(&self, user_id: Uuid, delta: &GameStatsDelta) -> Result<UserStats> {
        self.check()?;
        let mut rows = write(&self.stats)?;
        let stats = rows.entry(user_id).or_insert_with(|| UserStats::new(user_id));
        stats.apply_game(delta);
        Ok(stats.clone())
    }

    async fn upsert_achievement_definitions(&self, definitions: Vec<AchievementDefinition>) -> Result<()> {
        self.check()?;
        let mut defs = write(&self.definitions)?;
        for definition in definitions {
            match defs.iter_mut().find(|d| d.code == definition.code) {
                Some(existing) => *existing = definition,
                None => defs.push(definition),
            }
        }
        Ok(())
    }

    async fn active_achievements(&self) -> Result<Vec<AchievementDefinition>> {
        self.check()?;
        Ok(read(&self.definitions)?
            .iter()
            .filter(|d| d.active)
            .cloned()
            .collect())
    }

    async fn user_achievements(&self, user_id: Uuid) -> Result<Vec<UserAchievement>> {
        self.check()?;
        let mut earned: Vec<UserAchievement> = read(&self.grants)?
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect();
        earned.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        Ok(earned)
    }

    async fn grant_achievement(&self, grant: UserAchievement) -> Result<bool> {
        self.check()?;
        let key = (grant.user_id, grant.achievement_code.clone());
        let mut grants = write(&self.grants)?;
        if grants.contains_key(&key) {
            return Ok(false);
        }
        grants.insert(key, grant);
        Ok(true)
    }

    async fn mark_achievement_notified(&self, user_id: Uuid, code: &str) -> Result<()> {
        self.check()?;
        if let Some(grant) = write(&self.grants)?.get_mut(&(user_id, code.to_string())) {
            grant.notified = true;
        }
        Ok(())
    }

    async fn set_achievement_rewarded(&self, user_id: Uuid, code: &str, rewarded: bool) -> Result<bool> {
        self.check()?;
        match write(&self.grants)?.get_mut(&(user_id, code.to_string())) {
            Some(grant) if grant.rewarded != rewarded => {
                grant.rewarded = rewarded;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_achievement_progress(&self, progress: AchievementProgress) -> Result<()> {
        self.check()?;
        let key = (progress.user_id, progress.achievement_code.clone());
        write(&self.progress)?.insert(key, progress);
        Ok(())
    }

    async fn achievement_progress(&self, user_id: Uuid) -> Result<Vec<AchievementProgress>> {
        self.check()?;
        Ok(read(&self.progress)?
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn increment_leaderboards(
        &self,
        rows: &[(LeaderboardKey, DateTime<Utc>)],
        delta: LeaderboardDelta,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.check()?;
        {
            let rejected = read(&self.rejected_windows)?;
            if let Some((key, _)) = rows.iter().find(|(k, _)| rejected.contains(&k.window)) {
                return Err(ProgressionError::store(format!(
                    "leaderboard write rejected for window {}",
                    key.window
                )));
            }
        }

        let now = Utc::now();
        let mut table = write(&self.leaderboard)?;
        Ok(rows
            .iter()
            .map(|(key, period_end)| {
                let row = table
                    .entry(*key)
                    .or_insert_with(|| LeaderboardEntry::new(key, *period_end, now));
                row.apply(&delta, now);
                row.clone()
            })
            .collect())
    }

    async fn leaderboard_rows(
        &self,
        window: WindowType,
        category_id: Option<CategoryId>,
        period_start: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.check()?;
        Ok(read(&self.leaderboard)?
            .values()
            .filter(|r| {
                r.window == window && r.category_id == category_id && r.period_start == period_start
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::LevelTable;

    #[tokio::test]
    async fn test_cas_rejects_stale_expectation() {
        let store = MemoryStore::new();
        let table = LevelTable::seeded();
        let user = Uuid::new_v4();

        assert!(store
            .compare_and_swap_progression(None, UserProgression::from_total(user, 50, &table))
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap_progression(None, UserProgression::from_total(user, 90, &table))
            .await
            .unwrap());
        assert!(store
            .compare_and_swap_progression(Some(50), UserProgression::from_total(user, 90, &table))
            .await
            .unwrap());
        assert_eq!(store.get_progression(user).await.unwrap().unwrap().total_xp, 90);
    }

    #[tokio::test]
    async fn test_grant_is_insert_if_absent() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let grant = UserAchievement {
            user_id: user,
            achievement_code: "first_game".into(),
            earned_at: Utc::now(),
            progress: 100,
            notified: false,
            rewarded: false,
        };
        assert!(store.grant_achievement(grant.clone()).await.unwrap());
        assert!(!store.grant_achievement(grant).await.unwrap());
        assert_eq!(store.user_achievements(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reward_claim_is_exclusive() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store
            .grant_achievement(UserAchievement {
                user_id: user,
                achievement_code: "first_win".into(),
                earned_at: Utc::now(),
                progress: 100,
                notified: false,
                rewarded: false,
            })
            .await
            .unwrap();

        assert!(store.set_achievement_rewarded(user, "first_win", true).await.unwrap());
        assert!(!store.set_achievement_rewarded(user, "first_win", true).await.unwrap());
        assert!(store.set_achievement_rewarded(user, "first_win", false).await.unwrap());
        assert!(!store.set_achievement_rewarded(user, "missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_leaderboard_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let start = Utc::now();
        let rows: Vec<(LeaderboardKey, DateTime<Utc>)> = WindowType::ALL
            .into_iter()
            .map(|window| {
                let key = LeaderboardKey {
                    user_id: user,
                    window,
                    category_id: None,
                    period_start: start,
                };
                (key, start)
            })
            .collect();
        let delta = LeaderboardDelta {
            score: 10,
            xp_earned: 5,
            games_played: 1,
        };

        store.reject_window(WindowType::Monthly, true);
        assert!(store.increment_leaderboards(&rows, delta).await.is_err());
        for window in WindowType::ALL {
            assert!(store.leaderboard_rows(window, None, start).await.unwrap().is_empty());
        }

        store.reject_window(WindowType::Monthly, false);
        assert_eq!(store.increment_leaderboards(&rows, delta).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failing_store_surfaces_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let err = store.get_progression(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProgressionError::Store(_)));
    }
}
