//! Sync Reconciler
//!
//! Detects drift between cached per-user entries and values recomputed from
//! the authoritative store. The fresh value always wins: a conflicting stats
//! snapshot is invalidated and rewritten, a conflicting progression entry is
//! invalidated, and each conflict is appended to a bounded log.
//!
//! Level must match exactly. Numeric fields conflict when
//! `|fresh - cached| / max(|cached|, 1)` exceeds the configured tolerance.

use crate::cache::keys::{progression_key, stats_key};
use crate::cache::CacheLayer;
use crate::config::{SyncConfig, MIN_SYNC_INTERVAL_SECS};
use crate::error::{ProgressionError, Result};
use crate::progression::{LevelTable, UserProgression, UserStats};
use crate::store::ProgressionStore;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cached per-user aggregate served by `get_user_stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsSnapshot {
    pub user_id: Uuid,
    pub total_xp: u64,
    pub level: u32,
    pub title: String,
    pub games_played: u64,
    pub games_won: u64,
    pub perfect_games: u64,
    pub total_score: u64,
    pub accuracy_pct: f64,
    pub current_streak: u32,
    pub best_streak: u32,
    pub achievements: u64,
    pub computed_at: DateTime<Utc>,
}

impl UserStatsSnapshot {
    /// Recompute from the authoritative store
    pub async fn compute(store: &dyn ProgressionStore, table: &LevelTable, user_id: Uuid) -> Result<Self> {
        let total_xp = store
            .get_progression(user_id)
            .await?
            .map(|p| p.total_xp)
            .unwrap_or(0);
        let stats = store
            .get_stats(user_id)
            .await?
            .unwrap_or_else(|| UserStats::new(user_id));
        let achievements = store.user_achievements(user_id).await?.len() as u64;
        let level = table.snapshot(total_xp);

        Ok(Self {
            user_id,
            total_xp,
            level: level.level,
            title: level.title,
            games_played: stats.games_played,
            games_won: stats.games_won,
            perfect_games: stats.perfect_games,
            total_score: stats.total_score,
            accuracy_pct: stats.accuracy_pct(),
            current_streak: stats.current_streak,
            best_streak: stats.best_streak,
            achievements,
            computed_at: Utc::now(),
        })
    }
}

/// One detected divergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub user_id: Uuid,
    pub field: String,
    pub cached: f64,
    pub fresh: f64,
    pub drift: f64,
    pub detected_at: DateTime<Utc>,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub users_checked: usize,
    pub cache_misses: usize,
    pub conflicts: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another run was in progress
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub in_progress: bool,
    pub interval_secs: u64,
    pub last_run: Option<SyncReport>,
    pub last_error: Option<String>,
    /// Records currently in the log
    pub conflict_count: usize,
    /// Conflicts detected since startup
    pub total_conflicts: u64,
}

pub struct SyncReconciler {
    store: Arc<dyn ProgressionStore>,
    cache: Arc<CacheLayer>,
    table: Arc<LevelTable>,
    config: SyncConfig,
    in_progress: AtomicBool,
    interval: watch::Sender<Duration>,
    last_run: RwLock<Option<SyncReport>>,
    last_error: RwLock<Option<String>>,
    conflicts: Mutex<VecDeque<ConflictRecord>>,
    total_conflicts: AtomicU64,
}

/// Clears the in-progress flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        cache: Arc<CacheLayer>,
        table: Arc<LevelTable>,
        config: SyncConfig,
    ) -> Self {
        let (interval, _) = watch::channel(config.interval());
        Self {
            store,
            cache,
            table,
            config,
            in_progress: AtomicBool::new(false),
            interval,
            last_run: RwLock::new(None),
            last_error: RwLock::new(None),
            conflicts: Mutex::new(VecDeque::new()),
            total_conflicts: AtomicU64::new(0),
        }
    }

    /// Interval updates for the scheduling loop
    pub fn interval_watch(&self) -> watch::Receiver<Duration> {
        self.interval.subscribe()
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Change the schedule; shorter than one minute is rejected
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        if interval < Duration::from_secs(MIN_SYNC_INTERVAL_SECS) {
            return Err(ProgressionError::validation(format!(
                "sync interval must be at least {}s, got {}s",
                MIN_SYNC_INTERVAL_SECS,
                interval.as_secs()
            )));
        }
        self.interval.send_replace(interval);
        info!(interval_secs = interval.as_secs(), "Sync interval updated");
        Ok(())
    }

    /// Run a pass now unless one is already running
    pub async fn force_sync(&self) -> Result<SyncOutcome> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = RunGuard(&self.in_progress);

        match self.reconcile().await {
            Ok(report) => {
                *self.last_error.write().await = None;
                *self.last_run.write().await = Some(report.clone());
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                *self.last_error.write().await = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Entry point for the scheduled loop
    pub async fn run_scheduled(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        match self.force_sync().await? {
            SyncOutcome::Completed(report) if report.conflicts > 0 => {
                info!(conflicts = report.conflicts, users = report.users_checked, "Sync corrected drift");
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            enabled: self.config.enabled,
            in_progress: self.in_progress.load(Ordering::SeqCst),
            interval_secs: self.interval().as_secs(),
            last_run: self.last_run.read().await.clone(),
            last_error: self.last_error.read().await.clone(),
            conflict_count: self.conflicts.lock().await.len(),
            total_conflicts: self.total_conflicts.load(Ordering::Relaxed),
        }
    }

    /// Oldest first
    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.lock().await.iter().cloned().collect()
    }

    /// Empty the log, returning how many records were dropped
    pub async fn clear_conflicts(&self) -> usize {
        let mut log = self.conflicts.lock().await;
        let cleared = log.len();
        log.clear();
        cleared
    }

    async fn reconcile(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut users = self.store.list_user_ids().await?;
        if let Some(sample) = self.config.sample_size {
            if sample < users.len() {
                users.shuffle(&mut rand::thread_rng());
                users.truncate(sample);
            }
        }

        let mut report = SyncReport {
            users_checked: 0,
            cache_misses: 0,
            conflicts: 0,
            errors: 0,
            duration_ms: 0,
            finished_at: Utc::now(),
        };

        for user_id in users {
            report.users_checked += 1;
            match self.reconcile_user(user_id).await {
                Ok(Some(found)) => report.conflicts += found,
                Ok(None) => report.cache_misses += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(%user_id, error = %e, "Failed to reconcile user");
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        report.finished_at = Utc::now();
        debug!(
            users = report.users_checked,
            conflicts = report.conflicts,
            errors = report.errors,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Conflicts found for one user; `None` when nothing is cached
    async fn reconcile_user(&self, user_id: Uuid) -> Result<Option<usize>> {
        let stats = self.reconcile_stats(user_id).await?;
        let progression = self.reconcile_progression(user_id).await?;
        Ok(match (stats, progression) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        })
    }

    /// A drifted stats snapshot is replaced with the fresh one
    async fn reconcile_stats(&self, user_id: Uuid) -> Result<Option<usize>> {
        let key = stats_key(user_id);
        let Some(cached) = self.cache.get::<UserStatsSnapshot>(&key).await else {
            return Ok(None);
        };
        let fresh = UserStatsSnapshot::compute(&*self.store, &self.table, user_id).await?;

        let found = diff(&cached, &fresh, self.config.relative_tolerance);
        if found.is_empty() {
            return Ok(Some(0));
        }

        self.cache.delete(&key).await;
        self.cache.set(&key, &fresh, self.cache.config().stats_ttl()).await;
        Ok(Some(self.log_conflicts(user_id, found).await))
    }

    /// A drifted progression entry is dropped; the next read reloads it
    async fn reconcile_progression(&self, user_id: Uuid) -> Result<Option<usize>> {
        let key = progression_key(user_id);
        let Some(cached) = self.cache.get::<UserProgression>(&key).await else {
            return Ok(None);
        };
        let fresh = match self.store.get_progression(user_id).await? {
            Some(row) => row,
            None => UserProgression::new(user_id, &self.table),
        };

        let found = diff_progression(&cached, &fresh, self.config.relative_tolerance);
        if found.is_empty() {
            return Ok(Some(0));
        }

        self.cache.delete(&key).await;
        Ok(Some(self.log_conflicts(user_id, found).await))
    }

    async fn log_conflicts(&self, user_id: Uuid, found: Vec<ConflictRecord>) -> usize {
        let count = found.len();
        for record in &found {
            warn!(
                %user_id,
                field = %record.field,
                cached = record.cached,
                fresh = record.fresh,
                "Cache drift detected"
            );
        }
        self.total_conflicts.fetch_add(count as u64, Ordering::Relaxed);

        let capacity = self.config.conflict_log_capacity.max(1);
        let mut log = self.conflicts.lock().await;
        for record in found {
            if log.len() >= capacity {
                log.pop_front();
            }
            log.push_back(record);
        }
        count
    }
}

fn conflict(user_id: Uuid, field: &str, cached: f64, fresh: f64, drift: f64) -> ConflictRecord {
    ConflictRecord {
        user_id,
        field: field.to_string(),
        cached,
        fresh,
        drift,
        detected_at: Utc::now(),
    }
}

/// Cached progression against the stored row: level exactly, XP within tolerance
pub fn diff_progression(cached: &UserProgression, fresh: &UserProgression, tolerance: f64) -> Vec<ConflictRecord> {
    let user_id = fresh.user_id;
    let mut conflicts = Vec::new();
    if cached.level != fresh.level {
        conflicts.push(conflict(user_id, "progression.level", cached.level as f64, fresh.level as f64, 1.0));
    }
    let (c, f) = (cached.total_xp as f64, fresh.total_xp as f64);
    let drift = relative_drift(c, f);
    if drift > tolerance {
        conflicts.push(conflict(user_id, "progression.totalXp", c, f, drift));
    }
    conflicts
}

/// Field-by-field comparison of a cached snapshot against a fresh one
pub fn diff(cached: &UserStatsSnapshot, fresh: &UserStatsSnapshot, tolerance: f64) -> Vec<ConflictRecord> {
    let user_id = fresh.user_id;
    let record = |field: &str, cached: f64, fresh: f64, drift: f64| conflict(user_id, field, cached, fresh, drift);

    let mut conflicts = Vec::new();
    if cached.level != fresh.level {
        conflicts.push(record("level", cached.level as f64, fresh.level as f64, 1.0));
    }

    let numeric = [
        ("totalXp", cached.total_xp, fresh.total_xp),
        ("gamesPlayed", cached.games_played, fresh.games_played),
        ("totalScore", cached.total_score, fresh.total_score),
        ("achievements", cached.achievements, fresh.achievements),
    ];
    for (field, c, f) in numeric {
        let drift = relative_drift(c as f64, f as f64);
        if drift > tolerance {
            conflicts.push(record(field, c as f64, f as f64, drift));
        }
    }
    conflicts
}

fn relative_drift(cached: f64, fresh: f64) -> f64 {
    (fresh - cached).abs() / cached.abs().max(1.0)
}
