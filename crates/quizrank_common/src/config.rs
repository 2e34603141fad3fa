//! Configuration management for QuizRank.
//!
//! Loads settings from a TOML file or uses defaults. Every section and field
//! is optional in the file.

use crate::error::{ProgressionError, Result};
use crate::progression::{LevelBand, LevelTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/quizrank/config.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "QUIZRANK_CONFIG";

/// Shortest allowed reconciliation interval
pub const MIN_SYNC_INTERVAL_SECS: u64 = 60;

/// Which progression service implementation is wired at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Full pipeline: cache, achievements, leaderboards, notifications
    StoreBacked,
    /// XP, levels and leaderboards only, straight against the store
    Simple,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_mode")]
    pub mode: ServiceMode,
}

fn default_mode() -> ServiceMode {
    ServiceMode::StoreBacked
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
        }
    }
}

/// XP formula constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpConfig {
    #[serde(default = "default_base_xp")]
    pub base_xp_per_correct: u64,
    #[serde(default = "default_easy")]
    pub easy_multiplier: f64,
    #[serde(default = "default_medium")]
    pub medium_multiplier: f64,
    #[serde(default = "default_hard")]
    pub hard_multiplier: f64,
    #[serde(default = "default_perfect_bonus")]
    pub perfect_bonus: f64,
    #[serde(default = "default_fast_bonus")]
    pub fast_bonus: f64,
    /// Average answer time below this earns the fast bonus
    #[serde(default = "default_fast_answer_seconds")]
    pub fast_answer_seconds: f64,
    #[serde(default = "default_streak_bonus")]
    pub streak_bonus: f64,
}

fn default_base_xp() -> u64 {
    10
}

fn default_easy() -> f64 {
    1.0
}

fn default_medium() -> f64 {
    1.5
}

fn default_hard() -> f64 {
    2.0
}

fn default_perfect_bonus() -> f64 {
    1.5
}

fn default_fast_bonus() -> f64 {
    1.2
}

fn default_fast_answer_seconds() -> f64 {
    10.0
}

fn default_streak_bonus() -> f64 {
    1.1
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            base_xp_per_correct: default_base_xp(),
            easy_multiplier: default_easy(),
            medium_multiplier: default_medium(),
            hard_multiplier: default_hard(),
            perfect_bonus: default_perfect_bonus(),
            fast_bonus: default_fast_bonus(),
            fast_answer_seconds: default_fast_answer_seconds(),
            streak_bonus: default_streak_bonus(),
        }
    }
}

/// Cache tiers, TTLs and the primary-tier circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on any primary-tier call
    #[serde(default = "default_primary_timeout_ms")]
    pub primary_timeout_ms: u64,

    /// Entries kept by the local fallback tier
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_progression_ttl")]
    pub progression_ttl_secs: u64,

    #[serde(default = "default_stats_ttl")]
    pub stats_ttl_secs: u64,

    #[serde(default = "default_leaderboard_ttl")]
    pub leaderboard_ttl_secs: u64,

    #[serde(default = "default_top_players_ttl")]
    pub top_players_ttl_secs: u64,

    /// Fraction of the TTL after which a hit triggers a background refresh
    #[serde(default = "default_refresh_ratio")]
    pub refresh_ratio: f64,

    /// Primary failures within the window before the tier is skipped
    #[serde(default = "default_circuit_threshold")]
    pub circuit_failure_threshold: u32,

    #[serde(default = "default_circuit_window")]
    pub circuit_failure_window_secs: u64,

    #[serde(default = "default_circuit_cooldown")]
    pub circuit_cooldown_secs: u64,

    /// Successful calls after the cooldown before the tier is trusted again
    #[serde(default = "default_circuit_successes")]
    pub circuit_success_threshold: u32,

    #[serde(default = "default_true")]
    pub warm_enabled: bool,

    #[serde(default = "default_warm_interval")]
    pub warm_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_primary_timeout_ms() -> u64 {
    250
}

fn default_local_capacity() -> usize {
    1_000
}

fn default_ttl() -> u64 {
    300
}

fn default_progression_ttl() -> u64 {
    60
}

fn default_stats_ttl() -> u64 {
    300
}

fn default_leaderboard_ttl() -> u64 {
    30
}

fn default_top_players_ttl() -> u64 {
    120
}

fn default_refresh_ratio() -> f64 {
    0.8
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_window() -> u64 {
    60
}

fn default_circuit_successes() -> u32 {
    2
}

fn default_circuit_cooldown() -> u64 {
    30
}

fn default_warm_interval() -> u64 {
    60
}

impl CacheConfig {
    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn progression_ttl(&self) -> Duration {
        Duration::from_secs(self.progression_ttl_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    pub fn leaderboard_ttl(&self) -> Duration {
        Duration::from_secs(self.leaderboard_ttl_secs)
    }

    pub fn top_players_ttl(&self) -> Duration {
        Duration::from_secs(self.top_players_ttl_secs)
    }

    pub fn circuit_failure_window(&self) -> Duration {
        Duration::from_secs(self.circuit_failure_window_secs)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    pub fn warm_interval(&self) -> Duration {
        Duration::from_secs(self.warm_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_timeout_ms: default_primary_timeout_ms(),
            local_capacity: default_local_capacity(),
            default_ttl_secs: default_ttl(),
            progression_ttl_secs: default_progression_ttl(),
            stats_ttl_secs: default_stats_ttl(),
            leaderboard_ttl_secs: default_leaderboard_ttl(),
            top_players_ttl_secs: default_top_players_ttl(),
            refresh_ratio: default_refresh_ratio(),
            circuit_failure_threshold: default_circuit_threshold(),
            circuit_failure_window_secs: default_circuit_window(),
            circuit_cooldown_secs: default_circuit_cooldown(),
            circuit_success_threshold: default_circuit_successes(),
            warm_enabled: true,
            warm_interval_secs: default_warm_interval(),
        }
    }
}

/// Background reconciliation between cached and authoritative aggregates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Relative drift above which a numeric field is a conflict
    #[serde(default = "default_tolerance")]
    pub relative_tolerance: f64,

    /// Check a random sample of this many users per run (all users when unset)
    #[serde(default)]
    pub sample_size: Option<usize>,

    #[serde(default = "default_conflict_capacity")]
    pub conflict_log_capacity: usize,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_tolerance() -> f64 {
    0.05
}

fn default_conflict_capacity() -> usize {
    100
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sync_interval(),
            relative_tolerance: default_tolerance(),
            sample_size: None,
            conflict_log_capacity: default_conflict_capacity(),
        }
    }
}

/// Real-time fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Buffered events per connection before new ones are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Level-ups to multiples of this are announced globally
    #[serde(default = "default_level_milestone")]
    pub level_milestone_every: u32,

    /// Streak lengths announced globally
    #[serde(default = "default_streak_milestones")]
    pub streak_milestones: Vec<u32>,
}

fn default_channel_capacity() -> usize {
    64
}

fn default_level_milestone() -> u32 {
    5
}

fn default_streak_milestones() -> Vec<u32> {
    vec![3, 7, 14, 30, 50, 100]
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            level_milestone_every: default_level_milestone(),
            streak_milestones: default_streak_milestones(),
        }
    }
}

/// Optional override of the seeded level table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelingConfig {
    #[serde(default)]
    pub bands: Option<Vec<LevelBand>>,
}

impl LevelingConfig {
    pub fn table(&self) -> Result<LevelTable> {
        match &self.bands {
            Some(bands) => LevelTable::new(bands.clone()),
            None => Ok(LevelTable::seeded()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuizRankConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub xp: XpConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub leveling: LevelingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl QuizRankConfig {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| {
            ProgressionError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ProgressionError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs < MIN_SYNC_INTERVAL_SECS {
            return Err(ProgressionError::Config(format!(
                "sync.interval_secs must be at least {}, got {}",
                MIN_SYNC_INTERVAL_SECS, self.sync.interval_secs
            )));
        }
        if !(self.cache.refresh_ratio > 0.0 && self.cache.refresh_ratio < 1.0) {
            return Err(ProgressionError::Config(format!(
                "cache.refresh_ratio must be between 0 and 1, got {}",
                self.cache.refresh_ratio
            )));
        }
        if self.cache.local_capacity == 0 {
            return Err(ProgressionError::Config(
                "cache.local_capacity must be greater than 0".into(),
            ));
        }
        if self.sync.relative_tolerance < 0.0 {
            return Err(ProgressionError::Config(
                "sync.relative_tolerance must not be negative".into(),
            ));
        }
        if self.notifier.channel_capacity == 0 {
            return Err(ProgressionError::Config(
                "notifier.channel_capacity must be greater than 0".into(),
            ));
        }
        self.leveling.table()?;
        Ok(())
    }
}
