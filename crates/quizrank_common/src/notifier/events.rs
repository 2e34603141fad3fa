//! Real-time event payloads.
//!
//! Serialized as `{"event": "<name>", "data": {...}}`.

use crate::achievements::{AchievementDefinition, Rarity};
use crate::leaderboard::{CategoryId, LeaderboardDelta, WindowType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Achievement fields pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementSummary {
    pub code: String,
    pub name: String,
    pub description: String,
    pub xp_reward: u64,
    pub rarity: Rarity,
}

impl From<&AchievementDefinition> for AchievementSummary {
    fn from(d: &AchievementDefinition) -> Self {
        Self {
            code: d.code.clone(),
            name: d.name.clone(),
            description: d.description.clone(),
            xp_reward: d.xp_reward,
            rarity: d.rarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "progression:update", rename_all = "camelCase")]
    ProgressionUpdate {
        total_xp: u64,
        level: u32,
        earned_xp: u64,
    },

    #[serde(rename = "achievement:unlocked")]
    AchievementUnlocked { achievement: AchievementSummary },

    #[serde(rename = "progression:levelup", rename_all = "camelCase")]
    LevelUp {
        level: u32,
        previous_level: u32,
        title: String,
    },

    #[serde(rename = "leaderboard:update", rename_all = "camelCase")]
    LeaderboardUpdate {
        window_type: WindowType,
        category_id: Option<CategoryId>,
        user_id: Uuid,
        delta: LeaderboardDelta,
    },

    #[serde(rename = "global:levelup", rename_all = "camelCase")]
    GlobalLevelUp {
        user_id: Uuid,
        username: String,
        new_level: u32,
    },

    #[serde(rename = "global:quizcomplete", rename_all = "camelCase")]
    GlobalQuizComplete {
        user_id: Uuid,
        username: String,
        score: u64,
        category: Option<CategoryId>,
    },

    #[serde(rename = "global:streak", rename_all = "camelCase")]
    GlobalStreak {
        user_id: Uuid,
        username: String,
        streak: u32,
    },
}

impl ServerEvent {
    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ProgressionUpdate { .. } => "progression:update",
            ServerEvent::AchievementUnlocked { .. } => "achievement:unlocked",
            ServerEvent::LevelUp { .. } => "progression:levelup",
            ServerEvent::LeaderboardUpdate { .. } => "leaderboard:update",
            ServerEvent::GlobalLevelUp { .. } => "global:levelup",
            ServerEvent::GlobalQuizComplete { .. } => "global:quizcomplete",
            ServerEvent::GlobalStreak { .. } => "global:streak",
        }
    }
}
