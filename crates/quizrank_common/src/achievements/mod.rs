//! Achievements
//!
//! Typed unlock criteria, the seeded catalog and the single-pass evaluator.

pub mod catalog;
pub mod evaluator;

pub use catalog::{
    seeded_catalog, AchievementDefinition, AchievementProgress, Counter, Criteria, Rarity,
    UserAchievement,
};
pub use evaluator::{AchievementEvaluator, EarnedAchievement, GameContext, UnlockedAchievement};
