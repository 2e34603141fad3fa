//! Progression Module
//!
//! XP, levels and per-user gameplay statistics.
//!
//! ## Level System
//!
//! - Table-driven bands (`LevelTable`), seeded or loaded from config
//! - Level, title and progress derived purely from total XP
//!
//! ## XP
//!
//! - `XpCalculator` turns a game summary into an award
//! - `ProgressionUpdater` applies awards atomically per user

pub mod levels;
pub mod stats;
pub mod updater;
pub mod xp;

pub use levels::{LevelBand, LevelPerks, LevelSnapshot, LevelTable};
pub use stats::{GameStatsDelta, UserProfile, UserProgression, UserStats};
pub use updater::{AddXpOutcome, ProgressionUpdater};
pub use xp::{Difficulty, GameSummary, XpAward, XpBonus, XpCalculator};
