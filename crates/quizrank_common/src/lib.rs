//! QuizRank common - progression, achievements and leaderboards for quiz games.
//!
//! XP and levels, achievement grants, periodic leaderboards, a two-tier
//! cache, background reconciliation and real-time notifications. The
//! `quizrankd` daemon wires these together through `service::Services`.

pub mod achievements;
pub mod cache;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod notifier;
pub mod progression;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod sync;

pub use config::QuizRankConfig;
pub use error::{CacheError, ProgressionError, Result};
pub use service::{CompletedGame, GameOutcome, ProgressionService, ProgressionView, Services};
