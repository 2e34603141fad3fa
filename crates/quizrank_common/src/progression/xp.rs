//! XP calculation for a completed game.
//!
//! `earned = round(correct * base_per_correct * difficulty * bonus)` where the
//! bonus multipliers compound: perfect game, fast average answer time, active
//! streak. Pure: no side effects.

use crate::config::XpConfig;
use crate::error::{ProgressionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Question difficulty of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ProgressionError::validation(format!(
                "unknown difficulty '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = ProgressionError;

    fn try_from(value: String) -> Result<Self> {
        Difficulty::parse(&value)
    }
}

impl From<Difficulty> for String {
    fn from(d: Difficulty) -> Self {
        d.as_str().to_string()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed game, as reported by the quiz session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub correct_answers: i64,
    pub total_questions: i64,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub avg_time_per_question: Option<f64>,
    #[serde(default)]
    pub is_perfect_game: Option<bool>,
    #[serde(default)]
    pub has_active_streak: Option<bool>,
}

impl GameSummary {
    pub fn new(correct_answers: i64, total_questions: i64, difficulty: Difficulty) -> Self {
        Self {
            correct_answers,
            total_questions,
            difficulty,
            avg_time_per_question: None,
            is_perfect_game: None,
            has_active_streak: None,
        }
    }

    pub fn perfect(mut self) -> Self {
        self.is_perfect_game = Some(true);
        self
    }

    pub fn with_avg_time(mut self, seconds: f64) -> Self {
        self.avg_time_per_question = Some(seconds);
        self
    }

    pub fn with_streak(mut self) -> Self {
        self.has_active_streak = Some(true);
        self
    }

    /// Reject negative or inconsistent counts
    pub fn validate(&self) -> Result<()> {
        if self.correct_answers < 0 || self.total_questions < 0 {
            return Err(ProgressionError::validation(format!(
                "answer counts must be non-negative (correct={}, total={})",
                self.correct_answers, self.total_questions
            )));
        }
        if self.correct_answers > self.total_questions {
            return Err(ProgressionError::validation(format!(
                "correct answers ({}) exceed total questions ({})",
                self.correct_answers, self.total_questions
            )));
        }
        if let Some(t) = self.avg_time_per_question {
            if !t.is_finite() || t < 0.0 {
                return Err(ProgressionError::validation(format!(
                    "average time per question must be a non-negative number, got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}

/// Bonus applied on top of the difficulty multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpBonus {
    PerfectGame,
    FastAnswers,
    ActiveStreak,
}

/// Result of an XP calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpAward {
    pub earned_xp: u64,
    pub difficulty_multiplier: f64,
    pub bonus_multiplier: f64,
    pub bonuses: Vec<XpBonus>,
}

/// Turns game summaries into XP awards
#[derive(Debug, Clone)]
pub struct XpCalculator {
    config: XpConfig,
}

impl XpCalculator {
    pub fn new(config: XpConfig) -> Self {
        Self { config }
    }

    pub fn difficulty_multiplier(&self, difficulty: Difficulty) -> f64 {
        match difficulty {
            Difficulty::Easy => self.config.easy_multiplier,
            Difficulty::Medium => self.config.medium_multiplier,
            Difficulty::Hard => self.config.hard_multiplier,
        }
    }

    pub fn calculate(&self, summary: &GameSummary) -> Result<XpAward> {
        summary.validate()?;

        let mut bonuses = Vec::new();
        let mut bonus_multiplier = 1.0;

        if summary.is_perfect_game == Some(true) {
            bonus_multiplier *= self.config.perfect_bonus;
            bonuses.push(XpBonus::PerfectGame);
        }
        if let Some(avg) = summary.avg_time_per_question {
            if avg < self.config.fast_answer_seconds {
                bonus_multiplier *= self.config.fast_bonus;
                bonuses.push(XpBonus::FastAnswers);
            }
        }
        if summary.has_active_streak == Some(true) {
            bonus_multiplier *= self.config.streak_bonus;
            bonuses.push(XpBonus::ActiveStreak);
        }

        let difficulty_multiplier = self.difficulty_multiplier(summary.difficulty);
        let raw = summary.correct_answers as f64
            * self.config.base_xp_per_correct as f64
            * difficulty_multiplier
            * bonus_multiplier;

        Ok(XpAward {
            earned_xp: raw.round().max(0.0) as u64,
            difficulty_multiplier,
            bonus_multiplier,
            bonuses,
        })
    }
}

impl Default for XpCalculator {
    fn default() -> Self {
        Self::new(XpConfig::default())
    }
}
