//! Level table
//!
//! Table-driven level bands. Every total XP value maps to exactly one band with
//! `min_xp <= total_xp <= max_xp`; level, title and progress are derived from that
//! band and nothing else.
//!
//! The seeded table uses escalating, non-uniform bands:
//! - Level 1: 0-99 XP
//! - Level 2: 100-249 XP
//! - Level 10: 3,200-3,999 XP
//! - Level 20: 22,000+ XP (open-ended)

use crate::error::{ProgressionError, Result};
use serde::{Deserialize, Serialize};

/// Seeded bands: (level, min_xp, title, xp_bonus_pct)
/// max_xp of each band is the next band's min_xp - 1; the last band is open-ended.
const SEED_BANDS: &[(u32, u64, &str, u8)] = &[
    (1, 0, "Novice", 0),
    (2, 100, "Apprentice", 0),
    (3, 250, "Quiz Rookie", 0),
    (4, 450, "Trivia Fan", 0),
    (5, 700, "Curious Mind", 2),
    (6, 1_000, "Knowledge Seeker", 2),
    (7, 1_400, "Scholar", 2),
    (8, 1_900, "Quiz Whiz", 3),
    (9, 2_500, "Brainiac", 3),
    (10, 3_200, "Sage", 5),
    (11, 4_000, "Quiz Master", 5),
    (12, 5_000, "Grand Scholar", 5),
    (13, 6_200, "Trivia Champion", 7),
    (14, 7_600, "Mastermind", 7),
    (15, 9_200, "Luminary", 10),
    (16, 11_000, "Oracle", 10),
    (17, 13_000, "Virtuoso", 12),
    (18, 15_500, "Polymath", 12),
    (19, 18_500, "Legend", 15),
    (20, 22_000, "Quiz Immortal", 20),
];

/// Perks attached to a band (informational, surfaced to clients)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelPerks {
    /// Bonus percentage shown on the profile
    #[serde(default)]
    pub xp_bonus_pct: u8,
    /// Optional badge unlocked at this level
    #[serde(default)]
    pub badge: Option<String>,
}

/// One contiguous XP range mapped to a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelBand {
    pub level: u32,
    pub min_xp: u64,
    pub max_xp: u64,
    pub title: String,
    #[serde(default)]
    pub perks: LevelPerks,
}

impl LevelBand {
    pub fn contains(&self, total_xp: u64) -> bool {
        total_xp >= self.min_xp && total_xp <= self.max_xp
    }

    /// The final band of a table has no upper limit
    pub fn is_open_ended(&self) -> bool {
        self.max_xp == u64::MAX
    }

    /// Fraction of the band covered by `total_xp` (0.0 - 1.0)
    pub fn progress(&self, total_xp: u64) -> f64 {
        if self.is_open_ended() {
            return 1.0;
        }
        let span = self.max_xp - self.min_xp;
        if span == 0 {
            return 1.0;
        }
        let within = total_xp.saturating_sub(self.min_xp) as f64;
        (within / span as f64).clamp(0.0, 1.0)
    }
}

/// Values derived purely from total XP and the band table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub level: u32,
    pub title: String,
    pub current_level_xp: u64,
    pub level_progress: f64,
}

/// Validated, ordered band table
#[derive(Debug, Clone, PartialEq)]
pub struct LevelTable {
    bands: Vec<LevelBand>,
}

impl LevelTable {
    /// Build a table, checking the bands are contiguous and start at zero
    pub fn new(mut bands: Vec<LevelBand>) -> Result<Self> {
        if bands.is_empty() {
            return Err(ProgressionError::Config("level table is empty".into()));
        }
        bands.sort_by_key(|b| b.level);

        if bands[0].min_xp != 0 {
            return Err(ProgressionError::Config(format!(
                "first band (level {}) must start at 0 XP, starts at {}",
                bands[0].level, bands[0].min_xp
            )));
        }

        for band in &bands {
            if band.min_xp > band.max_xp {
                return Err(ProgressionError::Config(format!(
                    "level {} has min_xp {} above max_xp {}",
                    band.level, band.min_xp, band.max_xp
                )));
            }
        }

        for pair in bands.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.level != prev.level + 1 {
                return Err(ProgressionError::Config(format!(
                    "levels must be consecutive: {} followed by {}",
                    prev.level, next.level
                )));
            }
            if prev.max_xp == u64::MAX || next.min_xp != prev.max_xp + 1 {
                return Err(ProgressionError::Config(format!(
                    "level {} must start right after level {} ends ({}), starts at {}",
                    next.level, prev.level, prev.max_xp, next.min_xp
                )));
            }
        }

        if let Some(last) = bands.last_mut() {
            // No XP total may fall outside the table
            last.max_xp = u64::MAX;
        }

        Ok(Self { bands })
    }

    /// The seeded table shipped with the service
    pub fn seeded() -> Self {
        let bands = SEED_BANDS
            .iter()
            .enumerate()
            .map(|(i, &(level, min_xp, title, bonus))| {
                let max_xp = SEED_BANDS
                    .get(i + 1)
                    .map(|next| next.1 - 1)
                    .unwrap_or(u64::MAX);
                LevelBand {
                    level,
                    min_xp,
                    max_xp,
                    title: title.to_string(),
                    perks: LevelPerks {
                        xp_bonus_pct: bonus,
                        badge: (level % 5 == 0).then(|| format!("level-{}", level)),
                    },
                }
            })
            .collect();
        Self { bands }
    }

    pub fn bands(&self) -> &[LevelBand] {
        &self.bands
    }

    pub fn max_level(&self) -> u32 {
        self.bands.last().map(|b| b.level).unwrap_or(1)
    }

    pub fn band_for_level(&self, level: u32) -> Option<&LevelBand> {
        self.bands.iter().find(|b| b.level == level)
    }

    /// Band containing `total_xp`
    pub fn band_for_xp(&self, total_xp: u64) -> &LevelBand {
        let idx = self.bands.partition_point(|b| b.min_xp <= total_xp);
        &self.bands[idx.saturating_sub(1)]
    }

    /// Walk upward from the band of `current_level` until the band containing
    /// `total_xp` is reached. Crosses any number of bands in one call.
    pub fn walk_up(&self, current_level: u32, total_xp: u64) -> &LevelBand {
        let start = self
            .bands
            .iter()
            .position(|b| b.level == current_level && b.min_xp <= total_xp)
            .unwrap_or(0);

        let mut idx = start;
        while !self.bands[idx].contains(total_xp) && idx + 1 < self.bands.len() {
            idx += 1;
        }
        &self.bands[idx]
    }

    /// Derive level, title and progress from total XP
    pub fn snapshot(&self, total_xp: u64) -> LevelSnapshot {
        Self::snapshot_in(self.band_for_xp(total_xp), total_xp)
    }

    pub(crate) fn snapshot_in(band: &LevelBand, total_xp: u64) -> LevelSnapshot {
        LevelSnapshot {
            level: band.level,
            title: band.title.clone(),
            current_level_xp: total_xp - band.min_xp,
            level_progress: band.progress(total_xp),
        }
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::seeded()
    }
}
