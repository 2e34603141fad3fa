//! Applies XP awards to the authoritative progression row.
//!
//! Same-user updates are linearized by a compare-and-swap retry loop against
//! the store; updates for different users never touch the same row and proceed
//! independently.

use super::levels::LevelTable;
use super::stats::UserProgression;
use crate::error::{ProgressionError, Result};
use crate::store::ProgressionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Retry budget for one update before reporting contention
const MAX_CAS_ATTEMPTS: u32 = 64;

/// Outcome of one XP award
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddXpOutcome {
    pub total_xp: u64,
    pub earned_xp: u64,
    pub level: u32,
    pub leveled_up: bool,
    pub previous_level: u32,
    pub title: String,
    pub current_level_xp: u64,
    pub level_progress: f64,
}

pub struct ProgressionUpdater {
    store: Arc<dyn ProgressionStore>,
    table: Arc<LevelTable>,
}

impl ProgressionUpdater {
    pub fn new(store: Arc<dyn ProgressionStore>, table: Arc<LevelTable>) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &LevelTable {
        &self.table
    }

    pub fn table_handle(&self) -> Arc<LevelTable> {
        Arc::clone(&self.table)
    }

    /// Add `earned_xp` (> 0) to the user's total and re-derive the level.
    pub async fn add_xp(&self, user_id: Uuid, earned_xp: u64) -> Result<AddXpOutcome> {
        if earned_xp == 0 {
            return Err(ProgressionError::validation("earned XP must be greater than 0"));
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.store.get_progression(user_id).await?;
            let (expected, previous_level) = match &current {
                Some(p) => (Some(p.total_xp), p.level),
                None => (None, 1),
            };
            let base_total = expected.unwrap_or(0);
            let total_xp = base_total.checked_add(earned_xp).ok_or_else(|| {
                ProgressionError::validation(format!("XP total overflow for user {}", user_id))
            })?;

            let band = self.table.walk_up(previous_level, total_xp);
            let next = UserProgression::in_band(user_id, total_xp, band);
            let outcome = AddXpOutcome {
                total_xp,
                earned_xp,
                level: next.level,
                leveled_up: next.level > previous_level,
                previous_level,
                title: next.title.clone(),
                current_level_xp: next.current_level_xp,
                level_progress: next.level_progress,
            };

            if self.store.compare_and_swap_progression(expected, next).await? {
                if outcome.leveled_up {
                    info!(
                        %user_id,
                        from = previous_level,
                        to = outcome.level,
                        total_xp,
                        "User leveled up"
                    );
                }
                return Ok(outcome);
            }

            debug!(%user_id, attempt, "Progression write lost a race, retrying");
            tokio::task::yield_now().await;
        }

        Err(ProgressionError::Contention {
            user_id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Current progression, level 1 with zero XP for unknown users
    pub async fn get(&self, user_id: Uuid) -> Result<UserProgression> {
        Ok(self
            .store
            .get_progression(user_id)
            .await?
            .unwrap_or_else(|| UserProgression::new(user_id, &self.table)))
    }
}
