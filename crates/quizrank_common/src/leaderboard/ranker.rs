//! Maintains and serves windowed rankings.
//!
//! One completed game increments the user's row in every window, both for the
//! game's category and for the cross-category board. Reads rank rows with
//! `rank_order` and are served through the cache.

use super::period::Period;
use super::{
    percentile, rank_order, CategoryId, LeaderboardDelta, LeaderboardEntry, LeaderboardKey,
    LeaderboardPage, RankedEntry, TopPlayer, UserRank, WindowType,
};
use crate::cache::keys::{self, CacheKey, LEADERBOARD_NS, TOP_PLAYERS_NS};
use crate::cache::CacheLayer;
use crate::error::{ProgressionError, Result};
use crate::notifier::{Notifier, ServerEvent};
use crate::progression::LevelTable;
use crate::store::ProgressionStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size pre-computed by the cache warmer
pub const WARM_PAGE_SIZE: usize = 10;

pub struct LeaderboardRanker {
    store: Arc<dyn ProgressionStore>,
    cache: Arc<CacheLayer>,
    table: Arc<LevelTable>,
    notifier: Option<Arc<Notifier>>,
}

impl LeaderboardRanker {
    pub fn new(store: Arc<dyn ProgressionStore>, cache: Arc<CacheLayer>, table: Arc<LevelTable>) -> Self {
        Self {
            store,
            cache,
            table,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Add one game to every window's current period
    pub async fn record_game(
        &self,
        user_id: Uuid,
        category_id: Option<CategoryId>,
        delta: LeaderboardDelta,
        played_at: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let mut scopes = vec![None];
        if category_id.is_some() {
            scopes.push(category_id);
        }

        let mut slots = Vec::with_capacity(WindowType::ALL.len() * scopes.len());
        for window in WindowType::ALL {
            let period = Period::resolve(window, played_at);
            for scope in &scopes {
                let key = LeaderboardKey {
                    user_id,
                    window,
                    category_id: *scope,
                    period_start: period.start,
                };
                slots.push((key, period.end));
            }
        }
        let rows = self.store.increment_leaderboards(&slots, delta).await?;
        debug!(%user_id, ?category_id, score = delta.score, rows = rows.len(), "Leaderboard rows updated");

        self.cache.invalidate_prefix(&CacheKey::prefix(LEADERBOARD_NS)).await;
        self.cache.invalidate_prefix(&CacheKey::prefix(TOP_PLAYERS_NS)).await;

        if let Some(notifier) = &self.notifier {
            for window in WindowType::ALL {
                notifier
                    .broadcast_room(
                        window,
                        ServerEvent::LeaderboardUpdate {
                            window_type: window,
                            category_id,
                            user_id,
                            delta,
                        },
                    )
                    .await;
            }
        }
        Ok(rows)
    }

    /// One page of the current period of `window`
    pub async fn get_leaderboard(
        &self,
        window: WindowType,
        category_id: Option<CategoryId>,
        limit: usize,
        offset: usize,
    ) -> Result<LeaderboardPage> {
        validate_limit(limit)?;
        let store = Arc::clone(&self.store);
        self.cache
            .get_with_refresh(
                &keys::leaderboard_key(window, category_id, limit, offset),
                self.cache.config().leaderboard_ttl(),
                move || build_page(store, window, category_id, limit, offset, Utc::now()),
            )
            .await
    }

    /// The user's standing in the current period of `window`
    pub async fn get_user_rank(
        &self,
        user_id: Uuid,
        window: WindowType,
        category_id: Option<CategoryId>,
    ) -> Result<UserRank> {
        let rows = ranked_rows(&*self.store, window, category_id, Utc::now()).await?;
        let total = rows.len() as u64;
        Ok(match rows.iter().position(|e| e.user_id == user_id) {
            Some(index) => {
                let rank = index as u64 + 1;
                UserRank::Ranked {
                    rank,
                    score: rows[index].score,
                    percentile: percentile(rank, total),
                    total_entries: total,
                }
            }
            None => UserRank::NoEntries {
                total_entries: total,
            },
        })
    }

    /// Global all-time standings by total XP
    pub async fn get_top_players(&self, limit: usize) -> Result<Vec<TopPlayer>> {
        validate_limit(limit)?;
        let store = Arc::clone(&self.store);
        let table = Arc::clone(&self.table);
        self.cache
            .get_with_refresh(
                &keys::top_players_key(limit),
                self.cache.config().top_players_ttl(),
                move || build_top_players(store, table, limit),
            )
            .await
    }

    /// Recompute and store the first page of every window plus the top players.
    /// Returns how many entries were written.
    pub async fn warm(&self) -> Result<usize> {
        let now = Utc::now();
        let ttl = self.cache.config().leaderboard_ttl();
        for window in WindowType::ALL {
            let page = build_page(Arc::clone(&self.store), window, None, WARM_PAGE_SIZE, 0, now).await?;
            self.cache
                .set(&keys::leaderboard_key(window, None, WARM_PAGE_SIZE, 0), &page, ttl)
                .await;
        }
        let top = build_top_players(Arc::clone(&self.store), Arc::clone(&self.table), WARM_PAGE_SIZE).await?;
        self.cache
            .set(
                &keys::top_players_key(WARM_PAGE_SIZE),
                &top,
                self.cache.config().top_players_ttl(),
            )
            .await;
        Ok(WindowType::ALL.len() + 1)
    }
}

fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ProgressionError::validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, limit
        )));
    }
    Ok(())
}

async fn ranked_rows(
    store: &dyn ProgressionStore,
    window: WindowType,
    category_id: Option<CategoryId>,
    now: DateTime<Utc>,
) -> Result<Vec<LeaderboardEntry>> {
    let period = Period::resolve(window, now);
    let mut rows = store.leaderboard_rows(window, category_id, period.start).await?;
    rows.sort_by(rank_order);
    Ok(rows)
}

async fn build_page(
    store: Arc<dyn ProgressionStore>,
    window: WindowType,
    category_id: Option<CategoryId>,
    limit: usize,
    offset: usize,
    now: DateTime<Utc>,
) -> Result<LeaderboardPage> {
    let period = Period::resolve(window, now);
    let rows = ranked_rows(&*store, window, category_id, now).await?;
    let total = rows.len() as u64;

    let mut entries = Vec::with_capacity(limit.min(rows.len()));
    for (index, row) in rows.into_iter().enumerate().skip(offset).take(limit) {
        let username = store.get_profile(row.user_id).await?.map(|p| p.username);
        entries.push(RankedEntry {
            rank: index as u64 + 1,
            user_id: row.user_id,
            username,
            score: row.score,
            xp_earned: row.xp_earned,
            games_played: row.games_played,
        });
    }

    Ok(LeaderboardPage {
        window,
        category_id,
        period_start: period.start,
        period_end: period.end,
        entries,
        total,
    })
}

async fn build_top_players(
    store: Arc<dyn ProgressionStore>,
    table: Arc<LevelTable>,
    limit: usize,
) -> Result<Vec<TopPlayer>> {
    let rows = store.top_progressions(limit).await?;
    let mut players = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let username = store.get_profile(row.user_id).await?.map(|p| p.username);
        let snapshot = table.snapshot(row.total_xp);
        players.push(TopPlayer {
            rank: index as u64 + 1,
            user_id: row.user_id,
            username,
            total_xp: row.total_xp,
            level: snapshot.level,
            title: snapshot.title,
        });
    }
    Ok(players)
}
