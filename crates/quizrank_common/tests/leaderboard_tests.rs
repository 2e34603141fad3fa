//! Leaderboard ranking across windows and categories.

use chrono::{Duration as ChronoDuration, Utc};
use quizrank_common::cache::CacheLayer;
use quizrank_common::config::CacheConfig;
use quizrank_common::leaderboard::{LeaderboardDelta, LeaderboardRanker, UserRank, WindowType};
use quizrank_common::progression::{LevelTable, ProgressionUpdater};
use quizrank_common::store::MemoryStore;
use std::sync::Arc;
use uuid::Uuid;

fn ranker() -> (Arc<MemoryStore>, LeaderboardRanker) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(CacheLayer::local_only(CacheConfig::default()));
    let ranker = LeaderboardRanker::new(store.clone(), cache, Arc::new(LevelTable::seeded()));
    (store, ranker)
}

fn delta(score: u64) -> LeaderboardDelta {
    LeaderboardDelta {
        score,
        xp_earned: score / 2,
        games_played: 1,
    }
}

#[tokio::test]
async fn test_one_row_per_user_and_period() {
    let (_, ranker) = ranker();
    let user = Uuid::new_v4();

    let mut last = 0;
    for score in [10, 25, 5] {
        let rows = ranker.record_game(user, Some(3), delta(score), Utc::now()).await.unwrap();
        assert_eq!(rows.len(), 8);

        let page = ranker.get_leaderboard(WindowType::AllTime, Some(3), 10, 0).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.entries[0].score >= last);
        last = page.entries[0].score;
    }

    let page = ranker.get_leaderboard(WindowType::Daily, Some(3), 10, 0).await.unwrap();
    assert_eq!((page.entries[0].score, page.entries[0].games_played), (40, 3));

    // category games also count towards the cross-category board
    let overall = ranker.get_leaderboard(WindowType::AllTime, None, 10, 0).await.unwrap();
    assert_eq!(overall.entries[0].score, 40);
}

#[tokio::test]
async fn test_ranks_and_pagination() {
    let (_, ranker) = ranker();
    let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    for (i, user) in users.iter().enumerate() {
        ranker
            .record_game(*user, None, delta(100 * (i as u64 + 1)), Utc::now())
            .await
            .unwrap();
    }

    let second_page = ranker.get_leaderboard(WindowType::Weekly, None, 2, 2).await.unwrap();
    assert_eq!(second_page.total, 5);
    let ranks: Vec<u64> = second_page.entries.iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![3, 4]);
    assert_eq!(second_page.entries[0].user_id, users[2]);

    match ranker.get_user_rank(users[4], WindowType::Weekly, None).await.unwrap() {
        UserRank::Ranked { rank, score, total_entries, .. } => {
            assert_eq!((rank, score, total_entries), (1, 500, 5));
        }
        other => panic!("expected a ranked entry, got {:?}", other),
    }

    let absent = ranker
        .get_user_rank(Uuid::new_v4(), WindowType::Weekly, None)
        .await
        .unwrap();
    assert_eq!(absent.rank(), None);
}

#[tokio::test]
async fn test_past_periods_do_not_leak() {
    let (_, ranker) = ranker();
    let user = Uuid::new_v4();
    ranker
        .record_game(user, None, delta(80), Utc::now() - ChronoDuration::days(40))
        .await
        .unwrap();

    let monthly = ranker.get_leaderboard(WindowType::Monthly, None, 10, 0).await.unwrap();
    assert!(monthly.entries.is_empty());
    let all_time = ranker.get_leaderboard(WindowType::AllTime, None, 10, 0).await.unwrap();
    assert_eq!(all_time.entries.len(), 1);
}

#[tokio::test]
async fn test_limit_bounds() {
    let (_, ranker) = ranker();
    assert!(ranker.get_leaderboard(WindowType::Daily, None, 0, 0).await.is_err());
    assert!(ranker.get_leaderboard(WindowType::Daily, None, 101, 0).await.is_err());
    assert!(ranker.get_leaderboard(WindowType::Daily, None, 100, 0).await.is_ok());
}

#[tokio::test]
async fn test_top_players_by_total_xp() {
    let (store, ranker) = ranker();
    let updater = ProgressionUpdater::new(store, Arc::new(LevelTable::seeded()));
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    updater.add_xp(a, 120).await.unwrap();
    updater.add_xp(b, 800).await.unwrap();

    let top = ranker.get_top_players(10).await.unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!((top[0].user_id, top[0].rank, top[0].level), (b, 1, 5));
    assert_eq!((top[1].user_id, top[1].rank, top[1].level), (a, 2, 2));
}
