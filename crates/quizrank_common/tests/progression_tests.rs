//! Progression tests: XP awards, level bands and concurrent updates.
//!
//! All tests run against the in-memory store; no network.

use quizrank_common::progression::{
    Difficulty, GameSummary, LevelBand, LevelPerks, LevelTable, ProgressionUpdater, XpCalculator,
};
use quizrank_common::store::{MemoryStore, ProgressionStore};
use std::sync::Arc;
use uuid::Uuid;

fn updater() -> (Arc<MemoryStore>, Arc<ProgressionUpdater>) {
    let store = Arc::new(MemoryStore::new());
    let updater = Arc::new(ProgressionUpdater::new(store.clone(), Arc::new(LevelTable::seeded())));
    (store, updater)
}

// ============================================================================
// Level progression
// ============================================================================

#[tokio::test]
async fn test_level_walk_90_20_300() {
    let (_, updater) = updater();
    let user = Uuid::new_v4();

    let a = updater.add_xp(user, 90).await.unwrap();
    assert_eq!((a.total_xp, a.level, a.leveled_up), (90, 1, false));
    assert_eq!(a.current_level_xp, 90);

    let b = updater.add_xp(user, 20).await.unwrap();
    assert_eq!((b.total_xp, b.level, b.leveled_up), (110, 2, true));
    assert_eq!(b.previous_level, 1);
    assert_eq!(b.current_level_xp, 10);

    let c = updater.add_xp(user, 300).await.unwrap();
    assert_eq!((c.total_xp, c.level, c.leveled_up), (410, 3, true));
    assert_eq!(c.previous_level, 2);
    assert_eq!(c.current_level_xp, 160);
    assert!(c.level_progress > 0.0 && c.level_progress < 1.0);
}

/// Six levels, 100 XP each, the last open-ended
fn hundred_xp_bands() -> LevelTable {
    let bands = (0..6u64)
        .map(|i| LevelBand {
            level: i as u32 + 1,
            min_xp: i * 100,
            max_xp: i * 100 + 99,
            title: format!("Tier {}", i + 1),
            perks: LevelPerks::default(),
        })
        .collect();
    LevelTable::new(bands).unwrap()
}

#[tokio::test]
async fn test_award_crosses_several_bands() {
    let store = Arc::new(MemoryStore::new());
    let updater = ProgressionUpdater::new(store.clone(), Arc::new(hundred_xp_bands()));
    let user = Uuid::new_v4();

    let mid = updater.add_xp(user, 150).await.unwrap();
    assert_eq!((mid.level, mid.current_level_xp), (2, 50));

    let jump = updater.add_xp(user, 300).await.unwrap();
    assert_eq!((jump.total_xp, jump.level, jump.previous_level), (450, 5, 2));
    assert!(jump.leveled_up);
    assert_eq!(jump.title, "Tier 5");
    assert_eq!(jump.current_level_xp, 50);
    assert!((jump.level_progress - 50.0 / 99.0).abs() < 1e-9);

    let row = store.get_progression(user).await.unwrap().unwrap();
    assert_eq!((row.level, row.total_xp), (5, 450));
}

#[tokio::test]
async fn test_stored_row_matches_outcome() {
    let (store, updater) = updater();
    let user = Uuid::new_v4();
    let outcome = updater.add_xp(user, 1_150).await.unwrap();

    let row = store.get_progression(user).await.unwrap().unwrap();
    assert_eq!(row.total_xp, outcome.total_xp);
    assert_eq!(row.level, outcome.level);
    assert_eq!(row.title, outcome.title);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_awards_are_not_lost() {
    let (store, updater) = updater();
    let user = Uuid::new_v4();

    let handles: Vec<_> = [30u64, 40, 50]
        .into_iter()
        .map(|xp| {
            let updater = updater.clone();
            tokio::spawn(async move { updater.add_xp(user, xp).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let row = store.get_progression(user).await.unwrap().unwrap();
    assert_eq!(row.total_xp, 120);
    assert_eq!(row.level, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_writers_many_users() {
    let (store, updater) = updater();
    let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    let mut handles = Vec::new();
    for user in &users {
        for _ in 0..25 {
            let updater = updater.clone();
            let user = *user;
            handles.push(tokio::spawn(async move { updater.add_xp(user, 10).await }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for user in users {
        let row = store.get_progression(user).await.unwrap().unwrap();
        assert_eq!(row.total_xp, 250);
        assert_eq!(row.level, 3);
    }
}

// ============================================================================
// XP formula
// ============================================================================

#[test]
fn test_xp_bonuses_stack() {
    let calc = XpCalculator::default();

    let plain = calc.calculate(&GameSummary::new(10, 10, Difficulty::Hard)).unwrap();
    assert_eq!(plain.earned_xp, 200);

    let boosted = calc
        .calculate(
            &GameSummary::new(10, 10, Difficulty::Hard)
                .perfect()
                .with_avg_time(4.0)
                .with_streak(),
        )
        .unwrap();
    // 10 * 10 * 2.0 * 1.5 * 1.2 * 1.1
    assert_eq!(boosted.earned_xp, 396);
    assert_eq!(boosted.bonuses.len(), 3);
}

#[test]
fn test_invalid_summaries_rejected() {
    let calc = XpCalculator::default();
    assert!(calc.calculate(&GameSummary::new(-1, 10, Difficulty::Easy)).is_err());
    assert!(calc.calculate(&GameSummary::new(11, 10, Difficulty::Easy)).is_err());
    assert!(calc.calculate(&GameSummary::new(0, 0, Difficulty::Easy)).is_ok());
}
