//! Concurrency tests for the pairing engine
//!
//! Claim, cancel, sweep, and timeout all funnel through the store's
//! conditional operations, so running them from many tasks at once must
//! never produce a double pairing, a self pairing, or two sides that
//! disagree about who matched whom. Each test drives a real race and
//! checks the resolution stayed consistent.

mod fixtures;

use fixtures::{
    assert_pairs_are_symmetric, create_test_system, create_test_system_with_timeout,
    expect_pending, user_batch, Resolution,
};
use futures::future::join_all;
use switchboard::pairing::{EnqueueOutcome, QueueStore};
use switchboard::types::{MatchOutcome, QueueEntry};
use switchboard::utils::current_timestamp;

#[tokio::test]
async fn test_concurrent_enqueues_pair_disjointly() {
    let system = create_test_system_with_timeout(2);
    let users = user_batch("racer", 20);

    let mut tasks = Vec::new();
    for user in users.clone() {
        let engine = system.engine.clone();
        tasks.push(tokio::spawn(async move {
            match engine.enqueue(user.clone()).await.unwrap() {
                EnqueueOutcome::Matched { partner } => (user, Some(partner)),
                EnqueueOutcome::Pending(session) => match session.outcome().await.unwrap() {
                    MatchOutcome::Matched { partner } => (user, Some(partner)),
                    MatchOutcome::TimedOut => (user, None),
                    MatchOutcome::Cancelled => {
                        panic!("user {} was cancelled without a cancel request", user)
                    }
                },
            }
        }));
    }

    let results: Vec<Resolution> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_pairs_are_symmetric(&results);

    let matched_count = results.iter().filter(|(_, p)| p.is_some()).count();
    assert_eq!(matched_count % 2, 0, "matched users must come in pairs");

    let stats = system.engine.get_stats().await.unwrap();
    assert_eq!(stats.enqueues, users.len() as u64);
    assert_eq!(stats.immediate_matches, stats.deferred_matches);
    assert_eq!(
        (stats.immediate_matches + stats.deferred_matches) as usize,
        matched_count
    );
    assert_eq!(stats.timeouts as usize, users.len() - matched_count);
    assert_eq!(stats.cancellations, 0);
    assert_eq!(stats.subscription_failures, 0);

    assert_eq!(system.publisher.count_match_found(), matched_count / 2);
    assert_eq!(system.engine.waiting_count().await.unwrap(), 0);
    assert_eq!(system.engine.pending_session_count(), 0);

    println!(
        "✅ {} concurrent enqueues resolved into {} pairings with no overlap",
        users.len(),
        matched_count / 2
    );
}

#[tokio::test]
async fn test_simultaneous_pair_requests_resolve_symmetrically() {
    for round in 0..10 {
        let system = create_test_system_with_timeout(1);
        let left = format!("left_{}", round);
        let right = format!("right_{}", round);

        let mut tasks = Vec::new();
        for user in [left.clone(), right.clone()] {
            let engine = system.engine.clone();
            tasks.push(tokio::spawn(async move {
                match engine.enqueue(user.clone()).await.unwrap() {
                    EnqueueOutcome::Matched { partner } => (user, Some(partner)),
                    EnqueueOutcome::Pending(session) => match session.outcome().await.unwrap() {
                        MatchOutcome::Matched { partner } => (user, Some(partner)),
                        MatchOutcome::TimedOut => (user, None),
                        MatchOutcome::Cancelled => {
                            panic!("user {} was cancelled without a cancel request", user)
                        }
                    },
                }
            }));
        }

        let results: Vec<Resolution> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let matched_count = results.iter().filter(|(_, p)| p.is_some()).count();
        match matched_count {
            // Both scanned before either row was visible; both waited out
            // the timer
            0 => {}
            2 => assert_pairs_are_symmetric(&results),
            n => panic!(
                "round {}: {} of 2 users matched; a pairing must resolve on both sides or neither",
                round, n
            ),
        }
    }

    println!("✅ Simultaneous pair requests test passed");
}

#[tokio::test]
async fn test_cancel_racing_claim_has_one_winner() {
    for round in 0..10 {
        let system = create_test_system();
        let waiter = format!("race_waiter_{}", round);
        let claimant = format!("race_claimant_{}", round);

        let session = expect_pending(system.engine.enqueue(waiter.clone()).await.unwrap());
        let outcome_task = tokio::spawn(session.outcome());

        let cancel_engine = system.engine.clone();
        let cancel_target = waiter.clone();
        let cancel_task =
            tokio::spawn(async move { cancel_engine.cancel_user(&cancel_target).await.unwrap() });

        let claim_engine = system.engine.clone();
        let claim_user = claimant.clone();
        let claim_task = tokio::spawn(async move { claim_engine.enqueue(claim_user).await.unwrap() });

        let cancel_won = cancel_task.await.unwrap();
        let claim_outcome = claim_task.await.unwrap();
        let waiter_outcome = outcome_task.await.unwrap().unwrap();

        match (cancel_won, claim_outcome) {
            (true, EnqueueOutcome::Pending(claimant_session)) => {
                assert_eq!(waiter_outcome, MatchOutcome::Cancelled);
                // The claimant found an empty queue and became a waiter;
                // withdraw it so the round ends cleanly.
                assert!(system.engine.cancel_user(&claimant).await.unwrap());
                assert_eq!(
                    claimant_session.outcome().await.unwrap(),
                    MatchOutcome::Cancelled
                );
            }
            (false, EnqueueOutcome::Matched { partner }) => {
                assert_eq!(partner, waiter);
                assert_eq!(
                    waiter_outcome,
                    MatchOutcome::Matched {
                        partner: claimant.clone()
                    }
                );
            }
            (true, EnqueueOutcome::Matched { partner }) => panic!(
                "round {}: cancel and claim both won {}; the conditional ops let two writers through",
                round, partner
            ),
            (false, EnqueueOutcome::Pending(_)) => panic!(
                "round {}: cancel lost but no claim landed; the entry changed state with no winner",
                round
            ),
        }
    }

    println!("✅ Cancel versus claim race test passed");
}

#[tokio::test]
async fn test_claim_burst_on_single_waiter_pairs_once() {
    let system = create_test_system();
    let waiter = "lone_waiter".to_string();

    let session = expect_pending(system.engine.enqueue(waiter.clone()).await.unwrap());
    let waiter_task = tokio::spawn(session.outcome());

    // Every claimant that finds nobody free withdraws instead of waiting
    // out the timer, which piles cancel races on top of the claim races.
    let claimants = user_batch("burst", 8);
    let mut tasks = Vec::new();
    for user in claimants.clone() {
        let engine = system.engine.clone();
        tasks.push(tokio::spawn(async move {
            match engine.enqueue(user.clone()).await.unwrap() {
                EnqueueOutcome::Matched { partner } => (user, Some(partner)),
                EnqueueOutcome::Pending(session) => {
                    engine.cancel_user(&user).await.unwrap();
                    match session.outcome().await.unwrap() {
                        MatchOutcome::Matched { partner } => (user, Some(partner)),
                        MatchOutcome::Cancelled => (user, None),
                        MatchOutcome::TimedOut => {
                            panic!("user {} timed out despite an immediate cancel", user)
                        }
                    }
                }
            }
        }));
    }

    let mut results: Vec<Resolution> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let waiter_outcome = waiter_task.await.unwrap().unwrap();
    let waiter_partner = match waiter_outcome {
        MatchOutcome::Matched { ref partner } => partner.clone(),
        other => panic!(
            "the seeded waiter must be claimed by the burst, got {:?}",
            other
        ),
    };
    results.push((waiter.clone(), Some(waiter_partner)));

    assert_pairs_are_symmetric(&results);

    let claimed_waiter: Vec<&String> = results
        .iter()
        .filter(|(user, partner)| *user != waiter && partner.as_deref() == Some(waiter.as_str()))
        .map(|(user, _)| user)
        .collect();
    assert_eq!(
        claimed_waiter.len(),
        1,
        "exactly one claimant may win the waiting entry, got {:?}",
        claimed_waiter
    );

    assert_eq!(system.engine.waiting_count().await.unwrap(), 0);
    assert_eq!(system.engine.pending_session_count(), 0);

    println!(
        "✅ Claim burst test passed: {} won the lone waiter",
        claimed_waiter[0]
    );
}

#[tokio::test]
async fn test_sweep_racing_claim_yields_one_owner() {
    for round in 0..10 {
        let system = create_test_system();
        let ghost = format!("ghost_{}", round);
        let hunter = format!("hunter_{}", round);

        // An abandoned entry old enough for the sweeper to reclaim, but
        // still Waiting and therefore claimable.
        let mut abandoned = QueueEntry::waiting(ghost.clone());
        abandoned.created_at = current_timestamp() - chrono::Duration::seconds(600);
        system.store.insert(abandoned).await.unwrap();

        let sweep_engine = system.engine.clone();
        let sweep_task =
            tokio::spawn(async move { sweep_engine.sweep_stale_entries().await.unwrap() });

        let claim_engine = system.engine.clone();
        let claim_user = hunter.clone();
        let claim_task = tokio::spawn(async move { claim_engine.enqueue(claim_user).await.unwrap() });

        let swept = sweep_task.await.unwrap();
        let claim_outcome = claim_task.await.unwrap();

        match claim_outcome {
            EnqueueOutcome::Matched { partner } => {
                assert_eq!(partner, ghost);
                assert_eq!(
                    swept, 0,
                    "round {}: sweep and claim both won the entry for {}",
                    round, ghost
                );
            }
            EnqueueOutcome::Pending(session) => {
                assert_eq!(
                    swept, 1,
                    "round {}: the entry for {} vanished without a sweep",
                    round, ghost
                );
                assert!(system.engine.cancel_user(&hunter).await.unwrap());
                assert_eq!(session.outcome().await.unwrap(), MatchOutcome::Cancelled);
            }
        }

        assert_eq!(system.engine.waiting_count().await.unwrap(), 0);
    }

    println!("✅ Sweep versus claim race test passed");
}
