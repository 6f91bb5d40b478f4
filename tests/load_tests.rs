//! High concurrency stress tests for pair request processing
//!
//! These tests validate system responsiveness under high load and ensure
//! pairing stays consistent when hundreds of sessions resolve at once.

mod fixtures;

use fixtures::{assert_pairs_are_symmetric, create_test_system_with_timeout, Resolution};
use futures::future::join_all;
use std::time::{Duration, Instant};
use switchboard::pairing::{EnqueueOutcome, PairingEngine};
use switchboard::types::{MatchOutcome, UserId};

/// Enqueue a user and drive their session to its terminal outcome
async fn enqueue_and_resolve(
    engine: PairingEngine,
    user: UserId,
) -> switchboard::Result<Resolution> {
    match engine.enqueue(user.clone()).await? {
        EnqueueOutcome::Matched { partner } => Ok((user, Some(partner))),
        EnqueueOutcome::Pending(session) => match session.outcome().await? {
            MatchOutcome::Matched { partner } => Ok((user, Some(partner))),
            MatchOutcome::TimedOut | MatchOutcome::Cancelled => Ok((user, None)),
        },
    }
}

#[tokio::test]
async fn test_100_concurrent_pair_requests() {
    let system = create_test_system_with_timeout(3);
    let concurrent_requests = 100;

    let start_time = Instant::now();

    let handles: Vec<_> = (0..concurrent_requests)
        .map(|i| {
            let engine = system.engine.clone();
            tokio::spawn(enqueue_and_resolve(engine, format!("load_user_{}", i)))
        })
        .collect();

    let results = join_all(handles).await;
    let duration = start_time.elapsed();

    let mut successful_requests = 0;
    let mut resolutions: Vec<Resolution> = Vec::new();
    for result in results {
        match result {
            Ok(Ok(resolution)) => {
                successful_requests += 1;
                resolutions.push(resolution);
            }
            Ok(Err(e)) => eprintln!("Pair request failed: {}", e),
            Err(e) => eprintln!("Task failed: {}", e),
        }
    }

    assert_eq!(
        successful_requests, concurrent_requests,
        "All requests should succeed"
    );
    assert!(
        duration < Duration::from_secs(10),
        "100 requests should resolve within 10 seconds, took: {:?}",
        duration
    );

    assert_pairs_are_symmetric(&resolutions);
    let matched = resolutions.iter().filter(|(_, p)| p.is_some()).count();
    assert_eq!(matched % 2, 0, "matched users must come in pairs");

    assert_eq!(system.engine.waiting_count().await.unwrap(), 0);
    assert_eq!(system.engine.pending_session_count(), 0);

    let throughput = concurrent_requests as f64 / duration.as_secs_f64();
    println!(
        "✅ 100 concurrent requests test passed - {} paired, throughput: {:.1} requests/sec",
        matched, throughput
    );
}

#[tokio::test]
async fn test_500_requests_in_staggered_batches() {
    let system = create_test_system_with_timeout(3);
    let total_requests: usize = 500;
    let batch_size: usize = 50;

    let start_time = Instant::now();

    // Later batches claim waiters left by earlier ones, so all handles
    // join once at the end instead of per batch.
    let mut handles = Vec::new();
    for batch_start in (0..total_requests).step_by(batch_size) {
        for i in batch_start..batch_start + batch_size {
            let engine = system.engine.clone();
            handles.push(tokio::spawn(enqueue_and_resolve(
                engine,
                format!("stress_user_{}", i),
            )));
        }

        // Small delay between batches to stagger arrivals
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let results = join_all(handles).await;
    let duration = start_time.elapsed();

    let mut successful_requests: usize = 0;
    let mut resolutions: Vec<Resolution> = Vec::new();
    for result in results {
        match result {
            Ok(Ok(resolution)) => {
                successful_requests += 1;
                resolutions.push(resolution);
            }
            Ok(Err(e)) => eprintln!("Pair request failed: {}", e),
            Err(e) => eprintln!("Task failed: {}", e),
        }
    }

    assert_eq!(
        successful_requests, total_requests,
        "All requests should succeed, got {}/{}",
        successful_requests, total_requests
    );
    assert!(
        duration < Duration::from_secs(30),
        "500 requests should resolve within 30 seconds, took: {:?}",
        duration
    );

    assert_pairs_are_symmetric(&resolutions);

    let stats = system.engine.get_stats().await.unwrap();
    assert_eq!(stats.enqueues as usize, total_requests);
    assert_eq!(system.engine.waiting_count().await.unwrap(), 0);
    assert_eq!(system.engine.pending_session_count(), 0);

    let matched = resolutions.iter().filter(|(_, p)| p.is_some()).count();
    let throughput = successful_requests as f64 / duration.as_secs_f64();
    println!(
        "✅ 500 staggered requests test passed - {} paired, throughput: {:.1} requests/sec",
        matched, throughput
    );
}

#[tokio::test]
async fn test_rapid_fire_requests() {
    let system = create_test_system_with_timeout(3);
    let request_count: usize = 200;
    let request_interval = Duration::from_millis(5);

    let start_time = Instant::now();

    let mut handles = Vec::new();
    for i in 0..request_count {
        let engine = system.engine.clone();
        handles.push(tokio::spawn(enqueue_and_resolve(
            engine,
            format!("rapid_fire_user_{}", i),
        )));

        // Small delay between requests
        tokio::time::sleep(request_interval).await;
    }

    let results = join_all(handles).await;
    let duration = start_time.elapsed();

    let resolutions: Vec<Resolution> = results
        .into_iter()
        .map(|result| result.unwrap().unwrap())
        .collect();

    assert_eq!(resolutions.len(), request_count);
    assert_pairs_are_symmetric(&resolutions);

    // Every user that became a waiter announced itself; immediate
    // claimants never do.
    let stats = system.engine.get_stats().await.unwrap();
    assert_eq!(stats.enqueues as usize, request_count);
    assert_eq!(
        system.publisher.count_user_enqueued(),
        (stats.enqueues - stats.immediate_matches) as usize
    );

    println!(
        "✅ Rapid fire requests test passed - {} requests in {:?}",
        request_count, duration
    );
}

#[tokio::test]
async fn test_enqueue_cancel_churn_stays_consistent() {
    let system = create_test_system_with_timeout(5);
    let user_count: usize = 50;

    let mut handles = Vec::new();
    for i in 0..user_count {
        let engine = system.engine.clone();
        let user = format!("churn_user_{}", i);
        handles.push(tokio::spawn(async move {
            match engine.enqueue(user.clone()).await.unwrap() {
                EnqueueOutcome::Matched { partner } => (user, Some(partner)),
                EnqueueOutcome::Pending(session) => {
                    // Withdraw immediately, racing any claim in flight
                    let cancel_won = engine.cancel_user(&user).await.unwrap();
                    match session.outcome().await.unwrap() {
                        MatchOutcome::Matched { partner } => {
                            assert!(!cancel_won, "user {} was cancelled and matched", user);
                            (user, Some(partner))
                        }
                        MatchOutcome::Cancelled => {
                            assert!(cancel_won, "user {} cancelled without winning the race", user);
                            (user, None)
                        }
                        MatchOutcome::TimedOut => {
                            panic!("user {} timed out despite an immediate cancel", user)
                        }
                    }
                }
            }
        }));
    }

    let results: Vec<Resolution> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_pairs_are_symmetric(&results);

    let cancelled = results.iter().filter(|(_, p)| p.is_none()).count();
    let stats = system.engine.get_stats().await.unwrap();
    assert_eq!(stats.cancellations as usize, cancelled);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(system.publisher.count_session_cancelled(), cancelled);
    assert_eq!(system.engine.waiting_count().await.unwrap(), 0);
    assert_eq!(system.engine.pending_session_count(), 0);

    println!(
        "✅ Enqueue cancel churn test passed - {} paired, {} withdrew",
        results.len() - cancelled,
        cancelled
    );
}

#[tokio::test]
async fn test_system_under_sustained_load() {
    let system = create_test_system_with_timeout(1);

    let test_duration = Duration::from_secs(5);
    let request_interval = Duration::from_millis(50);

    let start_time = Instant::now();

    // Generate load on a steady interval, handing the in-flight handles
    // back for a single join once generation stops
    let load_generator = tokio::spawn({
        let engine = system.engine.clone();
        async move {
            let mut interval = tokio::time::interval(request_interval);
            let mut handles = Vec::new();
            let mut counter: usize = 0;

            while start_time.elapsed() < test_duration {
                interval.tick().await;

                let user = format!("sustained_load_user_{}", counter);
                handles.push(tokio::spawn(enqueue_and_resolve(engine.clone(), user)));
                counter += 1;
            }

            (counter, handles)
        }
    });

    let (request_count, handles) = load_generator.await.unwrap();
    let results = join_all(handles).await;
    let actual_duration = start_time.elapsed();

    let mut successful_requests: usize = 0;
    let mut resolutions: Vec<Resolution> = Vec::new();
    for result in results {
        match result {
            Ok(Ok(resolution)) => {
                successful_requests += 1;
                resolutions.push(resolution);
            }
            Ok(Err(e)) => eprintln!("Pair request failed: {}", e),
            Err(e) => eprintln!("Task failed: {}", e),
        }
    }

    let success_rate = successful_requests as f64 / request_count as f64;
    assert!(
        success_rate >= 0.95,
        "Success rate should be at least 95%, got {:.1}%",
        success_rate * 100.0
    );

    // The wait timeout bounds the tail, so the system must wind down
    // shortly after generation stops
    assert!(
        actual_duration <= test_duration + Duration::from_secs(2),
        "System should stay responsive under load, took: {:?}",
        actual_duration
    );

    assert_pairs_are_symmetric(&resolutions);

    let throughput = successful_requests as f64 / actual_duration.as_secs_f64();
    println!(
        "✅ Sustained load test passed - {:.1} req/sec over {:?} ({:.1}% success rate)",
        throughput,
        actual_duration,
        success_rate * 100.0
    );
}
