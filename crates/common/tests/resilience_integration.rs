//! Integration tests for the resilience module
//!
//! Exercises each guard through its public API with the timing scenarios
//! the service depends on. Time runs on a paused tokio clock, so delays are
//! exact and the suite finishes instantly.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketpulse_common::resilience::{
    policies, retry_with_strategy, BackoffScheduler, BoundedConcurrencyGate, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, ConsistencyWaiter, ResilienceError, RetryStrategy,
    SlidingWindowRateLimiter,
};
use tokio::time::Instant;

/// Custom error type for testing
#[derive(Debug, Clone)]
struct TestError {
    message: String,
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

fn failure() -> TestError {
    TestError { message: "upstream 503".to_string() }
}

/// Validates the limiter admits three requests per second.
///
/// # Test Steps
/// 1. Issue three requests at t=0, all admitted
/// 2. Fourth request at t=0 denied with a positive retry-after
/// 3. Advance exactly one window and confirm admission resumes
#[tokio::test(start_paused = true)]
async fn test_rate_limiter_three_per_second() {
    let limiter = SlidingWindowRateLimiter::new(3, Duration::from_millis(1000)).unwrap();

    assert!(limiter.is_allowed());
    assert!(limiter.is_allowed());
    assert!(limiter.is_allowed());
    assert!(!limiter.is_allowed());

    let retry_after = limiter.retry_after();
    assert!(retry_after > Duration::ZERO);
    assert!(retry_after <= Duration::from_millis(1000));

    tokio::time::advance(Duration::from_millis(1000)).await;
    assert!(limiter.is_allowed());
}

/// Validates the breaker lifecycle with threshold 3, timeout 1000ms and two
/// successes to close.
///
/// # Test Steps
/// 1. Three consecutive failures open the breaker
/// 2. A call 500ms later is rejected without running the operation
/// 3. A call after 1000ms runs as a half-open trial
/// 4. Two consecutive successes close the breaker
/// 5. Reopen, then a single half-open failure reopens it again
#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_lifecycle() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .timeout(Duration::from_millis(1000))
        .success_threshold(2)
        .build()
        .unwrap();
    let breaker = CircuitBreaker::new(config).unwrap().named("quotes");
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let result = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(500)).await;
    let counter = Arc::clone(&invocations);
    let rejected = breaker
        .execute(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await;
    assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(500)).await;
    for _ in 0..2 {
        let counter = Arc::clone(&invocations);
        breaker
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await
            .unwrap();
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(breaker.state(), CircuitState::Closed);

    for _ in 0..3 {
        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
    }
    tokio::time::advance(Duration::from_millis(1000)).await;
    let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.retry_after(), Duration::from_millis(1000));
}

/// Validates the gate with a limit of two and five 100ms tasks.
///
/// # Test Steps
/// 1. Spawn five tasks through a gate of two
/// 2. Track the number running at any moment
/// 3. Confirm the peak never exceeds two and all five finish in 300ms
#[tokio::test(start_paused = true)]
async fn test_concurrency_gate_two_of_five() {
    let gate = BoundedConcurrencyGate::new(2).unwrap();
    let live = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let gate = gate.clone();
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                gate.execute(|| async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TestError>(i)
                })
                .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap().unwrap());
    }
    results.sort_unstable();

    assert_eq!(results, vec![0, 1, 2, 3, 4]);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
    assert_eq!(gate.metrics().completed, 5);
}

/// Validates the backoff bands for base 500ms and max 10s.
#[test]
fn test_backoff_bands() {
    let base = Duration::from_millis(500);
    let max = Duration::from_millis(10_000);
    for _ in 0..500 {
        let first = BackoffScheduler::delay(1, base, max);
        assert!((Duration::from_millis(400)..=Duration::from_millis(600)).contains(&first));

        let capped = BackoffScheduler::delay(6, base, max);
        assert!((Duration::from_millis(8_000)..=Duration::from_millis(12_000)).contains(&capped));
    }
}

/// Validates the waiter returns true as soon as the predicate holds and
/// false once the timeout runs out.
///
/// # Test Steps
/// 1. Predicate turns true on the third poll; waiter returns true
/// 2. Predicate never turns true with a 2s timeout; waiter keeps polling
///    for the whole budget and returns false exactly at 2s
#[tokio::test(start_paused = true)]
async fn test_consistency_waiter_success_and_timeout() {
    let waiter = ConsistencyWaiter::new();
    let polls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&polls);
    let consistent = waiter
        .wait_until(
            move || {
                let counter = Arc::clone(&counter);
                async move { counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 }
            },
            &RetryStrategy::STANDARD,
        )
        .await;
    assert!(consistent);
    assert_eq!(polls.load(Ordering::SeqCst), 3);

    let strategy =
        RetryStrategy::STANDARD.with_max_retries(50).with_timeout(Duration::from_secs(2));
    let started = Instant::now();
    let consistent = waiter.wait_until(|| async { false }, &strategy).await;
    assert!(!consistent);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

/// Validates that guards compose: a retry loop wrapping a breaker sees the
/// breaker open and keeps retrying past it.
///
/// # Test Steps
/// 1. Breaker with threshold 2 and a 1s timeout
/// 2. Operation fails twice, then succeeds
/// 3. Retry helper with AlwaysRetry rides out the open window
#[tokio::test(start_paused = true)]
async fn test_retry_rides_out_open_breaker() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .timeout(Duration::from_secs(1))
            .success_threshold(1)
            .build()
            .unwrap(),
    )
    .unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let rejections = Arc::new(Mutex::new(0_u32));

    let strategy = RetryStrategy::new(
        10,
        Duration::from_millis(300),
        Duration::from_millis(600),
        Duration::from_secs(10),
    )
    .unwrap();

    let result = retry_with_strategy(strategy, policies::AlwaysRetry, || {
        let breaker = breaker.clone();
        let calls = Arc::clone(&calls);
        let rejections = Arc::clone(&rejections);
        async move {
            let outcome = breaker
                .execute(|| async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failure())
                    } else {
                        Ok("tick")
                    }
                })
                .await;
            if matches!(outcome, Err(ResilienceError::CircuitOpen { .. })) {
                *rejections.lock().unwrap() += 1;
            }
            outcome
        }
    })
    .await;

    assert_eq!(result.unwrap(), "tick");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(*rejections.lock().unwrap() >= 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
