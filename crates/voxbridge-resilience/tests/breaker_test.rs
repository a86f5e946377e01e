use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voxbridge_resilience::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};

fn default_breaker() -> CircuitBreaker {
    CircuitBreaker::new("orchestrator", BreakerConfig::default())
}

async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), BreakerError<String>> {
    cb.call(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("boom".to_string())
    })
    .await
}

async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<u32, BreakerError<String>> {
    cb.call(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(7)
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn test_opens_after_max_failures_and_fails_fast() {
    let cb = default_breaker();
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let err = fail(&cb, &calls).await.unwrap_err();
        assert!(matches!(err, BreakerError::Inner(ref msg) if msg == "boom"));
    }
    assert_eq!(cb.state(), BreakerState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    // Sixth call is rejected without running the operation.
    let err = succeed(&cb, &calls).await.unwrap_err();
    assert!(err.is_open());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_success_closes() {
    let cb = default_breaker();
    let calls = AtomicU32::new(0);
    for _ in 0..5 {
        let _ = fail(&cb, &calls).await;
    }

    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(cb.state(), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cb.state(), BreakerState::HalfOpen);

    assert_eq!(succeed(&cb, &calls).await.unwrap(), 7);
    assert_eq!(cb.state(), BreakerState::Closed);
    assert_eq!(cb.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_and_restarts_timer() {
    let cb = default_breaker();
    let calls = AtomicU32::new(0);
    for _ in 0..5 {
        let _ = fail(&cb, &calls).await;
    }

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(cb.state(), BreakerState::HalfOpen);

    let err = fail(&cb, &calls).await.unwrap_err();
    assert!(!err.is_open());
    assert_eq!(cb.state(), BreakerState::Open);

    // The timer restarted at the trial failure.
    tokio::time::advance(Duration::from_secs(15)).await;
    assert_eq!(cb.state(), BreakerState::Open);
    tokio::time::advance(Duration::from_secs(15)).await;
    assert_eq!(cb.state(), BreakerState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_single_trial() {
    let cb = Arc::new(CircuitBreaker::new(
        "tts",
        BreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(1),
        },
    ));
    cb.record_result(false);
    tokio::time::advance(Duration::from_secs(1)).await;

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let trial = {
        let cb = Arc::clone(&cb);
        tokio::spawn(async move {
            cb.call(|| async move {
                let _ = release_rx.await;
                Ok::<_, String>(())
            })
            .await
        })
    };
    tokio::task::yield_now().await;

    // A second caller is rejected while the trial is in flight.
    assert!(!cb.allow());

    release_tx.send(()).unwrap();
    trial.await.unwrap().unwrap();
    assert_eq!(cb.state(), BreakerState::Closed);
    assert!(cb.allow());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_trial_releases_slot() {
    let cb = CircuitBreaker::new(
        "stt",
        BreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_secs(1),
        },
    );
    cb.record_result(false);
    tokio::time::advance(Duration::from_secs(1)).await;

    let pending = cb.call(|| std::future::pending::<Result<(), String>>());
    let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
    assert!(timed_out.is_err());

    assert_eq!(cb.state(), BreakerState::HalfOpen);
    assert!(cb.allow());
}

#[tokio::test]
async fn test_concurrent_failures_count_exactly() {
    let cb = Arc::new(CircuitBreaker::new(
        "stt",
        BreakerConfig {
            max_failures: 1000,
            reset_timeout: Duration::from_secs(30),
        },
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cb = Arc::clone(&cb);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                cb.record_result(false);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cb.failure_count(), 400);
    assert_eq!(cb.state(), BreakerState::Closed);
}
