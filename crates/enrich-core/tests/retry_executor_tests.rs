use enrich_core::{execute_with_retry, EnrichError, RemoteCallResult, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_transport_errors_exhaust_budget() {
    for max_attempts in 1..=5u32 {
        let policy = RetryPolicy::new(max_attempts).unwrap();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = execute_with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { RemoteCallResult::<String>::TransportError("503 Service Unavailable".into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
        let expected_sleep: u64 = (1..max_attempts).map(|n| 2u64.pow(n)).sum();
        assert_eq!(start.elapsed(), Duration::from_secs(expected_sleep));
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_payload_is_retried_like_transport_error() {
    let policy = RetryPolicy::new(3).unwrap();
    let start = Instant::now();
    let calls = AtomicU32::new(0);

    let err = execute_with_retry(&policy, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { RemoteCallResult::Success(String::new()) }
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(6));
    match err {
        EnrichError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_success_after_two_failures() {
    let policy = RetryPolicy::default();
    let start = Instant::now();
    let mut seen = Vec::new();

    let topic = execute_with_retry(&policy, |attempt| {
        seen.push((attempt, start.elapsed()));
        async move {
            if attempt < 3 {
                RemoteCallResult::TransportError("connection reset by peer".into())
            } else {
                RemoteCallResult::Success("Memory safety".to_string())
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(topic, "Memory safety");
    assert_eq!(
        seen,
        vec![
            (1, Duration::ZERO),
            (2, Duration::from_secs(2)),
            (3, Duration::from_secs(6)),
        ]
    );
    assert_eq!(start.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_carries_last_failure() {
    let policy = RetryPolicy::new(2).unwrap();
    let err = execute_with_retry(&policy, |attempt| async move {
        RemoteCallResult::<Vec<f32>>::TransportError(format!("timeout on attempt {attempt}"))
    })
    .await
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Giving up after 2 attempts"));
    assert!(message.contains("timeout on attempt 2"));
}
