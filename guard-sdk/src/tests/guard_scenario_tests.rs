//! Scenario tests for guarded calls
//!
//! These tests drive a `GuardedCaller` through breaker transitions on a
//! paused clock and check what the monitor saw along the way.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::classifier::FailureKind;
    use crate::error::{GuardError, ServiceError};
    use crate::guard::{CallOptions, GuardedCaller};
    use crate::monitor::{MonitorRecord, RecordingSink, ServiceEvent};
    use crate::resilience::{BreakerState, CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
    use crate::transport::{MockTransport, TransportRequest, TransportResponse};

    fn guard_with(sink: Arc<RecordingSink>, threshold: u32, open_timeout: Duration) -> GuardedCaller {
        GuardedCaller::builder("warehouse")
            .breaker_config(CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout,
            })
            .rate_limit(RateLimiterConfig::with_min_interval(Duration::ZERO))
            .sink(sink)
            .no_timeout()
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_recover_end_to_end() {
        let sink = Arc::new(RecordingSink::new());
        let guard = guard_with(sink.clone(), 3, Duration::from_secs(1));
        let invocations = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&invocations);
            let err = guard
                .call("EXECUTE_SQL", CallOptions::new(), || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("Connection refused by warehouse")
                })
                .await
                .unwrap_err();
            assert_eq!(err.kind(), Some(FailureKind::ConnectionError));
        }
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        // call #4 inside the open window
        tokio::time::advance(Duration::from_millis(500)).await;
        let counter = Arc::clone(&invocations);
        let err = guard
            .call("EXECUTE_SQL", CallOptions::new(), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(guard.monitor().snapshot().total_attempts, 3);

        // call #5 after the timeout is the half-open trial
        tokio::time::advance(Duration::from_millis(600)).await;
        let rows = guard
            .call("EXECUTE_SQL", CallOptions::new(), || async { Ok::<_, String>(vec![1, 2, 3]) })
            .await
            .unwrap();
        assert_eq!(rows, vec![1, 2, 3]);

        assert_eq!(guard.breaker().state(), BreakerState::Closed);
        assert_eq!(guard.breaker().failure_count(), 0);

        let snapshot = guard.monitor().snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.total_attempts, 4);
        assert_eq!(snapshot.total_failures, 3);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(sink.count("SERVICE_RECOVERY"), 1);
        assert_eq!(sink.count("WAREHOUSE_CONSECUTIVE_FAILURES"), 1);

        let downtime = sink
            .records()
            .into_iter()
            .find_map(|record| match record {
                MonitorRecord::Event(ServiceEvent::ServiceRecovery {
                    downtime_duration_seconds,
                    ..
                }) => Some(downtime_duration_seconds),
                _ => None,
            })
            .unwrap();
        assert!(downtime >= 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_breaker() {
        let sink = Arc::new(RecordingSink::new());
        let guard = guard_with(sink, 1, Duration::from_secs(5));

        let _ = guard
            .call("READ", CallOptions::new(), || async { Err::<(), _>("HTTP 503") })
            .await;
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        let err = guard
            .call("READ", CallOptions::new(), || async { Err::<(), _>("still 503") })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::HttpError));
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        // the timer was refreshed by the failed trial
        tokio::time::advance(Duration::from_secs(1)).await;
        let err = guard
            .call("READ", CallOptions::new(), || async { Ok::<_, String>(()) })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_lets_one_caller_through() {
        let sink = Arc::new(RecordingSink::new());
        let guard = guard_with(sink, 1, Duration::from_secs(1));

        let _ = guard
            .call("READ", CallOptions::new(), || async { Err::<(), _>("timed out") })
            .await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let trial = guard.call("READ", CallOptions::new(), || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>("trial")
        });
        let competitor = guard.call("READ", CallOptions::new(), || async { Ok::<_, String>("competitor") });

        let (trial, competitor) = tokio::join!(trial, competitor);
        assert_eq!(trial.unwrap(), "trial");
        assert!(competitor.unwrap_err().is_circuit_open());
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_failure_reports_retry_position() {
        let sink = Arc::new(RecordingSink::new());
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(3)
            .returning(|_| Ok(TransportResponse::new(503, "{\"message\": \"warehouse starting\"}")));

        let guard = GuardedCaller::builder("https://warehouse.example.com")
            .service_name("warehouse")
            .rate_limit(RateLimiterConfig::with_min_interval(Duration::ZERO))
            .retry_config(RetryConfig {
                max_retries: 2,
                backoff_factor: 0.5,
                randomization_factor: 0.0,
                ..RetryConfig::default()
            })
            .transport(Arc::new(transport))
            .sink(sink.clone())
            .build()
            .unwrap();

        let err = guard
            .call_http("EXECUTE_SQL", TransportRequest::get("/statements"), CallOptions::new())
            .await
            .unwrap_err();

        match &err {
            GuardError::Failed { kind, message, .. } => {
                assert_eq!(*kind, FailureKind::HttpError);
                assert!(message.contains("warehouse starting"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let failure = sink
            .records()
            .into_iter()
            .find_map(|record| match record {
                MonitorRecord::Event(ServiceEvent::RequestFailure { error, .. }) => Some(error),
                _ => None,
            })
            .unwrap();
        assert_eq!(failure.retry_attempt, 2);
        assert_eq!(failure.max_retries, 2);
        // retries are resolved inside the client: one attempt on the monitor
        assert_eq!(guard.monitor().snapshot().total_attempts, 1);
        assert_eq!(guard.breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_retries_short() {
        let sink = Arc::new(RecordingSink::new());
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_| Err(ServiceError::network("connection reset")));

        let guard = GuardedCaller::builder("api")
            .rate_limit(RateLimiterConfig::with_min_interval(Duration::ZERO))
            .retry_config(RetryConfig {
                max_retries: 5,
                backoff_factor: 2.0,
                randomization_factor: 0.0,
                ..RetryConfig::default()
            })
            .transport(Arc::new(transport))
            .sink(sink)
            .build()
            .unwrap();

        let err = guard
            .call_http(
                "READ",
                TransportRequest::get("/"),
                CallOptions::new().timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();

        // 2s wait fits, the following 4s wait would not
        assert_eq!(err.kind(), Some(FailureKind::Timeout));
        assert_eq!(guard.breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spaces_calls_per_operation() {
        let sink = Arc::new(RecordingSink::new());
        let guard = GuardedCaller::builder("api")
            .rate_limit(RateLimiterConfig::with_min_interval(Duration::from_secs(1)))
            .sink(sink)
            .build()
            .unwrap();

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            guard
                .call("READ", CallOptions::new(), || async { Ok::<_, String>(()) })
                .await
                .unwrap();
        }
        // a different operation has its own key
        guard
            .call("WRITE", CallOptions::new(), || async { Ok::<_, String>(()) })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100));
    }
}
