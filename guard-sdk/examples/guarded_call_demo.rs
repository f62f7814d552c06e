//! Guarded Call Demo
//!
//! This example drives a flaky in-process "warehouse" through a
//! `GuardedCaller` to show the breaker opening, the fallback path while it
//! is open, and recovery after the open timeout.
//!
//! Run with `RUST_LOG=info` to see the monitor's structured events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use guard_sdk::{
    logging::{init_logging, LoggingConfig},
    monitor::TracingSink,
    resilience::{CircuitBreakerConfig, RateLimiterConfig},
    CallOptions, EventFormat, Guarded, Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LoggingConfig::default())?;

    println!("Guarded Call Demo");
    println!("=================\n");

    let guard = guard_sdk::guard("warehouse.example.com")
        .service_name("demo-warehouse")
        .breaker_config(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(2),
        })
        .rate_limit(RateLimiterConfig::with_min_interval(Duration::from_millis(100)))
        .timeout(Duration::from_secs(1))
        .sink(Arc::new(TracingSink::new(EventFormat::Expanded)))
        .build()?;

    // fails for the first three calls, then recovers
    let calls = Arc::new(AtomicUsize::new(0));

    for round in 1..=6 {
        if round == 5 {
            println!("\nWaiting for the open timeout...\n");
            tokio::time::sleep(Duration::from_millis(2100)).await;
        }

        let counter = Arc::clone(&calls);
        let result = guard
            .call_with_fallback(
                "EXECUTE_SQL",
                CallOptions::new().context("round", round),
                move || async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 3 {
                        Err(format!("Connection refused (attempt {})", n))
                    } else {
                        Ok(vec![n; 3])
                    }
                },
            )
            .await;

        match result {
            Ok(Guarded::Available(rows)) => println!("Round {}: rows {:?}", round, rows),
            Ok(Guarded::Unavailable(fallback)) => println!("Round {}: fallback ({})", round, fallback.message),
            Err(e) => println!("Round {}: failed: {}", round, e),
        }
        println!("  breaker: {:?}", guard.breaker().state());
    }

    let snapshot = guard.monitor().snapshot();
    println!("\nFinal monitor snapshot:");
    println!("  attempts: {}", snapshot.total_attempts);
    println!("  failures: {}", snapshot.total_failures);
    println!("  rejected: {}", snapshot.rejected);
    println!("  failure rate: {:.2}", snapshot.failure_rate);

    Ok(())
}
