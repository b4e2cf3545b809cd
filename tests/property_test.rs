//! Property tests for the rate limiter and run tracker contracts

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use fleetcron::cache::{Cache, MemoryBackend};
use fleetcron::dispatch::{RunTracker, StatsAggregator};
use fleetcron::security::RateLimiter;

fn limiter() -> RateLimiter {
    RateLimiter::new(Cache::new(Arc::new(MemoryBackend::new()), "prop"))
}

fn tracker() -> (RunTracker, StatsAggregator) {
    let cache = Cache::new(Arc::new(MemoryBackend::new()), "prop");
    let stats = StatsAggregator::new(cache.clone());
    (RunTracker::new(cache, stats.clone()), stats)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Within one window, admitted calls never exceed max_requests, and up
    /// to max_requests calls are always admitted.
    #[test]
    fn rate_limiter_caps_admissions(max in 1usize..20, attempts in 1usize..60) {
        let result: Result<(), TestCaseError> = tokio_test::block_on(async {
            let limiter = limiter();
            let window = Duration::from_secs(300);

            let mut admitted = 0usize;
            for _ in 0..attempts {
                if limiter.admit("client", max, window).await.unwrap() {
                    admitted += 1;
                }
            }

            prop_assert_eq!(admitted, attempts.min(max));
            Ok(())
        });
        result?;
    }

    /// One client exhausting its window never affects another client.
    #[test]
    fn rate_limiter_isolates_clients(max in 1usize..10) {
        let result: Result<(), TestCaseError> = tokio_test::block_on(async {
            let limiter = limiter();
            let window = Duration::from_secs(300);

            for _ in 0..(max * 2) {
                let _ = limiter.admit("greedy", max, window).await.unwrap();
            }
            prop_assert!(!limiter.admit("greedy", max, window).await.unwrap());
            prop_assert!(limiter.admit("other", max, window).await.unwrap());
            Ok(())
        });
        result?;
    }

    /// For a batch expecting N tasks, finalization fires exactly once after
    /// the Nth increment, and the cumulative stats grow by exactly N.
    #[test]
    fn tracker_finalizes_exactly_once(n in 1u64..64) {
        let result: Result<(), TestCaseError> = tokio_test::block_on(async {
            let (tracker, stats) = tracker();
            tracker.start("run-p", n).await.unwrap();

            let mut finalizations = 0usize;
            for _ in 0..n {
                tracker.increment(Some("run-p")).await.unwrap();
                if tracker.maybe_finalize().await.unwrap().is_some() {
                    finalizations += 1;
                }
            }

            prop_assert_eq!(finalizations, 1);

            let network = stats.read().await.unwrap();
            prop_assert_eq!(network.total_runs, 1);
            prop_assert_eq!(network.total_sites_processed, n);
            prop_assert_eq!(network.sites_processed_last_run, n);
            Ok(())
        });
        result?;
    }

    /// Foreign-run increments interleaved anywhere in the sequence never
    /// advance the live batch.
    #[test]
    fn tracker_ignores_foreign_increments(n in 1u64..32, noise in 0u64..32) {
        let result: Result<(), TestCaseError> = tokio_test::block_on(async {
            let (tracker, _) = tracker();
            tracker.start("run-live", n).await.unwrap();

            for i in 0..noise {
                tracker.increment(Some(&format!("run-stale-{i}"))).await.unwrap();
            }

            for _ in 0..(n - 1) {
                tracker.increment(Some("run-live")).await.unwrap();
            }
            prop_assert!(tracker.maybe_finalize().await.unwrap().is_none());

            tracker.increment(Some("run-live")).await.unwrap();
            prop_assert!(tracker.maybe_finalize().await.unwrap().is_some());
            Ok(())
        });
        result?;
    }
}
