//! Property-based tests for reconnect backoff
//!
//! - Delays never decrease within a failure run
//! - Delays never exceed the cap
//! - Capped policy stops after exactly `max_attempts`
//! - A reset always restarts at the floor

use super::backoff::{Backoff, BackoffConfig, ReconnectPolicy};
use proptest::prelude::*;
use std::time::Duration;

fn arb_config() -> impl Strategy<Value = BackoffConfig> {
    (
        1u64..5_000,
        0u64..600_000,
        1.0f64..4.0,
        1u32..40,
        1u32..40,
        prop_oneof![Just(ReconnectPolicy::Capped), Just(ReconnectPolicy::Unbounded)],
    )
        .prop_map(|(floor_ms, extra_ms, growth_factor, max_attempts, startup_attempts, policy)| {
            BackoffConfig {
                policy,
                floor: Duration::from_millis(floor_ms),
                cap: Duration::from_millis(floor_ms + extra_ms),
                growth_factor,
                max_attempts,
                startup_attempts,
            }
        })
}

proptest! {
    /// Property: delays are monotonic and bounded by [floor, cap]
    #[test]
    fn delays_monotonic_and_capped(config in arb_config(), steps in 1usize..100) {
        let mut backoff = Backoff::new(config.clone());
        backoff.reset();

        let mut previous = Duration::ZERO;
        for _ in 0..steps {
            let Some(delay) = backoff.next_delay() else { break };
            prop_assert!(delay >= previous, "delay decreased: {:?} -> {:?}", previous, delay);
            prop_assert!(delay <= config.cap);
            prop_assert!(delay >= config.floor);
            previous = delay;
        }
    }

    /// Property: capped policy yields exactly max_attempts delays once established
    #[test]
    fn capped_policy_yields_max_attempts(config in arb_config()) {
        let config = BackoffConfig { policy: ReconnectPolicy::Capped, ..config };
        let mut backoff = Backoff::new(config.clone());
        backoff.reset();

        let count = std::iter::from_fn(|| backoff.next_delay()).count();
        prop_assert_eq!(count as u32, config.max_attempts);
        prop_assert!(backoff.is_exhausted());
    }

    /// Property: before the first open no policy exceeds startup_attempts
    #[test]
    fn startup_is_bounded(config in arb_config()) {
        let mut backoff = Backoff::new(config.clone());
        let count = std::iter::from_fn(|| backoff.next_delay()).take(1_000).count();
        prop_assert!(count as u32 <= config.startup_attempts);
    }

    /// Property: reset always returns to the floor
    #[test]
    fn reset_restarts_at_floor(config in arb_config(), failures in 0usize..20) {
        let mut backoff = Backoff::new(config.clone());
        backoff.reset();
        for _ in 0..failures {
            backoff.next_delay();
        }

        backoff.reset();
        prop_assert_eq!(backoff.attempts(), 0);
        prop_assert_eq!(backoff.next_delay(), Some(config.floor));
    }
}
