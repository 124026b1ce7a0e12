use std::time::Duration as StdDuration;

use meshcert::monitoring::{severity_for, SeverityThresholds};
use meshcert::pki::ValidationReason;
use meshcert::retry::RetryConfig;
use proptest::prelude::*;

proptest! {
    #[test]
    fn severity_never_drops_as_expiry_nears(later in -400i64..400, earlier_by in 0i64..400) {
        let thresholds = SeverityThresholds::default();
        let further = severity_for(later, ValidationReason::Ok, &thresholds);
        let closer = severity_for(later - earlier_by, ValidationReason::Ok, &thresholds);
        prop_assert!(closer >= further, "{:?} at {}d < {:?} at {}d", closer, later - earlier_by, further, later);
    }

    #[test]
    fn trust_failures_are_always_critical(remaining in -400i64..400) {
        let thresholds = SeverityThresholds::default();
        for reason in [ValidationReason::ChainMismatch, ValidationReason::IdentityMismatch, ValidationReason::Expired] {
            prop_assert_eq!(
                severity_for(remaining, reason, &thresholds),
                Some(meshcert::monitoring::AlertSeverity::Critical)
            );
        }
    }

    #[test]
    fn backoff_is_bounded_and_non_decreasing(
        initial_ms in 1u64..1_000,
        max_ms in 1u64..60_000,
        attempts in 1u32..20,
    ) {
        let config = RetryConfig {
            max_attempts: attempts,
            initial_backoff: StdDuration::from_millis(initial_ms),
            max_backoff: StdDuration::from_millis(max_ms),
            backoff_multiplier: 2.0,
        };

        let mut previous = StdDuration::ZERO;
        for attempt in 0..attempts {
            let delay = config.backoff_for_attempt(attempt);
            prop_assert!(delay <= config.max_backoff);
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }
}
