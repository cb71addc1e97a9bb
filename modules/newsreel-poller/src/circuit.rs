//! Per-feed circuit breaker arithmetic. The state itself is the
//! persisted `FeedPollState`; these functions are the only writers of its
//! failure fields.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use newsreel_common::FeedPollState;

/// Longest a circuit stays open regardless of failure count.
const MAX_COOLDOWN_HOURS: i64 = 24;

/// Record a successful poll: failures reset, circuit closes.
pub fn record_success(state: &mut FeedPollState, now: DateTime<Utc>) {
    state.consecutive_failures = 0;
    state.circuit_open_until = None;
    state.last_polled_at = Some(now);
    state.last_success_at = Some(now);
}

/// Record a failed poll. Once failures reach `threshold` the circuit
/// opens; each further failure doubles the cooldown up to a cap.
/// Returns true when this call opened (or re-opened) the circuit.
pub fn record_failure(
    state: &mut FeedPollState,
    threshold: u32,
    base_cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    state.consecutive_failures += 1;
    state.last_polled_at = Some(now);

    if state.consecutive_failures < threshold {
        return false;
    }

    let exponent = (state.consecutive_failures - threshold).min(16);
    let cooldown = std::cmp::min(
        base_cooldown * 2_i32.pow(exponent),
        Duration::hours(MAX_COOLDOWN_HOURS),
    );
    state.circuit_open_until = Some(now + cooldown);
    warn!(
        feed_id = %state.feed_id,
        failures = state.consecutive_failures,
        cooldown_minutes = cooldown.num_minutes(),
        "Circuit breaker opened"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state() -> FeedPollState {
        FeedPollState {
            feed_id: "bbc-top".to_string(),
            feed_url: "https://feeds.bbci.co.uk/news/rss.xml".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn opens_at_threshold_with_base_cooldown() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut s = state();
        assert!(!record_failure(&mut s, 3, Duration::minutes(30), now));
        assert!(!record_failure(&mut s, 3, Duration::minutes(30), now));
        assert!(s.circuit_open_until.is_none());

        assert!(record_failure(&mut s, 3, Duration::minutes(30), now));
        assert_eq!(s.circuit_open_until, Some(now + Duration::minutes(30)));
        assert!(s.circuit_is_open(now + Duration::minutes(29)));
        assert!(!s.circuit_is_open(now + Duration::minutes(31)));
    }

    #[test]
    fn cooldown_doubles_and_caps() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut s = state();
        for _ in 0..4 {
            record_failure(&mut s, 3, Duration::minutes(30), now);
        }
        // threshold + 1 extra failure: 30 min * 2
        assert_eq!(s.circuit_open_until, Some(now + Duration::minutes(60)));

        for _ in 0..20 {
            record_failure(&mut s, 3, Duration::minutes(30), now);
        }
        assert_eq!(s.circuit_open_until, Some(now + Duration::hours(24)));
    }

    #[test]
    fn success_closes_circuit() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut s = state();
        for _ in 0..3 {
            record_failure(&mut s, 3, Duration::minutes(30), now);
        }
        record_success(&mut s, now + Duration::hours(1));
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.circuit_open_until.is_none());
        assert_eq!(s.last_success_at, Some(now + Duration::hours(1)));
    }
}
