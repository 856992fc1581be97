//! Exponential backoff with jitter for reconnect scheduling.
//!
//! Formula: `min(cap, base * 2^attempt) * (1 + (random * 2 - 1) * jitter)`
//! where `random` is drawn from `[0, 1)`. A jitter factor of 0.2 varies the
//! delay by ±20% so mass reconnects spread out instead of herding.

use std::time::Duration;

use crate::config::SessionTuning;

/// Backoff delay in ms for the zero-based reconnect `attempt`, with the
/// randomness supplied by the caller.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn delay_ms_with_random(
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

/// Jittered backoff delay for the zero-based reconnect `attempt`.
pub fn delay(attempt: u32, tuning: &SessionTuning) -> Duration {
    let ms = delay_ms_with_random(
        attempt,
        tuning.backoff_base_ms,
        tuning.backoff_max_ms,
        tuning.jitter_factor,
        rand::random::<f64>(),
    );
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Defaults under test: base 500ms, doubling, 30s cap, ±20% jitter.

    #[test]
    fn delay_doubles_per_attempt_without_jitter() {
        assert_eq!(delay_ms_with_random(0, 500, 30_000, 0.0, 0.5), 500);
        assert_eq!(delay_ms_with_random(1, 500, 30_000, 0.0, 0.5), 1000);
        assert_eq!(delay_ms_with_random(2, 500, 30_000, 0.0, 0.5), 2000);
        assert_eq!(delay_ms_with_random(3, 500, 30_000, 0.0, 0.5), 4000);
    }

    #[test]
    fn delay_caps_at_max() {
        assert_eq!(delay_ms_with_random(10, 500, 30_000, 0.0, 0.5), 30_000);
    }

    #[test]
    fn jitter_is_symmetric_around_the_base() {
        // random = 0.0 maps to -jitter, 0.5 to none, ~1.0 to +jitter
        assert_eq!(delay_ms_with_random(0, 1000, 30_000, 0.2, 0.0), 800);
        assert_eq!(delay_ms_with_random(0, 1000, 30_000, 0.2, 0.5), 1000);
        assert_eq!(delay_ms_with_random(0, 1000, 30_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn high_attempt_does_not_overflow() {
        let ms = delay_ms_with_random(200, 500, 30_000, 0.2, 0.9);
        assert!(ms > 0);
        assert!(ms <= 36_000);
    }

    #[test]
    fn delay_stays_within_jitter_bounds() {
        let tuning = SessionTuning::default();
        for attempt in 0..6 {
            let base = 500u64.saturating_mul(1 << attempt).min(30_000);
            let d = delay(attempt, &tuning).as_millis() as u64;
            assert!(d >= base * 8 / 10, "attempt {attempt}: {d} below jitter floor");
            assert!(d <= base * 12 / 10, "attempt {attempt}: {d} above jitter ceiling");
        }
    }
}
