//! Jittered exponential backoff, shared by the single-item fast path
//! (`spec.md` §4.4) and `Transaction::run`'s retry loop (`spec.md` §4.6).
//!
//! Both call sites use the same formula, `min(base * 2^attempt, cap) * (1 ±
//! 10%)` (`spec.md` §8 invariant 6), so it lives in one place rather than
//! being duplicated per caller.

use rand::Rng;
use std::time::Duration;

/// Computes the backoff duration for `attempt` (0-indexed), jittered by up
/// to ±10%.
#[must_use]
pub fn jittered(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let unjittered = base
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(cap)
        .min(cap);
    let jitter_fraction = rand::thread_rng().gen_range(-0.1..=0.1);
    let nanos = unjittered.as_nanos() as f64 * (1.0 + jitter_fraction);
    Duration::from_nanos(nanos.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_max_backoff() {
        let base = Duration::from_millis(40);
        let cap = Duration::from_millis(200);
        for attempt in 0..10 {
            let delay = jittered(base, cap, attempt);
            assert!(delay <= cap.mul_f64(1.1) + Duration::from_nanos(1));
        }
    }

    #[test]
    fn grows_exponentially_before_cap() {
        let base = Duration::from_millis(10);
        let cap = Duration::from_secs(10);
        let d0 = jittered(base, cap, 0);
        let d3 = jittered(base, cap, 3);
        // even with jitter, 2^3 growth should clearly dominate the +-10% noise
        assert!(d3.as_secs_f64() > d0.as_secs_f64() * 2.0);
    }
}
