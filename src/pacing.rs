//! Minimum-interval pacing between iterations.

use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Time still owed before the next iteration may start. Zero once the
/// iteration itself took `min_delay` or longer; there is no catch-up.
pub fn remainder(iteration_start: Instant, min_delay: Duration, now: Instant) -> Duration {
    min_delay.saturating_sub(now.saturating_duration_since(iteration_start))
}

/// Sleep out the rest of `min_delay` measured from `iteration_start`.
pub async fn sleep_remainder(iteration_start: Instant, min_delay: Duration) {
    let owed = remainder(iteration_start, min_delay, Instant::now());
    if !owed.is_zero() {
        sleep(owed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remainder() {
        let start = Instant::now();
        let delay = Duration::from_millis(100);
        assert_eq!(remainder(start, delay, start), delay);
        assert_eq!(
            remainder(start, delay, start + Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(
            remainder(start, delay, start + Duration::from_millis(250)),
            Duration::ZERO
        );
        assert_eq!(remainder(start, Duration::ZERO, start), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_remainder_waits_out_min_delay() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(40)).await;
        sleep_remainder(start, Duration::from_millis(100)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_when_iteration_overran() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(150)).await;
        let before = Instant::now();
        sleep_remainder(start, Duration::from_millis(100)).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
