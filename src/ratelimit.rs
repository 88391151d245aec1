use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

// ------------------------------------------------------------
// Request pacing
// ------------------------------------------------------------
//
// Every data source and every resolver endpoint owns one gate.
// A gate hands out one permit per period and never builds up a
// burst while idle.
//

/// Upper bound on permits per second; keeps the period above zero.
const MAX_PER_SECOND: u32 = 1_000_000;

#[derive(Debug)]
pub struct RateGate {
    period: Duration,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateGate {
    /// At most `per_second` permits per second, clamped to `1..=1_000_000`.
    pub fn per_second(per_second: usize) -> Self {
        let n = u32::try_from(per_second)
            .unwrap_or(u32::MAX)
            .min(MAX_PER_SECOND);
        let n = NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN);

        Self::from_quota(Quota::per_second(n).allow_burst(NonZeroU32::MIN))
    }

    /// One permit every `period`. A zero period falls back to the
    /// fastest gate [`RateGate::per_second`] allows.
    pub fn with_period(period: Duration) -> Self {
        match Quota::with_period(period) {
            Some(quota) => Self::from_quota(quota),
            None => Self::per_second(usize::MAX),
        }
    }

    fn from_quota(quota: Quota) -> Self {
        Self {
            period: quota.replenish_interval(),
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until the next permit is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn permits_are_spaced_by_period() {
        let gate = RateGate::per_second(20);
        assert_eq!(gate.period(), Duration::from_millis(50));

        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(500), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn idle_gate_does_not_accumulate_credit() {
        let gate = RateGate::with_period(Duration::from_millis(50));
        gate.acquire().await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn oversized_rates_are_clamped() {
        for rate in [usize::MAX, (u32::MAX as usize).saturating_add(1), u32::MAX as usize] {
            let gate = RateGate::per_second(rate);
            assert_eq!(gate.period(), Duration::from_micros(1));
            gate.acquire().await;
        }
    }

    #[test]
    fn zero_rate_means_one_per_second() {
        assert_eq!(RateGate::per_second(0).period(), Duration::from_secs(1));
        assert_eq!(RateGate::with_period(Duration::ZERO).period(), Duration::from_micros(1));
    }
}
