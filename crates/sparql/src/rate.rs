//! Per-endpoint request pacing and exponential backoff on throttling.
//!
//! [`RateGovernor`] is shared by every task that talks to an endpoint. Only
//! the counters live behind the lock; HTTP calls never hold it.
//!
//! `await_permission` reserves the next slot only once it is actually
//! permitted to proceed, so a caller cancelled while waiting leaves the state
//! untouched. Outcomes are recorded only by attempts that finished.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use kg_core::config::RateConfig;

/// Backoff parameters. [`RatePolicy::compute_delay`] is pure, so the backoff
/// curve can be checked without any time passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub min_interval: Duration,
    /// Exponent ceiling; the throttle counter stops growing here.
    pub max_exponent: u32,
}

impl RatePolicy {
    pub fn from_config(config: &RateConfig) -> Self {
        let base_delay = Duration::from_millis(config.base_delay_ms);
        let max_delay = Duration::from_millis(config.max_delay_ms);
        Self {
            base_delay,
            max_delay,
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_exponent: exponent_ceiling(base_delay, max_delay),
        }
    }

    /// Delay before the next attempt after `consecutive_throttles` throttled
    /// outcomes in a row: `base * 2^n` capped at `max_delay`, never below the
    /// minimum request spacing.
    pub fn compute_delay(&self, consecutive_throttles: u32) -> Duration {
        if consecutive_throttles == 0 {
            return self.min_interval;
        }
        let exp = consecutive_throttles.min(self.max_exponent);
        let backoff = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        backoff.max(self.min_interval)
    }
}

/// Smallest `n` with `base * 2^n >= max`, kept in `1..=31` so the shift in
/// `compute_delay` stays in range.
fn exponent_ceiling(base: Duration, max: Duration) -> u32 {
    let base = base.as_millis().max(1);
    let ratio = max.as_millis().div_ceil(base).max(1);
    ratio.next_power_of_two().trailing_zeros().clamp(1, 31)
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::from_config(&RateConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateState {
    pub consecutive_throttles: u32,
    pub next_allowed_at: Instant,
}

pub struct RateGovernor {
    policy: RatePolicy,
    states: Mutex<HashMap<String, RateState>>,
}

impl RateGovernor {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    /// Suspend until a request to `endpoint` is permitted, then reserve the
    /// slot by pushing `next_allowed_at` one minimum interval ahead.
    pub async fn await_permission(&self, endpoint: &str) {
        loop {
            let wait_until = {
                let mut states = self.states.lock().await;
                let now = Instant::now();
                let state = states.entry(endpoint.to_string()).or_insert(RateState {
                    consecutive_throttles: 0,
                    next_allowed_at: now,
                });
                if state.next_allowed_at <= now {
                    state.next_allowed_at = now + self.policy.min_interval;
                    return;
                }
                state.next_allowed_at
            };
            debug!(
                endpoint,
                wait_ms = wait_until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate governor delaying request"
            );
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Report how an attempt ended. A throttled outcome grows the backoff; any
    /// other outcome resets the counter immediately.
    pub async fn record_outcome(&self, endpoint: &str, throttled: bool) {
        let mut states = self.states.lock().await;
        let now = Instant::now();
        let state = states.entry(endpoint.to_string()).or_insert(RateState {
            consecutive_throttles: 0,
            next_allowed_at: now,
        });

        if throttled {
            state.consecutive_throttles = (state.consecutive_throttles + 1).min(self.policy.max_exponent);
            let delay = self.policy.compute_delay(state.consecutive_throttles);
            state.next_allowed_at = state.next_allowed_at.max(now + delay);
            warn!(
                endpoint,
                consecutive = state.consecutive_throttles,
                delay_ms = delay.as_millis() as u64,
                "endpoint throttled request; backing off"
            );
        } else if state.consecutive_throttles > 0 {
            debug!(endpoint, "throttle streak cleared");
            state.consecutive_throttles = 0;
        }
    }

    /// Current state for an endpoint, if it has seen any traffic.
    pub async fn snapshot(&self, endpoint: &str) -> Option<RateState> {
        self.states.lock().await.get(endpoint).copied()
    }

    /// Delay the next attempt against `endpoint` would currently be given.
    pub async fn current_delay(&self, endpoint: &str) -> Duration {
        let throttles = self
            .snapshot(endpoint)
            .await
            .map_or(0, |s| s.consecutive_throttles);
        self.policy.compute_delay(throttles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EP: &str = "https://query.example.org/sparql";

    fn policy() -> RatePolicy {
        RatePolicy {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(32_000),
            min_interval: Duration::from_millis(100),
            max_exponent: 6,
        }
    }

    #[test]
    fn test_compute_delay_grows_to_cap() {
        let p = policy();
        assert_eq!(p.compute_delay(0), Duration::from_millis(100));
        assert_eq!(p.compute_delay(1), Duration::from_millis(2_000));
        assert_eq!(p.compute_delay(3), Duration::from_millis(8_000));
        assert_eq!(p.compute_delay(5), Duration::from_millis(32_000));
        assert_eq!(p.compute_delay(40), Duration::from_millis(32_000));

        let mut prev = Duration::ZERO;
        for n in 0..20 {
            let d = p.compute_delay(n);
            assert!(d >= prev);
            assert!(d <= p.max_delay);
            prev = d;
        }
    }

    #[test]
    fn test_exponent_ceiling_follows_configured_delays() {
        assert_eq!(RatePolicy::default().max_exponent, 5);

        let fast = RatePolicy::from_config(&RateConfig {
            base_delay_ms: 10,
            max_delay_ms: 32_000,
            min_interval_ms: 0,
        });
        assert_eq!(fast.max_exponent, 12);
        assert_eq!(fast.compute_delay(11), Duration::from_millis(20_480));
        assert_eq!(fast.compute_delay(12), Duration::from_millis(32_000));
        assert_eq!(fast.compute_delay(40), Duration::from_millis(32_000));

        let flat = RatePolicy::from_config(&RateConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            min_interval_ms: 0,
        });
        assert_eq!(flat.max_exponent, 1);
        assert_eq!(flat.compute_delay(3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_until_max_delay_with_small_base() {
        let gov = RateGovernor::new(RatePolicy::from_config(&RateConfig {
            base_delay_ms: 10,
            max_delay_ms: 32_000,
            min_interval_ms: 0,
        }));
        for _ in 0..20 {
            gov.record_outcome(EP, true).await;
        }
        let started = Instant::now();
        gov.await_permission(EP).await;
        assert!(started.elapsed() >= Duration::from_millis(32_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_accumulate_and_success_resets() {
        let gov = RateGovernor::new(policy());
        for expected in 1..=3 {
            gov.record_outcome(EP, true).await;
            assert_eq!(gov.snapshot(EP).await.unwrap().consecutive_throttles, expected);
        }
        assert_eq!(gov.current_delay(EP).await, Duration::from_millis(8_000));

        gov.record_outcome(EP, false).await;
        assert_eq!(gov.snapshot(EP).await.unwrap().consecutive_throttles, 0);
        assert_eq!(gov.current_delay(EP).await, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_permission_waits_out_backoff() {
        let gov = RateGovernor::new(policy());
        gov.record_outcome(EP, true).await;

        let start = Instant::now();
        gov.await_permission(EP).await;
        assert!(start.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spaces_requests() {
        let gov = RateGovernor::new(policy());
        let start = Instant::now();
        gov.await_permission(EP).await;
        gov.await_permission(EP).await;
        gov.await_permission(EP).await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_are_independent() {
        let gov = RateGovernor::new(policy());
        gov.record_outcome(EP, true).await;

        let start = Instant::now();
        gov.await_permission("https://other.example.org/sparql").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_leaves_state_untouched() {
        let gov = RateGovernor::new(policy());
        gov.record_outcome(EP, true).await;
        let before = gov.snapshot(EP).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(500), gov.await_permission(EP)).await;
        assert!(waited.is_err());

        let after = gov.snapshot(EP).await.unwrap();
        assert_eq!(after.consecutive_throttles, before.consecutive_throttles);
        assert_eq!(after.next_allowed_at, before.next_allowed_at);
    }
}
