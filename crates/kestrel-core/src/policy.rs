use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the resilience wrapper around a single tool invocation.
///
/// One policy applies per invocation; the executor resolves the effective
/// policy (per-tool override or default) before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencePolicy {
    /// Retries after the first attempt, so a call makes at most
    /// `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Upper bound on a single attempt, in milliseconds.
    pub timeout_ms: u64,
    /// Consecutive wrapped-call failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a trial call,
    /// in milliseconds.
    pub recovery_timeout_ms: u64,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            backoff_factor: 2.0,
            timeout_ms: 30_000,
            failure_threshold: 3,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl ResiliencePolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the circuit-breaker failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Sets the circuit-breaker recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout_ms(mut self, recovery_timeout_ms: u64) -> Self {
        self.recovery_timeout_ms = recovery_timeout_ms;
        self
    }

    /// Per-attempt timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Open-circuit recovery window as a [`Duration`].
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Delay before the retry following attempt `attempt_index`
    /// (zero-based), growing geometrically from the base delay.
    #[must_use]
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt_index.min(16) as i32);
        let millis = (self.base_delay_ms as f64 * factor).min(u32::MAX as f64);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ResiliencePolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay_ms, 200);
        assert!((policy.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(policy.timeout_ms, 30_000);
        assert_eq!(policy.failure_threshold, 3);
        assert_eq!(policy.recovery_timeout_ms, 30_000);
    }

    #[test]
    fn test_backoff_progression() {
        let policy = ResiliencePolicy::new()
            .with_base_delay_ms(100)
            .with_backoff_factor(2.0);

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_partial_policy_deserialization() {
        let policy: ResiliencePolicy = toml::from_str("max_retries = 1\ntimeout_ms = 500").unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.timeout_ms, 500);
        assert_eq!(policy.base_delay_ms, 200);
    }
}
