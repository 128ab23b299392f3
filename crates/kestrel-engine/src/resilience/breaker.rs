use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use kestrel_core::{Error, ResiliencePolicy, Result};
use tracing::{debug, warn};

/// Observable state of one tool's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerState {
    /// Calls pass through; consecutive failures are counted.
    #[default]
    Closed,
    /// Calls fail fast until the recovery timeout elapses.
    Open,
    /// One trial call is in flight; its outcome decides the next state.
    HalfOpen,
}

/// What the breaker granted an admitted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptGrant {
    /// Ordinary closed-state admission.
    Normal,
    /// The single half-open trial call.
    Trial,
}

/// Per-tool breaker data, shared by every concurrent caller.
#[derive(Debug, Default)]
struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

/// Circuit-breaker state for every tool reachable through one context.
///
/// The legal transitions are exactly: closed to open when the failure
/// threshold is reached, open to half-open when the recovery timeout
/// elapses, half-open to closed on a successful trial, and half-open back
/// to open on a failed trial.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Creates a registry with every breaker closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks permission to make one attempt against a tool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while the breaker rejects calls.
    /// A refusal is not an attempt and leaves the failure counter
    /// untouched.
    pub fn try_acquire(&self, tool: &str, policy: &ResiliencePolicy) -> Result<AttemptGrant> {
        let mut breakers = self.lock()?;
        let breaker = breakers.entry(tool.to_owned()).or_default();
        match breaker.state {
            BreakerState::Closed => Ok(AttemptGrant::Normal),
            BreakerState::Open => {
                if let Some(retry_after) = remaining_wait(breaker.opened_at, policy) {
                    return Err(Error::CircuitOpen {
                        tool: tool.to_owned(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    });
                }
                debug!("Breaker for '{tool}' admitting a half-open trial");
                breaker.state = BreakerState::HalfOpen;
                breaker.trial_started = Some(Instant::now());
                Ok(AttemptGrant::Trial)
            }
            BreakerState::HalfOpen => {
                if let Some(retry_after) = remaining_wait(breaker.trial_started, policy) {
                    return Err(Error::CircuitOpen {
                        tool: tool.to_owned(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    });
                }
                // The previous trial never reported back (its task was
                // dropped); its lease expired, so this caller takes over.
                breaker.trial_started = Some(Instant::now());
                Ok(AttemptGrant::Trial)
            }
        }
    }

    /// Records a successful attempt. A trial success closes the breaker
    /// and resets the failure counter.
    pub fn record_success(&self, tool: &str, grant: AttemptGrant) {
        if let Ok(mut breakers) = self.breakers.lock()
            && let Some(breaker) = breakers.get_mut(tool)
        {
            breaker.consecutive_failures = 0;
            if grant == AttemptGrant::Trial {
                debug!("Breaker for '{tool}' closed after a successful trial");
                breaker.state = BreakerState::Closed;
                breaker.opened_at = None;
                breaker.trial_started = None;
            }
        }
    }

    /// Records one failed attempt. Only a failed trial changes state,
    /// reopening the breaker with a fresh recovery timer.
    pub fn record_attempt_failure(&self, tool: &str, grant: AttemptGrant) {
        if grant != AttemptGrant::Trial {
            return;
        }
        if let Ok(mut breakers) = self.breakers.lock()
            && let Some(breaker) = breakers.get_mut(tool)
            && breaker.state == BreakerState::HalfOpen
        {
            warn!("Half-open trial for '{tool}' failed, breaker reopened");
            breaker.state = BreakerState::Open;
            breaker.opened_at = Some(Instant::now());
            breaker.trial_started = None;
        }
    }

    /// Records that a whole wrapped call ultimately failed. Exhausting a
    /// retry budget counts as exactly one failure here, regardless of how
    /// many attempts it contained.
    pub fn record_failure(&self, tool: &str, policy: &ResiliencePolicy) {
        if let Ok(mut breakers) = self.breakers.lock() {
            let breaker = breakers.entry(tool.to_owned()).or_default();
            if breaker.state != BreakerState::Closed {
                return;
            }
            breaker.consecutive_failures += 1;
            if breaker.consecutive_failures >= policy.failure_threshold {
                warn!(
                    "Breaker for '{tool}' opened after {} consecutive failures",
                    breaker.consecutive_failures
                );
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
            }
        }
    }

    /// Current state of a tool's breaker; closed when none exists yet.
    #[must_use]
    pub fn state(&self, tool: &str) -> BreakerState {
        self.breakers.lock().map_or(BreakerState::Closed, |breakers| {
            breakers
                .get(tool)
                .map_or(BreakerState::Closed, |breaker| breaker.state)
        })
    }

    /// Consecutive wrapped-call failures currently recorded for a tool.
    #[must_use]
    pub fn consecutive_failures(&self, tool: &str) -> u32 {
        self.breakers.lock().map_or(0, |breakers| {
            breakers
                .get(tool)
                .map_or(0, |breaker| breaker.consecutive_failures)
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, CircuitBreaker>>> {
        self.breakers
            .lock()
            .map_err(|_| Error::Execution("Breaker state poisoned".to_owned()))
    }
}

/// Time left before `since` is `recovery_timeout` in the past, if any.
fn remaining_wait(since: Option<Instant>, policy: &ResiliencePolicy) -> Option<Duration> {
    let elapsed = since?.elapsed();
    let recovery = policy.recovery_timeout();
    (elapsed < recovery).then(|| recovery - elapsed)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn fast_policy() -> ResiliencePolicy {
        ResiliencePolicy::new()
            .with_failure_threshold(3)
            .with_recovery_timeout_ms(50)
    }

    #[test]
    fn test_opens_at_failure_threshold() {
        let registry = BreakerRegistry::new();
        let policy = fast_policy();

        registry.record_failure("search", &policy);
        registry.record_failure("search", &policy);
        assert_eq!(registry.state("search"), BreakerState::Closed);

        registry.record_failure("search", &policy);
        assert_eq!(registry.state("search"), BreakerState::Open);
    }

    #[test]
    fn test_open_breaker_fails_fast_without_counting() {
        let registry = BreakerRegistry::new();
        let policy = fast_policy();
        for _ in 0..3 {
            registry.record_failure("search", &policy);
        }

        let refusal = registry.try_acquire("search", &policy).unwrap_err();
        assert!(matches!(refusal, Error::CircuitOpen { .. }));
        assert_eq!(registry.consecutive_failures("search"), 3);
    }

    #[test]
    fn test_recovery_timeout_admits_single_trial() {
        let registry = BreakerRegistry::new();
        let policy = fast_policy();
        for _ in 0..3 {
            registry.record_failure("search", &policy);
        }

        sleep(Duration::from_millis(60));
        let grant = registry.try_acquire("search", &policy).unwrap();
        assert_eq!(grant, AttemptGrant::Trial);
        assert_eq!(registry.state("search"), BreakerState::HalfOpen);

        // Concurrent callers are refused while the trial is in flight.
        assert!(registry.try_acquire("search", &policy).is_err());
    }

    #[test]
    fn test_trial_success_closes_and_resets() {
        let registry = BreakerRegistry::new();
        let policy = fast_policy();
        for _ in 0..3 {
            registry.record_failure("search", &policy);
        }

        sleep(Duration::from_millis(60));
        let grant = registry.try_acquire("search", &policy).unwrap();
        registry.record_success("search", grant);

        assert_eq!(registry.state("search"), BreakerState::Closed);
        assert_eq!(registry.consecutive_failures("search"), 0);
    }

    #[test]
    fn test_trial_failure_reopens_with_fresh_timer() {
        let registry = BreakerRegistry::new();
        let policy = fast_policy();
        for _ in 0..3 {
            registry.record_failure("search", &policy);
        }

        sleep(Duration::from_millis(60));
        let grant = registry.try_acquire("search", &policy).unwrap();
        registry.record_attempt_failure("search", grant);

        assert_eq!(registry.state("search"), BreakerState::Open);
        assert!(registry.try_acquire("search", &policy).is_err());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let registry = BreakerRegistry::new();
        let policy = fast_policy();

        registry.record_failure("search", &policy);
        registry.record_failure("search", &policy);
        let grant = registry.try_acquire("search", &policy).unwrap();
        registry.record_success("search", grant);
        registry.record_failure("search", &policy);

        assert_eq!(registry.state("search"), BreakerState::Closed);
        assert_eq!(registry.consecutive_failures("search"), 1);
    }
}
