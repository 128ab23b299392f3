//! The resilience wrapper around tool invocation.
//!
//! Every call runs through the same fixed pipeline: circuit-breaker
//! admission first, then a per-attempt timeout, then retry with
//! exponential backoff. Callers receive a uniform [`InvocationOutcome`]
//! whichever transport sat underneath.

/// Per-tool circuit-breaker state machine.
pub mod breaker;

use std::sync::Arc;

use kestrel_adapters::ToolInvoker;
use kestrel_core::{CancelFlag, Error, ResiliencePolicy, Result, ToolDescriptor};
use serde_json::{Map, Value};
use tokio::time;
use tracing::{debug, warn};

use breaker::BreakerRegistry;

/// Uniform outcome of one resilient invocation.
///
/// Exactly one of `data` and `error` is set. `attempts` counts adapter
/// calls actually made; a breaker refusal is not an attempt.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Whether the call ultimately succeeded.
    pub success: bool,
    /// Result value of the successful attempt.
    pub data: Option<Value>,
    /// Message of the last error when every attempt failed.
    pub error: Option<String>,
    /// Number of adapter calls made.
    pub attempts: u32,
}

impl InvocationOutcome {
    fn succeeded(data: Value, attempts: u32) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            attempts,
        }
    }

    fn failed(error: &Error, attempts: u32) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            attempts,
        }
    }
}

/// Wraps a [`ToolInvoker`] with the full resilience stack.
///
/// Breaker state is shared through the registry, so concurrent callers of
/// the same tool see one state machine.
pub struct ResilientInvoker {
    invoker: Arc<dyn ToolInvoker>,
    breakers: Arc<BreakerRegistry>,
}

impl ResilientInvoker {
    /// Creates a wrapper over an invoker and shared breaker state.
    #[must_use]
    pub fn new(invoker: Arc<dyn ToolInvoker>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { invoker, breakers }
    }

    /// Invokes one tool under a policy, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the cancellation flag trips at a
    /// retry boundary. Every other result, including exhausted retries and
    /// an open breaker, is reported inside the outcome rather than as an
    /// error.
    pub async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
        policy: &ResiliencePolicy,
        cancel: &CancelFlag,
    ) -> Result<InvocationOutcome> {
        let tool = descriptor.name.as_str();
        let mut attempts: u32 = 0;
        let mut last_error: Option<Error> = None;

        loop {
            cancel.check()?;

            let grant = match self.breakers.try_acquire(tool, policy) {
                Ok(grant) => grant,
                Err(refusal) => {
                    // A refusal is not an attempt; surface the last real
                    // error when the budget already produced one.
                    let error = last_error.unwrap_or(refusal);
                    return Ok(InvocationOutcome::failed(&error, attempts));
                }
            };

            attempts += 1;
            debug!("Attempt {attempts} for '{tool}'");
            let result = time::timeout(policy.timeout(), self.invoker.invoke(descriptor, arguments))
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(policy.timeout_ms)));

            match result {
                Ok(data) => {
                    self.breakers.record_success(tool, grant);
                    return Ok(InvocationOutcome::succeeded(data, attempts));
                }
                Err(error) => {
                    self.breakers.record_attempt_failure(tool, grant);

                    if !error.is_retryable() {
                        debug!("'{tool}' failed without retry: {error}");
                        return Ok(InvocationOutcome::failed(&error, attempts));
                    }
                    if attempts > policy.max_retries {
                        self.breakers.record_failure(tool, policy);
                        warn!("'{tool}' failed after {attempts} attempts: {error}");
                        return Ok(InvocationOutcome::failed(&error, attempts));
                    }

                    let delay = policy.backoff_delay(attempts - 1);
                    debug!("Retrying '{tool}' in {}ms: {error}", delay.as_millis());
                    last_error = Some(error);
                    time::sleep(delay).await;
                }
            }
        }
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
    use async_trait::async_trait;
    use kestrel_core::CallTemplate;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with a retryable error, then
    /// succeeds.
    struct FlakyInvoker {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolInvoker for FlakyInvoker {
        async fn invoke(
            &self,
            _descriptor: &ToolDescriptor,
            _arguments: &Map<String, Value>,
        ) -> Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::Execution(format!("transient failure {call}")))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    struct RejectingInvoker;

    #[async_trait]
    impl ToolInvoker for RejectingInvoker {
        async fn invoke(
            &self,
            _descriptor: &ToolDescriptor,
            _arguments: &Map<String, Value>,
        ) -> Result<Value> {
            Err(Error::Validation("bad arguments".to_owned()))
        }
    }

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "flaky".to_owned(),
            CallTemplate::Http {
                url: "https://example.com".to_owned(),
                method: kestrel_core::HttpMethod::Get,
            },
        )
    }

    fn quick_policy() -> ResiliencePolicy {
        ResiliencePolicy::new()
            .with_max_retries(3)
            .with_base_delay_ms(5)
    }

    #[tokio::test]
    async fn test_fail_twice_then_succeed_counts_three_attempts() {
        let invoker = ResilientInvoker::new(
            Arc::new(FlakyInvoker {
                failures: 2,
                calls: AtomicU32::new(0),
            }),
            Arc::new(BreakerRegistry::new()),
        );

        let outcome = invoker
            .invoke(
                &descriptor(),
                &Map::new(),
                &quick_policy(),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.data, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_validation_error_is_never_retried() {
        let invoker = ResilientInvoker::new(
            Arc::new(RejectingInvoker),
            Arc::new(BreakerRegistry::new()),
        );

        let outcome = invoker
            .invoke(
                &descriptor(),
                &Map::new(),
                &quick_policy(),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.error.unwrap().contains("bad arguments"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_first_attempt() {
        let invoker = ResilientInvoker::new(
            Arc::new(FlakyInvoker {
                failures: 0,
                calls: AtomicU32::new(0),
            }),
            Arc::new(BreakerRegistry::new()),
        );
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = invoker
            .invoke(&descriptor(), &Map::new(), &quick_policy(), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
