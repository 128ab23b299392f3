//! The explicit state bundle one orchestration run family shares.
//!
//! Nothing in the engine is a process-wide singleton: breaker state, the
//! tool registry, policies, progress, and metrics all hang off an
//! [`OrchestrationContext`], so independent contexts can coexist in one
//! process and tests get a clean slate each time.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_adapters::{AdapterSet, ToolInvoker, ToolRegistry};
use kestrel_core::{CancelFlag, FailurePolicy, ProgressChannel, ResiliencePolicy};

use crate::config::KestrelConfig;
use crate::metrics::MetricsCollector;
use crate::resilience::breaker::BreakerRegistry;

/// Default cap on concurrently executing steps within a wave.
pub const DEFAULT_MAX_CONCURRENT_STEPS: usize = 4;

/// Everything the plan builder, executor, and resilience wrapper share.
pub struct OrchestrationContext {
    registry: ToolRegistry,
    invoker: Arc<dyn ToolInvoker>,
    breakers: Arc<BreakerRegistry>,
    default_policy: ResiliencePolicy,
    tool_policies: HashMap<String, ResiliencePolicy>,
    failure_policy: FailurePolicy,
    max_concurrent_steps: usize,
    progress: ProgressChannel,
    metrics: Arc<MetricsCollector>,
    cancel: CancelFlag,
}

impl OrchestrationContext {
    /// Creates a context over a registry and an invoker, with default
    /// policies, fresh breaker state, and a detached progress channel.
    #[must_use]
    pub fn new(registry: ToolRegistry, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            registry,
            invoker,
            breakers: Arc::new(BreakerRegistry::new()),
            default_policy: ResiliencePolicy::default(),
            tool_policies: HashMap::new(),
            failure_policy: FailurePolicy::default(),
            max_concurrent_steps: DEFAULT_MAX_CONCURRENT_STEPS,
            progress: ProgressChannel::default(),
            metrics: Arc::new(MetricsCollector::new()),
            cancel: CancelFlag::new(),
        }
    }

    /// Creates a context wired to the production adapter set.
    #[must_use]
    pub fn with_adapters(registry: ToolRegistry) -> Self {
        Self::new(registry, Arc::new(AdapterSet::new()))
    }

    /// Applies the execution and resilience sections of a configuration.
    #[must_use]
    pub fn with_config(mut self, config: &KestrelConfig) -> Self {
        self.max_concurrent_steps = config.execution.max_concurrent_steps.max(1);
        self.failure_policy = config.execution.on_step_failure;
        self.default_policy = config.resilience.default.clone();
        self.tool_policies = config.resilience.tools.clone();
        self
    }

    /// Sets the default resilience policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ResiliencePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Overrides the resilience policy for one tool.
    #[must_use]
    pub fn with_tool_policy(mut self, tool: String, policy: ResiliencePolicy) -> Self {
        self.tool_policies.insert(tool, policy);
        self
    }

    /// Sets the behavior when a step fails mid-wave.
    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Caps how many steps of one wave run concurrently. Clamped to at
    /// least one.
    #[must_use]
    pub fn with_max_concurrent_steps(mut self, max_concurrent_steps: usize) -> Self {
        self.max_concurrent_steps = max_concurrent_steps.max(1);
        self
    }

    /// Attaches a progress channel for live step-status events.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    /// The registry of invocable tools.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The transport seam steps are invoked through.
    #[must_use]
    pub fn invoker(&self) -> Arc<dyn ToolInvoker> {
        Arc::clone(&self.invoker)
    }

    /// Shared circuit-breaker state, one machine per tool name.
    #[must_use]
    pub fn breakers(&self) -> Arc<BreakerRegistry> {
        Arc::clone(&self.breakers)
    }

    /// The effective resilience policy for a tool: its override when one
    /// is configured, otherwise the context default.
    #[must_use]
    pub fn policy_for(&self, tool: &str) -> &ResiliencePolicy {
        self.tool_policies.get(tool).unwrap_or(&self.default_policy)
    }

    /// Behavior when a step fails mid-wave.
    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Concurrency cap within one wave.
    #[must_use]
    pub fn max_concurrent_steps(&self) -> usize {
        self.max_concurrent_steps
    }

    /// The progress channel runs report into.
    #[must_use]
    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// The shared metrics collector.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// The cooperative cancellation flag for runs on this context.
    #[must_use]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
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
    fn test_tool_policy_overrides_default() {
        let context = OrchestrationContext::with_adapters(ToolRegistry::new())
            .with_policy(ResiliencePolicy::new().with_max_retries(1))
            .with_tool_policy(
                "flaky".to_owned(),
                ResiliencePolicy::new().with_max_retries(5),
            );

        assert_eq!(context.policy_for("flaky").max_retries, 5);
        assert_eq!(context.policy_for("steady").max_retries, 1);
    }

    #[test]
    fn test_concurrency_clamped_to_one() {
        let context =
            OrchestrationContext::with_adapters(ToolRegistry::new()).with_max_concurrent_steps(0);
        assert_eq!(context.max_concurrent_steps(), 1);
    }

    #[test]
    fn test_contexts_do_not_share_breakers() {
        let first = OrchestrationContext::with_adapters(ToolRegistry::new());
        let second = OrchestrationContext::with_adapters(ToolRegistry::new());

        first
            .breakers()
            .record_failure("search", &ResiliencePolicy::new().with_failure_threshold(1));
        assert_eq!(second.breakers().consecutive_failures("search"), 0);
    }
}
