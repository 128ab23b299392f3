use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kestrel_core::{ExecutionReport, GoalId, Result, StepSpec};
use serde_json::Value;
use tracing::{info, warn};

use crate::context::OrchestrationContext;
use crate::executor::WaveExecutor;
use crate::plan::build_plan;

/// What a coordinated run produced: one report per worker that ran, plus
/// the synthesized combination of their results.
#[derive(Debug)]
pub struct CoordinationOutcome {
    /// Per-worker execution reports, keyed by worker name.
    pub reports: BTreeMap<String, ExecutionReport>,
    /// The synthesis step's combined value.
    pub synthesis: Value,
}

/// Hierarchical coordinator: one sub-plan per delegated worker.
///
/// Workers are plain step-list templates; each delegation builds and
/// executes a fresh sub-plan over the shared context, so every worker's
/// tools share breaker state and metrics. Beyond its own plans the
/// coordinator keeps no state.
pub struct Coordinator {
    context: Arc<OrchestrationContext>,
    workers: HashMap<String, Vec<StepSpec>>,
}

impl Coordinator {
    /// Creates a coordinator with no workers over a shared context.
    #[must_use]
    pub fn new(context: Arc<OrchestrationContext>) -> Self {
        Self {
            context,
            workers: HashMap::new(),
        }
    }

    /// Registers a worker's step-list template under a name.
    #[must_use]
    pub fn with_worker(mut self, name: String, steps: Vec<StepSpec>) -> Self {
        self.workers.insert(name, steps);
        self
    }

    /// Names of the registered workers, sorted.
    #[must_use]
    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs the delegated workers and synthesizes their reports.
    ///
    /// Delegations naming an unregistered worker are skipped with a
    /// warning rather than failing the whole run. Workers execute one
    /// after another; the parallelism lives inside each worker's waves.
    ///
    /// # Errors
    /// Returns a plan-build error when a worker's step template is
    /// structurally defective; per-step failures stay inside that
    /// worker's report.
    pub async fn run<F>(&self, delegations: &[String], synthesize: F) -> Result<CoordinationOutcome>
    where
        F: Fn(&BTreeMap<String, ExecutionReport>) -> Value,
    {
        let executor = WaveExecutor::new(Arc::clone(&self.context));
        let mut reports = BTreeMap::new();

        for worker in delegations {
            let Some(steps) = self.workers.get(worker) else {
                warn!("No worker named '{worker}' is registered, skipping delegation");
                continue;
            };
            let goal_id = GoalId::new();
            info!("Delegating goal {goal_id} to worker '{worker}'");
            let plan = build_plan(goal_id, steps)?;
            let report = executor.execute(&plan).await?;
            reports.insert(worker.clone(), report);
        }

        let synthesis = synthesize(&reports);
        Ok(CoordinationOutcome { reports, synthesis })
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
    use kestrel_adapters::{ToolInvoker, ToolRegistry};
    use kestrel_core::{CallTemplate, OverallStatus, ToolDescriptor};
    use serde_json::{Map, json};

    /// Echoes the tool name back, so reports are easy to assert on.
    struct EchoInvoker;

    #[async_trait]
    impl ToolInvoker for EchoInvoker {
        async fn invoke(
            &self,
            descriptor: &ToolDescriptor,
            _arguments: &Map<String, Value>,
        ) -> Result<Value> {
            Ok(json!({ "tool": descriptor.name }))
        }
    }

    fn context() -> Arc<OrchestrationContext> {
        let registry = ToolRegistry::new()
            .with_tool(ToolDescriptor::new(
                "get_weather".to_owned(),
                CallTemplate::Http {
                    url: "https://example.com/weather".to_owned(),
                    method: kestrel_core::HttpMethod::Get,
                },
            ))
            .with_tool(ToolDescriptor::new(
                "get_rates".to_owned(),
                CallTemplate::Http {
                    url: "https://example.com/rates".to_owned(),
                    method: kestrel_core::HttpMethod::Get,
                },
            ));
        Arc::new(OrchestrationContext::new(registry, Arc::new(EchoInvoker)))
    }

    #[tokio::test]
    async fn test_runs_each_delegated_worker() {
        let coordinator = Coordinator::new(context())
            .with_worker(
                "weather".to_owned(),
                vec![StepSpec::new(1, "get_weather".to_owned())],
            )
            .with_worker(
                "finance".to_owned(),
                vec![StepSpec::new(1, "get_rates".to_owned())],
            );

        let outcome = coordinator
            .run(&["weather".to_owned(), "finance".to_owned()], |reports| {
                json!({ "workers_done": reports.len() })
            })
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(
            outcome.reports["weather"].overall,
            OverallStatus::Complete
        );
        assert_eq!(outcome.synthesis, json!({"workers_done": 2}));
    }

    #[tokio::test]
    async fn test_unknown_worker_is_skipped_not_fatal() {
        let coordinator = Coordinator::new(context()).with_worker(
            "weather".to_owned(),
            vec![StepSpec::new(1, "get_weather".to_owned())],
        );

        let outcome = coordinator
            .run(
                &["weather".to_owned(), "astrology".to_owned()],
                |reports| json!(reports.len()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        assert!(outcome.reports.contains_key("weather"));
        assert_eq!(outcome.synthesis, json!(1));
    }
}
