//! End-to-end tests of the orchestrator: plan building, wave execution,
//! reference resolution, failure policies, resilience, and replanning,
//! all against a scripted in-process invoker.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kestrel_adapters::{ToolInvoker, ToolRegistry};
use kestrel_core::{
    CallTemplate, Error, FailurePolicy, GoalId, HttpMethod, ProgressChannel, ProgressEvent,
    ResiliencePolicy, Result, StepId, StepSpec, StepStatus, ToolDescriptor,
};
use kestrel_engine::{OrchestrationContext, Orchestrator};
use serde_json::{Map, Value, json};
use tokio::time::sleep;

/// In-process invoker with scripted per-tool behavior.
#[derive(Default)]
struct ScriptedInvoker {
    weather_calls: AtomicU32,
    flaky_remaining: AtomicU32,
}

impl ScriptedInvoker {
    fn failing_first(failures: u32) -> Self {
        Self {
            weather_calls: AtomicU32::new(0),
            flaky_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        match descriptor.name.as_str() {
            "get_weather" => {
                self.weather_calls.fetch_add(1, Ordering::SeqCst);
                let location = arguments
                    .get("location")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let (temp, conditions) = match location {
                    "Paris" => (18, "cloudy"),
                    "London" => (15, "rainy"),
                    "New York" => (22, "sunny"),
                    _ => (20, "clear"),
                };
                Ok(json!({"location": location, "temp": temp, "conditions": conditions}))
            }
            "calculator" => {
                let expression = arguments
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let (left, right) = expression
                    .split_once('-')
                    .ok_or_else(|| Error::Execution(format!("Bad expression '{expression}'")))?;
                let difference = left.trim().parse::<f64>().unwrap_or(f64::NAN)
                    - right.trim().parse::<f64>().unwrap_or(f64::NAN);
                Ok(json!({"result": difference}))
            }
            "slow_tool" => {
                sleep(Duration::from_millis(200)).await;
                Ok(json!({"done": true}))
            }
            "slow_failure" => {
                sleep(Duration::from_millis(100)).await;
                Err(Error::Execution("scripted slow failure".to_owned()))
            }
            "broken_tool" => Err(Error::Execution("scripted failure".to_owned())),
            "flaky_tool" => {
                let remaining = self.flaky_remaining.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.flaky_remaining.store(remaining - 1, Ordering::SeqCst);
                    Err(Error::Execution("scripted transient failure".to_owned()))
                } else {
                    Ok(json!({"ok": true}))
                }
            }
            other => Err(Error::ToolNotFound(other.to_owned())),
        }
    }
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in [
        "get_weather",
        "calculator",
        "slow_tool",
        "slow_failure",
        "broken_tool",
        "flaky_tool",
    ] {
        registry = registry.with_tool(ToolDescriptor::new(
            name.to_owned(),
            CallTemplate::Http {
                url: format!("https://scripted.invalid/{name}"),
                method: HttpMethod::Get,
            },
        ));
    }
    registry
}

fn quick_policy() -> ResiliencePolicy {
    ResiliencePolicy::new()
        .with_max_retries(0)
        .with_base_delay_ms(5)
        .with_timeout_ms(5_000)
}

fn weather_step(id: u32, location: &str) -> StepSpec {
    StepSpec::new(id, "get_weather".to_owned())
        .with_argument("location".to_owned(), json!(location))
}

#[tokio::test]
async fn test_weather_calculator_end_to_end() {
    let steps = vec![
        weather_step(1, "Paris"),
        weather_step(2, "London"),
        StepSpec::new(3, "calculator".to_owned())
            .with_argument("expression".to_owned(), json!("$step_1.temp - $step_2.temp"))
            .with_dependencies(vec![StepId::new(1), StepId::new(2)]),
    ];

    let goal_id = GoalId::new();
    let plan = kestrel_engine::build_plan(goal_id, &steps).unwrap();
    assert_eq!(plan.wave_count(), 2);
    assert_eq!(plan.waves()[0], vec![StepId::new(1), StepId::new(2)]);
    assert_eq!(plan.waves()[1], vec![StepId::new(3)]);

    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy());
    let orchestrator = Orchestrator::new(context);
    let report = orchestrator.submit(goal_id, &steps).await.unwrap();

    assert!(report.is_complete());
    for outcome in &report.steps {
        assert_eq!(outcome.status, StepStatus::Succeeded);
    }
    // Paris 18 minus London 15.
    assert_eq!(report.steps[2].result, Some(json!({"result": 3.0})));
}

#[tokio::test]
async fn test_steps_in_one_wave_run_concurrently() {
    let steps = vec![
        StepSpec::new(1, "slow_tool".to_owned()),
        StepSpec::new(2, "slow_tool".to_owned()),
    ];
    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy());
    let orchestrator = Orchestrator::new(context);

    let start = Instant::now();
    let report = orchestrator.submit(GoalId::new(), &steps).await.unwrap();
    let elapsed = start.elapsed();

    assert!(report.is_complete());
    assert!(
        elapsed >= Duration::from_millis(200),
        "two 200ms steps cannot finish faster than one"
    );
    assert!(
        elapsed < Duration::from_millis(380),
        "serial execution would take about 400ms, got {elapsed:?}"
    );
}

#[tokio::test]
async fn test_abort_policy_skips_later_waves() {
    // Wave 0: a fast success (step 4) and a slow failure (step 1).
    // Wave 1: a dependent of the failure (step 2) and an independent
    // step (step 3).
    let steps = vec![
        StepSpec::new(1, "slow_failure".to_owned()),
        StepSpec::new(2, "get_weather".to_owned())
            .with_argument("location".to_owned(), json!("Paris"))
            .with_dependencies(vec![StepId::new(1)]),
        StepSpec::new(3, "get_weather".to_owned())
            .with_argument("location".to_owned(), json!("London"))
            .with_dependencies(vec![StepId::new(4)]),
        weather_step(4, "New York"),
    ];

    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy())
        .with_failure_policy(FailurePolicy::AbortRemainingWave);
    let report = Orchestrator::new(context)
        .submit(GoalId::new(), &steps)
        .await
        .unwrap();

    assert_eq!(report.overall, kestrel_core::OverallStatus::Aborted);
    let by_id: HashMap<StepId, StepStatus> = report
        .steps
        .iter()
        .map(|outcome| (outcome.id, outcome.status))
        .collect();
    assert_eq!(by_id[&StepId::new(1)], StepStatus::Failed);
    assert_eq!(by_id[&StepId::new(2)], StepStatus::Skipped);
    assert_eq!(
        by_id[&StepId::new(3)],
        StepStatus::Skipped,
        "independent later-wave steps must not run after an abort"
    );
    assert_eq!(by_id[&StepId::new(4)], StepStatus::Succeeded);
}

#[tokio::test]
async fn test_continue_policy_runs_independent_steps() {
    let steps = vec![
        StepSpec::new(1, "slow_failure".to_owned()),
        StepSpec::new(2, "get_weather".to_owned())
            .with_argument("location".to_owned(), json!("Paris"))
            .with_dependencies(vec![StepId::new(1)]),
        StepSpec::new(3, "get_weather".to_owned())
            .with_argument("location".to_owned(), json!("London"))
            .with_dependencies(vec![StepId::new(4)]),
        weather_step(4, "New York"),
    ];

    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy())
        .with_failure_policy(FailurePolicy::ContinueIndependentSteps);
    let report = Orchestrator::new(context)
        .submit(GoalId::new(), &steps)
        .await
        .unwrap();

    assert_eq!(report.overall, kestrel_core::OverallStatus::Partial);
    let by_id: HashMap<StepId, StepStatus> = report
        .steps
        .iter()
        .map(|outcome| (outcome.id, outcome.status))
        .collect();
    assert_eq!(by_id[&StepId::new(1)], StepStatus::Failed);
    assert_eq!(by_id[&StepId::new(2)], StepStatus::Skipped);
    assert_eq!(
        by_id[&StepId::new(3)],
        StepStatus::Succeeded,
        "independent steps keep running under the continue policy"
    );
    assert_eq!(by_id[&StepId::new(4)], StepStatus::Succeeded);
}

#[tokio::test]
async fn test_retries_are_reported_in_attempts() {
    let steps = vec![StepSpec::new(1, "flaky_tool".to_owned())];
    let context =
        OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::failing_first(2)))
            .with_policy(quick_policy())
            .with_tool_policy(
                "flaky_tool".to_owned(),
                ResiliencePolicy::new()
                    .with_max_retries(3)
                    .with_base_delay_ms(5),
            );
    let report = Orchestrator::new(context)
        .submit(GoalId::new(), &steps)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.steps[0].attempts, 3, "two failures, then a success");
}

#[tokio::test]
async fn test_open_breaker_fails_fast_in_later_waves() {
    // Step 1 opens the breaker (threshold 1); step 2 reaches the same
    // tool one wave later and must be refused without an attempt.
    let steps = vec![
        StepSpec::new(1, "broken_tool".to_owned()),
        weather_step(3, "Paris"),
        StepSpec::new(2, "broken_tool".to_owned()).with_dependencies(vec![StepId::new(3)]),
    ];

    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(
            quick_policy()
                .with_failure_threshold(1)
                .with_recovery_timeout_ms(60_000),
        )
        .with_failure_policy(FailurePolicy::ContinueIndependentSteps);
    let report = Orchestrator::new(context)
        .submit(GoalId::new(), &steps)
        .await
        .unwrap();

    let refused = report
        .steps
        .iter()
        .find(|outcome| outcome.id == StepId::new(2))
        .unwrap();
    assert_eq!(refused.status, StepStatus::Failed);
    assert_eq!(refused.attempts, 0, "a breaker refusal is not an attempt");
    assert!(
        refused.error.as_ref().unwrap().contains("Circuit open"),
        "got: {:?}",
        refused.error
    );
}

#[tokio::test]
async fn test_replanning_carries_succeeded_results_forward() {
    let steps = vec![
        weather_step(1, "Paris"),
        StepSpec::new(2, "broken_tool".to_owned()),
    ];
    let invoker = Arc::new(ScriptedInvoker::default());
    let context =
        OrchestrationContext::new(registry(), Arc::clone(&invoker) as Arc<dyn ToolInvoker>)
        .with_policy(quick_policy())
        .with_failure_policy(FailurePolicy::ContinueIndependentSteps);
    let orchestrator = Orchestrator::new(context);

    let report = orchestrator
        .submit_with_replan(
            GoalId::new(),
            steps,
            |previous| {
                // Swap the broken tool for a working alternative, keeping
                // the succeeded step in place.
                previous.steps.iter().any(|outcome| {
                    outcome.status == StepStatus::Failed
                }).then(|| {
                    vec![weather_step(1, "Paris"), weather_step(2, "London")]
                })
            },
            2,
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(
        invoker.weather_calls.load(Ordering::SeqCst),
        2,
        "step 1 ran once in the first round, step 2 once in the replan"
    );
}

#[tokio::test]
async fn test_progress_events_follow_the_run() {
    let (channel, mut receiver) = ProgressChannel::channel();
    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy())
        .with_progress(channel);
    let report = Orchestrator::new(context)
        .submit(GoalId::new(), &[weather_step(1, "Paris")])
        .await
        .unwrap();
    assert!(report.is_complete());

    let mut kinds = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        kinds.push(match event {
            ProgressEvent::PlanStarted { .. } => "plan_started",
            ProgressEvent::WaveStarted { .. } => "wave_started",
            ProgressEvent::StepChanged { status, .. } => match status {
                StepStatus::Running => "step_running",
                StepStatus::Succeeded => "step_succeeded",
                _ => "step_other",
            },
            ProgressEvent::PlanFinished { .. } => "plan_finished",
        });
    }
    assert_eq!(
        kinds,
        vec![
            "plan_started",
            "wave_started",
            "step_running",
            "step_succeeded",
            "plan_finished"
        ]
    );
}

#[tokio::test]
async fn test_cancelled_context_aborts_the_run() {
    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy());
    let orchestrator = Orchestrator::new(context);
    orchestrator.cancel();

    let report = orchestrator
        .submit(GoalId::new(), &[weather_step(1, "Paris")])
        .await
        .unwrap();
    assert_eq!(report.overall, kestrel_core::OverallStatus::Aborted);
    assert_eq!(report.steps[0].status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_metrics_accumulate_across_a_run() {
    let context = OrchestrationContext::new(registry(), Arc::new(ScriptedInvoker::default()))
        .with_policy(quick_policy())
        .with_failure_policy(FailurePolicy::ContinueIndependentSteps);
    let orchestrator = Orchestrator::new(context);
    let metrics = orchestrator.context().metrics();

    let report = orchestrator
        .submit(
            GoalId::new(),
            &[
                weather_step(1, "Paris"),
                StepSpec::new(2, "broken_tool".to_owned()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(report.overall, kestrel_core::OverallStatus::Partial);

    let weather = metrics.tool("get_weather").unwrap();
    assert_eq!(weather.invocations, 1);
    assert_eq!(weather.failures, 0);
    let broken = metrics.tool("broken_tool").unwrap();
    assert_eq!(broken.invocations, 1);
    assert_eq!(broken.failures, 1);
}
