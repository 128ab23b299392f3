//! The wave scheduler and executor.
//!
//! Waves run strictly in order; inside a wave every runnable step is
//! dispatched onto a [`JoinSet`] bounded by a semaphore, and the wave ends
//! only when every dispatched task reached a terminal state. Later waves
//! read earlier waves' results, so cross-wave overlap is never allowed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kestrel_core::{
    CancelFlag, Error, ExecutionPlan, ExecutionReport, FailurePolicy, OverallStatus,
    ProgressChannel, ProgressEvent, Result, Step, StepId, StepOutcome, StepStatus,
};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::OrchestrationContext;
use crate::plan::reference::resolve_arguments;
use crate::resilience::{InvocationOutcome, ResilientInvoker};

/// What one dispatched step task reports back to the wave barrier.
struct TaskReport {
    id: StepId,
    duration_ms: u64,
    result: Result<InvocationOutcome>,
}

/// Executes validated plans wave by wave over a shared context.
pub struct WaveExecutor {
    context: Arc<OrchestrationContext>,
}

impl WaveExecutor {
    /// Creates an executor over a context.
    #[must_use]
    pub fn new(context: Arc<OrchestrationContext>) -> Self {
        Self { context }
    }

    /// Runs a plan to completion and reports every step's outcome.
    ///
    /// # Errors
    /// Returns an error only for defects in the executor's own machinery;
    /// step failures, skips, and cancellation are reported inside the
    /// [`ExecutionReport`].
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionReport> {
        self.execute_seeded(plan, &HashMap::new()).await
    }

    /// Runs a plan with some step results pre-resolved.
    ///
    /// Seeded steps are marked succeeded up front and never invoked; their
    /// results satisfy dependencies and `$step_N` references as if the
    /// steps had run. Replanning uses this to carry finished work forward.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn execute_seeded(
        &self,
        plan: &ExecutionPlan,
        seeded: &HashMap<StepId, Value>,
    ) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        let progress = self.context.progress().clone();
        progress.send(ProgressEvent::PlanStarted {
            goal_id: plan.goal_id(),
            total_steps: plan.len(),
            wave_count: plan.wave_count(),
            timestamp: Utc::now(),
        });

        let mut steps = plan.step_table();
        let mut results: HashMap<StepId, Value> = HashMap::new();
        for (id, value) in seeded {
            if let Some(step) = steps.get_mut(id) {
                step.status = StepStatus::Succeeded;
                step.result = Some(value.clone());
                results.insert(*id, value.clone());
            }
        }

        // Local to this run; the context flag cancels every run on the
        // context, this one also trips when the abort policy fires.
        let run_cancel = CancelFlag::new();
        let mut aborted = false;

        for (index, wave) in plan.waves().iter().enumerate() {
            if self.context.cancel_flag().is_cancelled() {
                run_cancel.cancel();
            }
            if aborted || run_cancel.is_cancelled() {
                aborted = true;
                skip_wave(&mut steps, wave, &progress);
                continue;
            }

            progress.send(ProgressEvent::WaveStarted {
                index,
                step_ids: wave.clone(),
                timestamp: Utc::now(),
            });
            debug!("Wave {index}: dispatching {} step(s)", wave.len());

            let failed_in_wave = self
                .run_wave(wave, &mut steps, &mut results, &run_cancel, &progress)
                .await;

            if failed_in_wave && self.context.failure_policy() == FailurePolicy::AbortRemainingWave
            {
                warn!("Wave {index} had a failure, aborting remaining waves");
                run_cancel.cancel();
                aborted = true;
            }
        }

        let cancelled = self.context.cancel_flag().is_cancelled();
        let report = build_report(plan, &steps, aborted || cancelled, started_at);
        progress.send(ProgressEvent::PlanFinished {
            goal_id: plan.goal_id(),
            overall: report.overall,
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Dispatches one wave and drains it to the barrier. Returns whether
    /// any step in the wave failed.
    async fn run_wave(
        &self,
        wave: &[StepId],
        steps: &mut HashMap<StepId, Step>,
        results: &mut HashMap<StepId, Value>,
        run_cancel: &CancelFlag,
        progress: &ProgressChannel,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.context.max_concurrent_steps()));
        let mut join_set: JoinSet<TaskReport> = JoinSet::new();
        let mut any_failed = false;

        for id in wave {
            let Some((tool_name, dependencies, raw_arguments)) = steps
                .get(id)
                .filter(|step| !step.is_terminal())
                .map(|step| {
                    (
                        step.tool_name.clone(),
                        step.dependencies.clone(),
                        step.arguments.clone(),
                    )
                })
            else {
                // Absent from the table or already terminal (seeded).
                continue;
            };

            if let Some(blocker) = dependencies.iter().find(|dep| !results.contains_key(dep)) {
                debug!("Skipping step {id}: dependency {blocker} did not succeed");
                mark_skipped(steps, *id, progress);
                continue;
            }

            let arguments = match resolve_arguments(&raw_arguments, results) {
                Ok(arguments) => arguments,
                Err(error) => {
                    mark_failed(steps, *id, &error.to_string(), 0, 0, progress);
                    any_failed = true;
                    continue;
                }
            };

            let descriptor = match self.context.registry().get(&tool_name) {
                Ok(descriptor) => descriptor,
                Err(error) => {
                    mark_failed(steps, *id, &error.to_string(), 0, 0, progress);
                    any_failed = true;
                    continue;
                }
            };

            set_status(steps, *id, StepStatus::Running, progress);

            let step_id = *id;
            let policy = self.context.policy_for(&tool_name).clone();
            let invoker = ResilientInvoker::new(self.context.invoker(), self.context.breakers());
            let cancel = run_cancel.clone();
            let permits = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let start = Instant::now();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        invoker
                            .invoke(&descriptor, &arguments, &policy, &cancel)
                            .await
                    }
                    Err(_) => Err(Error::Execution("Step semaphore closed".to_owned())),
                };
                TaskReport {
                    id: step_id,
                    duration_ms: start.elapsed().as_millis() as u64,
                    result,
                }
            });
        }

        // Barrier: the wave ends only when every dispatched task is done.
        while let Some(joined) = join_set.join_next().await {
            let Ok(report) = joined else {
                warn!("A step task was aborted before reporting back");
                continue;
            };
            if self.settle(steps, results, report, progress) {
                any_failed = true;
                if self.context.failure_policy() == FailurePolicy::AbortRemainingWave {
                    // In-flight siblings observe this at their next retry
                    // boundary; queued siblings before their first attempt.
                    run_cancel.cancel();
                }
            }
        }
        any_failed
    }

    /// Applies one task's report to the step table. Returns whether the
    /// step failed.
    fn settle(
        &self,
        steps: &mut HashMap<StepId, Step>,
        results: &mut HashMap<StepId, Value>,
        report: TaskReport,
        progress: &ProgressChannel,
    ) -> bool {
        let metrics = self.context.metrics();
        let tool_name = steps
            .get(&report.id)
            .map(|step| step.tool_name.clone())
            .unwrap_or_default();

        match report.result {
            Ok(outcome) if outcome.success => {
                let data = outcome.data.unwrap_or(Value::Null);
                results.insert(report.id, data.clone());
                metrics.record(&tool_name, true, outcome.attempts, report.duration_ms);
                if let Some(step) = steps.get_mut(&report.id) {
                    step.result = Some(data);
                    step.attempts = outcome.attempts;
                    step.duration_ms = report.duration_ms;
                }
                set_status(steps, report.id, StepStatus::Succeeded, progress);
                false
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "Unknown invocation failure".to_owned());
                metrics.record(&tool_name, false, outcome.attempts, report.duration_ms);
                mark_failed(
                    steps,
                    report.id,
                    &message,
                    outcome.attempts,
                    report.duration_ms,
                    progress,
                );
                true
            }
            Err(error) => {
                // The only error a resilient invocation surfaces is
                // cooperative cancellation; the step never got a verdict.
                debug!("Step {} cancelled before a verdict: {error}", report.id);
                mark_skipped(steps, report.id, progress);
                false
            }
        }
    }
}

fn set_status(
    steps: &mut HashMap<StepId, Step>,
    id: StepId,
    status: StepStatus,
    progress: &ProgressChannel,
) {
    if let Some(step) = steps.get_mut(&id) {
        step.status = status;
        progress.step_changed(id, status);
    }
}

fn mark_skipped(steps: &mut HashMap<StepId, Step>, id: StepId, progress: &ProgressChannel) {
    set_status(steps, id, StepStatus::Skipped, progress);
}

fn mark_failed(
    steps: &mut HashMap<StepId, Step>,
    id: StepId,
    message: &str,
    attempts: u32,
    duration_ms: u64,
    progress: &ProgressChannel,
) {
    if let Some(step) = steps.get_mut(&id) {
        step.error = Some(message.to_owned());
        step.attempts = attempts;
        step.duration_ms = duration_ms;
    }
    set_status(steps, id, StepStatus::Failed, progress);
}

/// Marks every non-terminal step of a wave skipped.
fn skip_wave(steps: &mut HashMap<StepId, Step>, wave: &[StepId], progress: &ProgressChannel) {
    for id in wave {
        if steps.get(id).is_some_and(|step| !step.is_terminal()) {
            mark_skipped(steps, *id, progress);
        }
    }
}

fn build_report(
    plan: &ExecutionPlan,
    steps: &HashMap<StepId, Step>,
    aborted: bool,
    started_at: DateTime<Utc>,
) -> ExecutionReport {
    let mut outcomes = Vec::with_capacity(plan.len());
    let mut all_succeeded = true;
    for id in plan.order() {
        let Some(step) = steps.get(id) else { continue };
        if step.status != StepStatus::Succeeded {
            all_succeeded = false;
        }
        outcomes.push(StepOutcome {
            id: step.id,
            tool_name: step.tool_name.clone(),
            status: step.status,
            attempts: step.attempts,
            duration_ms: step.duration_ms,
            result: step.result.clone(),
            error: step.error.clone(),
        });
    }

    let overall = if aborted {
        OverallStatus::Aborted
    } else if all_succeeded {
        OverallStatus::Complete
    } else {
        OverallStatus::Partial
    };
    ExecutionReport {
        goal_id: plan.goal_id(),
        overall,
        steps: outcomes,
        started_at,
        finished_at: Utc::now(),
    }
}
