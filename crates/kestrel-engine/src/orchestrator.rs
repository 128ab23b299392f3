//! The submission facade: build a plan, execute it, optionally replan.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_core::{ExecutionReport, GoalId, Result, StepId, StepSpec};
use serde_json::Value;
use tracing::{info, warn};

use crate::context::OrchestrationContext;
use crate::executor::WaveExecutor;
use crate::plan::build_plan;

/// Entry point for callers: owns a context and turns step lists into
/// execution reports.
pub struct Orchestrator {
    context: Arc<OrchestrationContext>,
}

impl Orchestrator {
    /// Creates an orchestrator over a context.
    #[must_use]
    pub fn new(context: OrchestrationContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    /// The shared context, for callers that run several plans against the
    /// same breaker and metrics state.
    #[must_use]
    pub fn context(&self) -> Arc<OrchestrationContext> {
        Arc::clone(&self.context)
    }

    /// Builds and executes one plan.
    ///
    /// # Errors
    /// Returns [`kestrel_core::Error::Planning`] or
    /// [`kestrel_core::Error::Dependency`] for structural plan defects,
    /// before any tool is invoked. Step-level failures are reported inside
    /// the [`ExecutionReport`], never as an error.
    pub async fn submit(&self, goal_id: GoalId, steps: &[StepSpec]) -> Result<ExecutionReport> {
        let plan = build_plan(goal_id, steps)?;
        info!(
            "Submitting goal {goal_id}: {} step(s), {} wave(s)",
            plan.len(),
            plan.wave_count()
        );
        WaveExecutor::new(Arc::clone(&self.context))
            .execute(&plan)
            .await
    }

    /// Builds and executes a plan, replanning on a non-complete outcome.
    ///
    /// After each run that is not complete, `revise` may produce a
    /// substitute step list (for example swapping a failed tool for an
    /// alternative). Every revision is planned from scratch; results of
    /// already-succeeded steps are carried forward by id, so those steps
    /// are never re-invoked. Stops at the first complete run, when
    /// `revise` declines, or after `max_replans` revisions.
    ///
    /// # Errors
    /// Same as [`submit`](Self::submit); a structural defect in a revised
    /// step list surfaces as the error of that replanning round.
    pub async fn submit_with_replan<F>(
        &self,
        goal_id: GoalId,
        steps: Vec<StepSpec>,
        revise: F,
        max_replans: u32,
    ) -> Result<ExecutionReport>
    where
        F: Fn(&ExecutionReport) -> Option<Vec<StepSpec>>,
    {
        let mut current = steps;
        let mut carried: HashMap<StepId, Value> = HashMap::new();
        let mut replans = 0;

        loop {
            let plan = build_plan(goal_id, &current)?;
            let report = WaveExecutor::new(Arc::clone(&self.context))
                .execute_seeded(&plan, &carried)
                .await?;

            if report.is_complete() || replans >= max_replans {
                return Ok(report);
            }

            let Some(revised) = revise(&report) else {
                return Ok(report);
            };
            carried.extend(report.succeeded_results());
            replans += 1;
            warn!(
                "Goal {goal_id} not complete, replanning (round {replans} of {max_replans}) \
                 with {} step(s) carried forward",
                carried.len()
            );
            current = revised;
        }
    }

    /// Requests cooperative cancellation of every run on this context.
    pub fn cancel(&self) {
        self.context.cancel_flag().cancel();
    }
}
