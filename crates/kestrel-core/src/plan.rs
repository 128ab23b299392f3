use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::step::{Step, StepId, StepStatus};

/// Unique identifier for one orchestration goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalId(Uuid);

impl GoalId {
    /// Creates a fresh random goal identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behavior when a step fails during a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel in-flight siblings and skip everything that has not run yet.
    #[default]
    AbortRemainingWave,
    /// Keep running steps that do not depend on the failed one.
    ContinueIndependentSteps,
}

/// A validated execution plan: waves of mutually independent steps.
///
/// Built once by the plan builder and never mutated afterwards. Replanning
/// produces a fresh plan rather than editing this one.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    goal_id: GoalId,
    order: Vec<StepId>,
    waves: Vec<Vec<StepId>>,
    steps: HashMap<StepId, Step>,
}

impl ExecutionPlan {
    /// Assembles a plan from parts produced by the plan builder.
    ///
    /// `order` preserves the submission order of step ids and `waves` lists
    /// step ids wave by wave, each wave free of internal dependency edges.
    #[must_use]
    pub fn new(
        goal_id: GoalId,
        order: Vec<StepId>,
        waves: Vec<Vec<StepId>>,
        steps: HashMap<StepId, Step>,
    ) -> Self {
        Self {
            goal_id,
            order,
            waves,
            steps,
        }
    }

    /// Identifier of the goal this plan serves.
    #[must_use]
    pub fn goal_id(&self) -> GoalId {
        self.goal_id
    }

    /// Step ids in submission order.
    #[must_use]
    pub fn order(&self) -> &[StepId] {
        &self.order
    }

    /// The waves of the plan, earliest first.
    #[must_use]
    pub fn waves(&self) -> &[Vec<StepId>] {
        &self.waves
    }

    /// Number of waves.
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    /// Index of the wave a step was assigned to.
    #[must_use]
    pub fn wave_of(&self, id: StepId) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.contains(&id))
    }

    /// Clones the step table as the mutable working state for one run.
    #[must_use]
    pub fn step_table(&self) -> HashMap<StepId, Step> {
        self.steps.clone()
    }

    /// Number of steps in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` when the plan contains no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Overall outcome of one plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every step succeeded.
    Complete,
    /// Some steps failed or were skipped, the rest succeeded.
    Partial,
    /// The run stopped early, by policy or cancellation.
    Aborted,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

/// Terminal record of one step after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Identifier of the step.
    pub id: StepId,
    /// Tool the step invoked.
    pub tool_name: String,
    /// Terminal status of the step.
    pub status: StepStatus,
    /// Number of adapter calls made.
    pub attempts: u32,
    /// Wall-clock invocation time in milliseconds.
    pub duration_ms: u64,
    /// Result value when the step succeeded.
    pub result: Option<Value>,
    /// Error description when the step failed.
    pub error: Option<String>,
}

/// Full report of one plan run, step by step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Identifier of the goal this run served.
    pub goal_id: GoalId,
    /// Overall outcome of the run.
    pub overall: OverallStatus,
    /// Step outcomes in submission order.
    pub steps: Vec<StepOutcome>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Returns `true` when every step succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.overall == OverallStatus::Complete
    }

    /// Results of all succeeded steps, keyed by step id.
    ///
    /// Used to seed a replanned run so finished work is not repeated.
    #[must_use]
    pub fn succeeded_results(&self) -> HashMap<StepId, Value> {
        self.steps
            .iter()
            .filter(|outcome| outcome.status == StepStatus::Succeeded)
            .filter_map(|outcome| {
                outcome
                    .result
                    .as_ref()
                    .map(|result| (outcome.id, result.clone()))
            })
            .collect()
    }

    /// Number of steps with the given terminal status.
    #[must_use]
    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// Wall-clock duration of the whole run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
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
    use crate::step::StepSpec;
    use serde_json::json;

    fn sample_plan() -> ExecutionPlan {
        let spec1 = StepSpec::new(1, "get_weather".to_owned());
        let spec2 = StepSpec::new(2, "calculator".to_owned());
        let step1 = Step::from_spec(spec1, Vec::new());
        let step2 = Step::from_spec(spec2, vec![StepId::new(1)]);

        let mut steps = HashMap::new();
        steps.insert(step1.id, step1);
        steps.insert(step2.id, step2);

        ExecutionPlan::new(
            GoalId::new(),
            vec![StepId::new(1), StepId::new(2)],
            vec![vec![StepId::new(1)], vec![StepId::new(2)]],
            steps,
        )
    }

    #[test]
    fn test_plan_accessors() {
        let plan = sample_plan();
        assert_eq!(plan.len(), 2);
        assert!(!plan.is_empty());
        assert_eq!(plan.wave_count(), 2);
        assert_eq!(plan.wave_of(StepId::new(1)), Some(0));
        assert_eq!(plan.wave_of(StepId::new(2)), Some(1));
        assert_eq!(plan.step(StepId::new(2)).unwrap().tool_name, "calculator");
        assert!(plan.step(StepId::new(9)).is_none());
    }

    #[test]
    fn test_report_succeeded_results() {
        let report = ExecutionReport {
            goal_id: GoalId::new(),
            overall: OverallStatus::Partial,
            steps: vec![
                StepOutcome {
                    id: StepId::new(1),
                    tool_name: "get_weather".to_owned(),
                    status: StepStatus::Succeeded,
                    attempts: 1,
                    duration_ms: 12,
                    result: Some(json!({"temp": 18})),
                    error: None,
                },
                StepOutcome {
                    id: StepId::new(2),
                    tool_name: "calculator".to_owned(),
                    status: StepStatus::Failed,
                    attempts: 4,
                    duration_ms: 80,
                    result: None,
                    error: Some("Execution failed: bad expression".to_owned()),
                },
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let seeded = report.succeeded_results();
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded.get(&StepId::new(1)), Some(&json!({"temp": 18})));
        assert_eq!(report.count_with_status(StepStatus::Failed), 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_failure_policy_serde() {
        assert_eq!(
            serde_json::to_string(&FailurePolicy::AbortRemainingWave).unwrap(),
            "\"abort_remaining_wave\""
        );
        let policy: FailurePolicy =
            serde_json::from_str("\"continue_independent_steps\"").unwrap();
        assert_eq!(policy, FailurePolicy::ContinueIndependentSteps);
        assert_eq!(FailurePolicy::default(), FailurePolicy::AbortRemainingWave);
    }
}
