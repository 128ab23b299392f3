use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a step within one plan.
///
/// Steps are numbered by the planner that produced them and referenced from
/// other steps' arguments as `$step_N`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepId(u32);

impl StepId {
    /// Creates a step identifier from its numeric value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the numeric value of this identifier.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for StepId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet dispatched.
    #[default]
    Pending,
    /// Currently being invoked.
    Running,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Not invoked because a dependency failed or the run was aborted.
    Skipped,
}

impl StepStatus {
    /// Returns `true` once the step can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{name}")
    }
}

/// One step of a submitted plan, before validation.
///
/// This is the submission shape: what an external planner (or a plan file)
/// provides. The plan builder turns a list of these into an
/// [`crate::ExecutionPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Identifier unique within the submitted list.
    pub id: StepId,
    /// Name of the registered tool to invoke.
    pub tool_name: String,
    /// Arguments passed to the tool; string values may embed `$step_N`
    /// references to earlier steps' results.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Steps that must succeed before this one runs.
    #[serde(default)]
    pub dependencies: Vec<StepId>,
}

impl StepSpec {
    /// Creates a step specification with no arguments or dependencies.
    #[must_use]
    pub fn new(id: u32, tool_name: String) -> Self {
        Self {
            id: StepId::new(id),
            tool_name,
            arguments: Map::new(),
            dependencies: Vec::new(),
        }
    }

    /// Adds a single argument.
    #[must_use]
    pub fn with_argument(mut self, name: String, value: Value) -> Self {
        self.arguments.insert(name, value);
        self
    }

    /// Replaces the full argument map.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Replaces the declared dependency list.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<StepId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A validated plan step together with its execution state.
///
/// Built from a [`StepSpec`] by the plan builder; the dependency list here
/// also contains implicit dependencies discovered from `$step_N` references
/// in the arguments. Mutated only by the executor that owns the run, and
/// never again once the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Identifier unique within the plan.
    pub id: StepId,
    /// Name of the registered tool to invoke.
    pub tool_name: String,
    /// Arguments with `$step_N` references still unresolved.
    pub arguments: Map<String, Value>,
    /// Declared plus implicit dependencies, deduplicated.
    pub dependencies: Vec<StepId>,
    /// Current lifecycle state.
    pub status: StepStatus,
    /// Result value, present once the step succeeded.
    pub result: Option<Value>,
    /// Error description, present once the step failed.
    pub error: Option<String>,
    /// Number of adapter calls made for this step.
    pub attempts: u32,
    /// Wall-clock duration of the invocation in milliseconds.
    pub duration_ms: u64,
}

impl Step {
    /// Creates a pending step from its specification and the merged
    /// dependency list computed by the plan builder.
    #[must_use]
    pub fn from_spec(spec: StepSpec, dependencies: Vec<StepId>) -> Self {
        Self {
            id: spec.id,
            tool_name: spec.tool_name,
            arguments: spec.arguments,
            dependencies,
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            duration_ms: 0,
        }
    }

    /// Returns `true` once the step can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
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
    use serde_json::json;

    #[test]
    fn test_step_spec_builders() {
        let spec = StepSpec::new(3, "calculator".to_owned())
            .with_argument("expression".to_owned(), json!("$step_1.temp - $step_2.temp"))
            .with_dependencies(vec![StepId::new(1), StepId::new(2)]);

        assert_eq!(spec.id, StepId::new(3));
        assert_eq!(spec.tool_name, "calculator");
        assert_eq!(spec.dependencies.len(), 2);
        assert_eq!(
            spec.arguments.get("expression"),
            Some(&json!("$step_1.temp - $step_2.temp"))
        );
    }

    #[test]
    fn test_step_spec_deserialization_defaults() {
        let spec: StepSpec =
            serde_json::from_str(r#"{"id": 1, "tool_name": "get_weather"}"#).unwrap();
        assert_eq!(spec.id, StepId::new(1));
        assert!(spec.arguments.is_empty());
        assert!(spec.dependencies.is_empty());
    }

    #[test]
    fn test_step_status_terminal() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_step_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
        let status: StepStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(status, StepStatus::Skipped);
    }

    #[test]
    fn test_step_from_spec_merges_dependencies() {
        let spec = StepSpec::new(2, "format_report".to_owned())
            .with_argument("body".to_owned(), json!("$step_1"));
        let step = Step::from_spec(spec, vec![StepId::new(1)]);

        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.dependencies, vec![StepId::new(1)]);
        assert_eq!(step.attempts, 0);
        assert!(step.result.is_none());
        assert!(step.error.is_none());
    }
}
