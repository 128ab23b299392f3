//! Core types for the kestrel tool-orchestration engine.
//!
//! This crate defines the shared data model used across the workspace:
//! steps and execution plans, tool descriptors and manifests, resilience
//! policies, the error taxonomy, progress events, and the cooperative
//! cancellation flag. It performs no I/O of its own.

/// Cooperative cancellation flag.
pub mod cancel;
/// Error types and result definitions.
pub mod error;
/// Execution plans, reports, and failure policies.
pub mod plan;
/// Resilience policy parameters.
pub mod policy;
/// Progress events and the channel that carries them.
pub mod progress;
/// Steps and step specifications.
pub mod step;
/// Tool descriptors, call templates, and input schemas.
pub mod tool;

pub use cancel::CancelFlag;
pub use error::{Error, Result};
pub use plan::{ExecutionPlan, ExecutionReport, FailurePolicy, GoalId, OverallStatus, StepOutcome};
pub use policy::ResiliencePolicy;
pub use progress::{ProgressChannel, ProgressEvent};
pub use step::{Step, StepId, StepSpec, StepStatus};
pub use tool::{
    AdapterKind, AuthLocation, AuthSpec, CallTemplate, HttpMethod, InputSchema, ParamSchema,
    ParamType, ToolDescriptor, ToolManifest,
};
