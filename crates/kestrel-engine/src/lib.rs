//! The kestrel orchestration engine.
//!
//! Takes a goal expanded into a graph of tool invocations, levels it into
//! waves of independent steps, executes waves with bounded concurrency,
//! and wraps every tool call in circuit-breaker, timeout, and retry
//! policies. All shared state hangs off an explicit
//! [`OrchestrationContext`]; the engine has no process-wide singletons.

/// Engine configuration loaded from TOML.
pub mod config;
/// The explicit state bundle shared by one run family.
pub mod context;
/// Multi-agent coordination: blackboard, hierarchy, messages.
pub mod coordinate;
/// The wave scheduler and executor.
pub mod executor;
/// Per-tool invocation metrics.
pub mod metrics;
/// The submission facade.
pub mod orchestrator;
/// Plan construction and `$step_N` references.
pub mod plan;
/// Circuit breaker, timeout, and retry around tool invocation.
pub mod resilience;

pub use config::{ExecutionConfig, KestrelConfig, ResilienceConfig};
pub use context::OrchestrationContext;
pub use coordinate::{Blackboard, BlackboardAgent, BlackboardSession, Coordinator};
pub use executor::WaveExecutor;
pub use metrics::{HealthStatus, MetricsCollector, ToolMetrics};
pub use orchestrator::Orchestrator;
pub use plan::build_plan;
pub use resilience::breaker::{BreakerRegistry, BreakerState};
pub use resilience::{InvocationOutcome, ResilientInvoker};
