//! Coordination for multi-agent deployments.
//!
//! Two interchangeable strategies: a hierarchical coordinator that fans a
//! goal out into per-worker sub-plans, and a blackboard where independent
//! agents converge on a shared key space until a fixed point. Direct
//! agent-to-agent messages ride a consume-once router.

/// Shared attributed key-value store with fixed-point sessions.
pub mod blackboard;
/// Coordinator that runs per-worker sub-plans and synthesizes results.
pub mod hierarchical;
/// Consume-once message routing between agents.
pub mod message;

pub use blackboard::{Blackboard, BlackboardAgent, BlackboardEntry, BlackboardSession, SessionOutcome};
pub use hierarchical::{CoordinationOutcome, Coordinator};
pub use message::{AgentMessage, MessageKind, MessageRouter};
