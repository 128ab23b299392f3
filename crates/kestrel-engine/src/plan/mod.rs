//! Plan construction: from a submitted step list to a validated wave plan.
//!
//! Building a plan is a pure function over the step list. It merges declared
//! dependencies with implicit `$step_N` references found in arguments,
//! rejects dangling references and cycles, and levels the dependency graph
//! into waves of mutually independent steps.

/// The wave-leveling plan builder.
pub mod builder;
/// `$step_N` reference scanning and resolution.
pub mod reference;

pub use builder::build_plan;
pub use reference::{resolve_arguments, scan_references};
