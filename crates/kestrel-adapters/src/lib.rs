//! Tool invocation adapters for the kestrel orchestration engine.
//!
//! This crate implements the transport seam: the [`ToolInvoker`] contract
//! the engine drives, production adapters for HTTP, CLI, and stateful
//! JSON-RPC session tools, input-schema validation, call-time credential
//! resolution, and the registry that holds tool manifests.

/// One-shot command-line adapter.
pub mod command;
/// Credential resolution at call time.
pub mod credentials;
/// HTTP endpoint adapter.
pub mod http;
/// The invoker contract and the production adapter set.
pub mod invoker;
/// Tool registry and manifest loading.
pub mod registry;
/// Input-schema validation.
pub mod schema;
/// Stateful JSON-RPC session adapter.
pub mod session;

pub use command::CliAdapter;
pub use credentials::{CredentialSource, EnvCredentialSource, StaticCredentialSource};
pub use http::HttpAdapter;
pub use invoker::{AdapterSet, ToolInvoker};
pub use registry::ToolRegistry;
pub use schema::{render_scalar, validate_arguments};
pub use session::SessionPool;
