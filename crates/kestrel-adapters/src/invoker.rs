use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::{CallTemplate, Result, ToolDescriptor};
use serde_json::{Map, Value};
use tracing::debug;

use crate::command::CliAdapter;
use crate::credentials::{CredentialSource, EnvCredentialSource};
use crate::http::HttpAdapter;
use crate::schema::validate_arguments;
use crate::session::SessionPool;

/// The seam between the engine and tool transports.
///
/// The resilience wrapper drives this trait; tests substitute mock
/// implementations for it.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes one tool and returns its raw result value.
    ///
    /// # Errors
    ///
    /// Returns [`kestrel_core::Error::Validation`] when the arguments do
    /// not satisfy the descriptor's input schema, and the transport's own
    /// error for anything past validation.
    async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Result<Value>;
}

/// Production invoker: validates arguments against the input schema, then
/// dispatches on the descriptor's call template.
///
/// The template enum is closed; adding a transport means adding a variant
/// and an arm here, never string matching.
pub struct AdapterSet {
    http: HttpAdapter,
    cli: CliAdapter,
    sessions: SessionPool,
    credentials: Arc<dyn CredentialSource>,
}

impl AdapterSet {
    /// Creates an adapter set resolving credentials from the process
    /// environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_credentials(Arc::new(EnvCredentialSource))
    }

    /// Creates an adapter set with a custom credential source.
    #[must_use]
    pub fn with_credentials(credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            http: HttpAdapter::new(),
            cli: CliAdapter::new(),
            sessions: SessionPool::new(),
            credentials,
        }
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for AdapterSet {
    async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let validated = validate_arguments(&descriptor.input_schema, arguments)?;
        debug!(
            "Invoking '{}' over {}",
            descriptor.name,
            descriptor.adapter_kind()
        );

        match &descriptor.call_template {
            CallTemplate::Http { url, method } => {
                self.http
                    .call(
                        url,
                        *method,
                        descriptor.auth.as_ref(),
                        self.credentials.as_ref(),
                        &validated,
                    )
                    .await
            }
            CallTemplate::Cli {
                program,
                args,
                working_dir,
            } => {
                self.cli
                    .run(program, args, working_dir.as_deref(), &validated)
                    .await
            }
            CallTemplate::Session { program, args } => {
                self.sessions
                    .call(descriptor, program, args, &validated)
                    .await
            }
        }
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
    use kestrel_core::{Error, InputSchema, ParamSchema, ParamType};
    use serde_json::json;

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "echo_message".to_owned(),
            CallTemplate::Cli {
                program: "echo".to_owned(),
                args: vec!["${message}".to_owned()],
                working_dir: None,
            },
        )
        .with_input_schema(InputSchema::new().with_required_parameter(
            "message".to_owned(),
            ParamSchema::new(ParamType::String),
        ))
    }

    #[tokio::test]
    async fn test_dispatches_cli_template() {
        let adapter = AdapterSet::new();
        let mut arguments = Map::new();
        arguments.insert("message".to_owned(), json!("dispatched"));

        let envelope = adapter
            .invoke(&echo_descriptor(), &arguments)
            .await
            .unwrap();
        assert!(envelope["stdout"].as_str().unwrap().contains("dispatched"));
    }

    #[tokio::test]
    async fn test_validation_runs_before_dispatch() {
        let adapter = AdapterSet::new();
        let descriptor = ToolDescriptor::new(
            "never_spawned".to_owned(),
            CallTemplate::Cli {
                program: "kestrel-no-such-binary".to_owned(),
                args: Vec::new(),
                working_dir: None,
            },
        )
        .with_input_schema(InputSchema::new().with_required_parameter(
            "needed".to_owned(),
            ParamSchema::new(ParamType::String),
        ));

        let result = adapter.invoke(&descriptor, &Map::new()).await;
        assert!(
            matches!(result, Err(Error::Validation(_))),
            "missing arguments must fail validation, not reach the transport"
        );
    }
}
