use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport family a tool is invoked over.
///
/// This is a closed set: adding a transport means adding a variant here and
/// a matching [`CallTemplate`] variant, not branching on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Plain HTTP API call.
    Http,
    /// One-shot command-line program.
    Cli,
    /// Long-lived child process spoken to over JSON-RPC.
    Session,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::Cli => "cli",
            Self::Session => "session",
        };
        write!(f, "{name}")
    }
}

/// HTTP method used by an HTTP call template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Arguments are sent as query parameters.
    #[default]
    Get,
    /// Arguments are sent as a JSON body.
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
        };
        write!(f, "{name}")
    }
}

/// Where an API key is injected into an HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLocation {
    /// Appended as a query parameter.
    Query,
    /// Sent as a request header.
    Header,
}

/// Authentication block of a tool manifest.
///
/// The credential itself is never stored here; `credential_id` names an
/// entry the credential source resolves at call time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSpec {
    /// Static API key injected into the request.
    ApiKey {
        /// Whether the key goes into the query string or a header.
        location: AuthLocation,
        /// Query parameter or header name carrying the key.
        param_name: String,
        /// Identifier resolved through the credential source.
        credential_id: String,
    },
}

/// How to reach a tool, per transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallTemplate {
    /// HTTP endpoint.
    Http {
        /// Full endpoint URL.
        url: String,
        /// HTTP method; defaults to GET.
        #[serde(default)]
        method: HttpMethod,
    },
    /// Command-line program run once per invocation.
    Cli {
        /// Program to execute.
        program: String,
        /// Argument templates; `${param}` placeholders are filled from the
        /// validated arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory for the program.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    /// Long-lived JSON-RPC server spawned as a child process.
    Session {
        /// Program to spawn.
        program: String,
        /// Arguments passed to the program at spawn time.
        #[serde(default)]
        args: Vec<String>,
    },
}

impl CallTemplate {
    /// The transport family this template belongs to.
    #[must_use]
    pub fn adapter_kind(&self) -> AdapterKind {
        match self {
            Self::Http { .. } => AdapterKind::Http,
            Self::Cli { .. } => AdapterKind::Cli,
            Self::Session { .. } => AdapterKind::Session,
        }
    }
}

/// Accepted type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 string.
    String,
    /// Any JSON number.
    Number,
    /// Whole number.
    Integer,
    /// Boolean flag.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ParamType {
    /// Checks a JSON value against this type.
    #[must_use]
    pub fn is_match(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{name}")
    }
}

/// Schema of a single named parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Accepted JSON type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Closed set of accepted values, when present.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Value filled in when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSchema {
    /// Creates a parameter schema of the given type.
    #[must_use]
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            description: String::new(),
            enum_values: None,
            default: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = description;
        self
    }

    /// Restricts the parameter to a closed set of values.
    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Sets the default used when the parameter is omitted.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Input schema of a tool: named parameters plus the required subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema {
    /// Parameter schemas keyed by name.
    #[serde(default)]
    pub properties: BTreeMap<String, ParamSchema>,
    /// Names of parameters that must be present.
    #[serde(default)]
    pub required: Vec<String>,
}

impl InputSchema {
    /// Creates an empty schema accepting no parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an optional parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: String, schema: ParamSchema) -> Self {
        self.properties.insert(name, schema);
        self
    }

    /// Adds a parameter and marks it required.
    #[must_use]
    pub fn with_required_parameter(mut self, name: String, schema: ParamSchema) -> Self {
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }
}

/// Declarative description of one tool: identity, schemas, and how to call it.
///
/// Immutable once registered; the registry hands out shared references
/// rather than duplicating descriptors per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Schema the arguments are validated against before dispatch.
    #[serde(default)]
    pub input_schema: InputSchema,
    /// Optional schema of the result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Transport-specific call data.
    pub call_template: CallTemplate,
    /// Authentication applied at call time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
}

impl ToolDescriptor {
    /// Creates a descriptor with empty schemas.
    #[must_use]
    pub fn new(name: String, call_template: CallTemplate) -> Self {
        Self {
            name,
            description: String::new(),
            input_schema: InputSchema::new(),
            output_schema: None,
            call_template,
            auth: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = description;
        self
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, input_schema: InputSchema) -> Self {
        self.input_schema = input_schema;
        self
    }

    /// Sets the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, output_schema: Value) -> Self {
        self.output_schema = Some(output_schema);
        self
    }

    /// Sets the authentication block.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthSpec) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The transport family this tool is invoked over.
    #[must_use]
    pub fn adapter_kind(&self) -> AdapterKind {
        self.call_template.adapter_kind()
    }
}

/// A manifest document: the set of tools one source declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Declared tools.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
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
    fn test_manifest_deserialization() {
        let raw = r#"{
            "tools": [{
                "name": "get_current_weather",
                "description": "Current weather for any city",
                "input_schema": {
                    "properties": {
                        "q": {"type": "string", "description": "City name"},
                        "units": {
                            "type": "string",
                            "enum": ["metric", "imperial", "standard"],
                            "default": "metric"
                        }
                    },
                    "required": ["q"]
                },
                "call_template": {
                    "kind": "http",
                    "url": "https://api.openweathermap.org/data/2.5/weather",
                    "method": "GET"
                },
                "auth": {
                    "type": "api_key",
                    "location": "query",
                    "param_name": "appid",
                    "credential_id": "OPENWEATHER_API_KEY"
                }
            }]
        }"#;

        let manifest: ToolManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.tools.len(), 1);

        let tool = &manifest.tools[0];
        assert_eq!(tool.name, "get_current_weather");
        assert_eq!(tool.adapter_kind(), AdapterKind::Http);
        assert_eq!(tool.input_schema.required, vec!["q".to_owned()]);

        let units = tool.input_schema.properties.get("units").unwrap();
        assert_eq!(units.param_type, ParamType::String);
        assert_eq!(units.default, Some(json!("metric")));
        assert_eq!(
            tool.auth,
            Some(AuthSpec::ApiKey {
                location: AuthLocation::Query,
                param_name: "appid".to_owned(),
                credential_id: "OPENWEATHER_API_KEY".to_owned(),
            })
        );
    }

    #[test]
    fn test_call_template_kinds() {
        let http = CallTemplate::Http {
            url: "https://example.com".to_owned(),
            method: HttpMethod::Post,
        };
        let cli = CallTemplate::Cli {
            program: "convert".to_owned(),
            args: vec!["${input}".to_owned()],
            working_dir: None,
        };
        let session = CallTemplate::Session {
            program: "rpc-server".to_owned(),
            args: Vec::new(),
        };

        assert_eq!(http.adapter_kind(), AdapterKind::Http);
        assert_eq!(cli.adapter_kind(), AdapterKind::Cli);
        assert_eq!(session.adapter_kind(), AdapterKind::Session);
    }

    #[test]
    fn test_call_template_tagged_serialization() {
        let template = CallTemplate::Cli {
            program: "wc".to_owned(),
            args: vec!["-l".to_owned(), "${path}".to_owned()],
            working_dir: None,
        };
        let raw = serde_json::to_value(&template).unwrap();
        assert_eq!(raw["kind"], json!("cli"));
        assert_eq!(raw["program"], json!("wc"));
    }

    #[test]
    fn test_param_type_matching() {
        assert!(ParamType::String.is_match(&json!("hello")));
        assert!(ParamType::Number.is_match(&json!(1.5)));
        assert!(ParamType::Integer.is_match(&json!(3)));
        assert!(!ParamType::Integer.is_match(&json!(3.5)));
        assert!(ParamType::Boolean.is_match(&json!(true)));
        assert!(ParamType::Array.is_match(&json!([1, 2])));
        assert!(ParamType::Object.is_match(&json!({"a": 1})));
        assert!(!ParamType::String.is_match(&json!(9)));
    }

    #[test]
    fn test_schema_builders() {
        let schema = InputSchema::new()
            .with_required_parameter(
                "expression".to_owned(),
                ParamSchema::new(ParamType::String)
                    .with_description("Arithmetic expression".to_owned()),
            )
            .with_parameter(
                "precision".to_owned(),
                ParamSchema::new(ParamType::Integer).with_default(json!(2)),
            );

        assert_eq!(schema.properties.len(), 2);
        assert_eq!(schema.required, vec!["expression".to_owned()]);
    }
}
