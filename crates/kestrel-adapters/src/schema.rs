use kestrel_core::{Error, InputSchema, Result};
use serde_json::{Map, Value};

/// Checks arguments against a tool's input schema and returns the map the
/// adapter should dispatch: validated values plus schema defaults for
/// omitted optional parameters.
///
/// # Errors
/// Returns [`Error::Validation`] for unknown argument names, missing
/// required parameters, type mismatches, and values outside a declared
/// enum. Validation failures are never retried.
pub fn validate_arguments(
    schema: &InputSchema,
    arguments: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    for name in arguments.keys() {
        if !schema.properties.contains_key(name) {
            return Err(Error::Validation(format!("Unknown argument '{name}'")));
        }
    }
    for name in &schema.required {
        if !arguments.contains_key(name) {
            return Err(Error::Validation(format!(
                "Missing required argument '{name}'"
            )));
        }
    }

    let mut validated = Map::new();
    for (name, param) in &schema.properties {
        match arguments.get(name) {
            Some(value) => {
                if !param.param_type.is_match(value) {
                    return Err(Error::Validation(format!(
                        "Argument '{name}' expects {}, got {}",
                        param.param_type,
                        json_type_name(value)
                    )));
                }
                if let Some(allowed) = &param.enum_values
                    && !allowed.contains(value)
                {
                    return Err(Error::Validation(format!(
                        "Argument '{name}' must be one of {allowed:?}"
                    )));
                }
                validated.insert(name.clone(), value.clone());
            }
            None => {
                if let Some(default) = &param.default {
                    validated.insert(name.clone(), default.clone());
                }
            }
        }
    }
    Ok(validated)
}

/// String rendering of an argument value for query strings and CLI
/// placeholder interpolation. Strings render bare; everything else renders
/// as compact JSON.
#[must_use]
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
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
    use kestrel_core::{ParamSchema, ParamType};
    use serde_json::json;

    fn weather_schema() -> InputSchema {
        InputSchema::new()
            .with_required_parameter("q".to_owned(), ParamSchema::new(ParamType::String))
            .with_parameter(
                "units".to_owned(),
                ParamSchema::new(ParamType::String)
                    .with_enum(vec![json!("metric"), json!("imperial")])
                    .with_default(json!("metric")),
            )
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    #[test]
    fn test_defaults_filled_for_omitted_optionals() {
        let validated =
            validate_arguments(&weather_schema(), &args(&[("q", json!("Paris"))])).unwrap();
        assert_eq!(validated.get("q"), Some(&json!("Paris")));
        assert_eq!(validated.get("units"), Some(&json!("metric")));
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let result = validate_arguments(&weather_schema(), &args(&[("city", json!("Paris"))]));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_required_rejected() {
        let result = validate_arguments(&weather_schema(), &Map::new());
        let error = result.unwrap_err();
        assert!(error.to_string().contains('q'), "got: {error}");
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let result = validate_arguments(&weather_schema(), &args(&[("q", json!(42))]));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_enum_violation_rejected() {
        let result = validate_arguments(
            &weather_schema(),
            &args(&[("q", json!("Paris")), ("units", json!("kelvin"))]),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_render_scalar_forms() {
        assert_eq!(render_scalar(&json!("plain")), "plain");
        assert_eq!(render_scalar(&json!(2.5)), "2.5");
        assert_eq!(render_scalar(&json!(true)), "true");
        assert_eq!(render_scalar(&json!([1, 2])), "[1,2]");
    }
}
