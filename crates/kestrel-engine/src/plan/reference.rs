use std::collections::HashMap;
use std::sync::LazyLock;

use kestrel_adapters::render_scalar;
use kestrel_core::{Error, Result, StepId};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// Matches `$step_N` with an optional dotted field path, e.g.
/// `$step_1.temp` or `$step_12.weather.wind.speed`.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"\$step_(\d+)((?:\.[A-Za-z0-9_]+)*)") {
        Ok(regex) => regex,
        Err(err) => panic!("Step reference regex is invalid: {err}"),
    }
});

/// Collects every step id referenced from an argument map, in first-seen
/// order and deduplicated.
///
/// The plan builder treats these as implicit dependencies of the step that
/// carries the arguments.
#[must_use]
pub fn scan_references(arguments: &Map<String, Value>) -> Vec<StepId> {
    let mut found = Vec::new();
    for value in arguments.values() {
        scan_value(value, &mut found);
    }
    found
}

fn scan_value(value: &Value, found: &mut Vec<StepId>) {
    match value {
        Value::String(text) => {
            for captures in REFERENCE.captures_iter(text) {
                if let Some(id) = captured_id(&captures) && !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_value(item, found);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                scan_value(nested, found);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Substitutes `$step_N` references in an argument map with the results of
/// earlier steps.
///
/// A string that is exactly one reference resolves to the referenced value
/// with its original type; references embedded in a longer string resolve
/// to a string rendering. A dotted path walks into the referenced result.
///
/// # Errors
/// Returns [`Error::Validation`] when a path does not exist inside the
/// referenced result, and [`Error::Dependency`] when a referenced step has
/// no stored result. The executor only dispatches steps whose dependencies
/// succeeded, so the latter indicates a plan defect.
pub fn resolve_arguments(
    arguments: &Map<String, Value>,
    results: &HashMap<StepId, Value>,
) -> Result<Map<String, Value>> {
    let mut resolved = Map::new();
    for (name, value) in arguments {
        resolved.insert(name.clone(), resolve_value(value, results)?);
    }
    Ok(resolved)
}

fn resolve_value(value: &Value, results: &HashMap<StepId, Value>) -> Result<Value> {
    match value {
        Value::String(text) => resolve_string(text, results),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, results)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (name, nested) in map {
                resolved.insert(name.clone(), resolve_value(nested, results)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(text: &str, results: &HashMap<StepId, Value>) -> Result<Value> {
    // A whole-string reference keeps the referenced value's type.
    if let Some(captures) = REFERENCE.captures(text)
        && captures.get(0).is_some_and(|whole| whole.as_str() == text)
    {
        return lookup(&captures, results);
    }

    let mut failure = None;
    let rendered = REFERENCE.replace_all(text, |captures: &Captures<'_>| {
        match lookup(captures, results) {
            Ok(resolved) => render_scalar(&resolved),
            Err(error) => {
                failure.get_or_insert(error);
                String::new()
            }
        }
    });
    match failure {
        Some(error) => Err(error),
        None => Ok(Value::String(rendered.into_owned())),
    }
}

fn lookup(captures: &Captures<'_>, results: &HashMap<StepId, Value>) -> Result<Value> {
    let Some(id) = captured_id(captures) else {
        return Err(Error::Validation("Malformed step reference".to_owned()));
    };
    let Some(result) = results.get(&id) else {
        return Err(Error::Dependency(format!(
            "Step {id} has no stored result to resolve against"
        )));
    };

    let path = captures.get(2).map_or("", |group| group.as_str());
    let mut current = result;
    for field in path.split('.').filter(|field| !field.is_empty()) {
        current = current.get(field).ok_or_else(|| {
            Error::Validation(format!(
                "Reference '$step_{id}{path}' names field '{field}' missing from step {id}'s result"
            ))
        })?;
    }
    Ok(current.clone())
}

fn captured_id(captures: &Captures<'_>) -> Option<StepId> {
    captures
        .get(1)
        .and_then(|group| group.as_str().parse::<u32>().ok())
        .map(StepId::new)
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

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    fn results(pairs: &[(u32, Value)]) -> HashMap<StepId, Value> {
        pairs
            .iter()
            .map(|(id, value)| (StepId::new(*id), value.clone()))
            .collect()
    }

    #[test]
    fn test_scan_finds_references_in_order() {
        let arguments = args(&[
            ("expression", json!("$step_2.temp - $step_1.temp")),
            ("extras", json!({"again": "$step_2", "list": ["$step_4"]})),
        ]);
        assert_eq!(
            scan_references(&arguments),
            vec![StepId::new(2), StepId::new(1), StepId::new(4)]
        );
    }

    #[test]
    fn test_scan_ignores_plain_values() {
        let arguments = args(&[("location", json!("Paris")), ("count", json!(3))]);
        assert!(scan_references(&arguments).is_empty());
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let resolved = resolve_arguments(
            &args(&[("payload", json!("$step_1"))]),
            &results(&[(1, json!({"temp": 18, "conditions": "cloudy"}))]),
        )
        .unwrap();
        assert_eq!(
            resolved.get("payload"),
            Some(&json!({"temp": 18, "conditions": "cloudy"}))
        );
    }

    #[test]
    fn test_dotted_path_walks_into_result() {
        let resolved = resolve_arguments(
            &args(&[("temp", json!("$step_1.weather.temp"))]),
            &results(&[(1, json!({"weather": {"temp": 18}}))]),
        )
        .unwrap();
        assert_eq!(resolved.get("temp"), Some(&json!(18)));
    }

    #[test]
    fn test_embedded_references_render_as_text() {
        let resolved = resolve_arguments(
            &args(&[("expression", json!("$step_1.temp - $step_2.temp"))]),
            &results(&[(1, json!({"temp": 18})), (2, json!({"temp": 15}))]),
        )
        .unwrap();
        assert_eq!(resolved.get("expression"), Some(&json!("18 - 15")));
    }

    #[test]
    fn test_unknown_path_fails_validation() {
        let result = resolve_arguments(
            &args(&[("temp", json!("$step_1.humidity"))]),
            &results(&[(1, json!({"temp": 18}))]),
        );
        let error = result.unwrap_err();
        assert!(matches!(error, Error::Validation(_)));
        assert!(error.to_string().contains("humidity"), "got: {error}");
    }

    #[test]
    fn test_missing_result_is_a_dependency_error() {
        let result = resolve_arguments(&args(&[("x1", json!("$step_9"))]), &HashMap::new());
        assert!(matches!(result, Err(Error::Dependency(_))));
    }

    #[test]
    fn test_non_reference_strings_pass_through() {
        let resolved = resolve_arguments(
            &args(&[("note", json!("costs $5, not a reference"))]),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(resolved.get("note"), Some(&json!("costs $5, not a reference")));
    }
}
