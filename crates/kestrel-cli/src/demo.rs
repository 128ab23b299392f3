//! Built-in demonstration plan over fixture tools.
//!
//! `kestrel demo` needs no network, manifests, or configuration: a scripted
//! invoker serves weather fixtures, a four-function calculator, and a
//! report formatter, wired into a small multi-wave plan.

use async_trait::async_trait;
use kestrel_adapters::{ToolInvoker, ToolRegistry};
use kestrel_core::{
    CallTemplate, Error, HttpMethod, InputSchema, ParamSchema, ParamType, Result, StepId, StepSpec,
    ToolDescriptor,
};
use serde_json::{Map, Value, json};

/// Serves every demo tool from in-process fixtures.
pub struct DemoInvoker;

#[async_trait]
impl ToolInvoker for DemoInvoker {
    async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        match descriptor.name.as_str() {
            "get_weather" => weather(arguments),
            "calculator" => calculate(arguments),
            "format_report" => format_report(arguments),
            other => Err(Error::ToolNotFound(other.to_owned())),
        }
    }
}

fn weather(arguments: &Map<String, Value>) -> Result<Value> {
    let location = arguments
        .get("location")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (temp, conditions) = match location {
        "Paris" => (18, "cloudy"),
        "London" => (15, "rainy"),
        "New York" => (22, "sunny"),
        "Tokyo" => (25, "partly cloudy"),
        other => {
            return Err(Error::Execution(format!("No weather fixture for '{other}'")));
        }
    };
    Ok(json!({"location": location, "temp": temp, "conditions": conditions}))
}

fn calculate(arguments: &Map<String, Value>) -> Result<Value> {
    let expression = arguments
        .get("expression")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut parts = expression.split_whitespace();
    let (Some(left), Some(operator), Some(right), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Validation(format!(
            "Expected 'LEFT OP RIGHT', got '{expression}'"
        )));
    };
    let left_value: f64 = left
        .parse()
        .map_err(|_| Error::Validation(format!("Not a number: '{left}'")))?;
    let right_value: f64 = right
        .parse()
        .map_err(|_| Error::Validation(format!("Not a number: '{right}'")))?;

    let result = match operator {
        "+" => left_value + right_value,
        "-" => left_value - right_value,
        "*" => left_value * right_value,
        "/" => {
            if right_value == 0.0 {
                return Err(Error::Execution("Division by zero".to_owned()));
            }
            left_value / right_value
        }
        other => {
            return Err(Error::Validation(format!("Unknown operator '{other}'")));
        }
    };

    // Whole results render as integers when referenced from later steps.
    if result.fract() == 0.0 {
        Ok(json!({"result": result as i64}))
    } else {
        Ok(json!({"result": result}))
    }
}

fn format_report(arguments: &Map<String, Value>) -> Result<Value> {
    let title = arguments
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let body = arguments
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(json!({"report": format!("{title}: {body}")}))
}

/// Registry of the three demo tools, schemas included.
pub fn demo_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(
            ToolDescriptor::new(
                "get_weather".to_owned(),
                CallTemplate::Http {
                    url: "https://demo.invalid/weather".to_owned(),
                    method: HttpMethod::Get,
                },
            )
            .with_description("Weather fixtures for a handful of cities".to_owned())
            .with_input_schema(InputSchema::new().with_required_parameter(
                "location".to_owned(),
                ParamSchema::new(ParamType::String).with_description("City name".to_owned()),
            )),
        )
        .with_tool(
            ToolDescriptor::new(
                "calculator".to_owned(),
                CallTemplate::Http {
                    url: "https://demo.invalid/calculator".to_owned(),
                    method: HttpMethod::Post,
                },
            )
            .with_description("Evaluates 'LEFT OP RIGHT' arithmetic".to_owned())
            .with_input_schema(InputSchema::new().with_required_parameter(
                "expression".to_owned(),
                ParamSchema::new(ParamType::String),
            )),
        )
        .with_tool(
            ToolDescriptor::new(
                "format_report".to_owned(),
                CallTemplate::Http {
                    url: "https://demo.invalid/report".to_owned(),
                    method: HttpMethod::Post,
                },
            )
            .with_description("Joins a title and body into one report line".to_owned())
            .with_input_schema(
                InputSchema::new()
                    .with_required_parameter(
                        "title".to_owned(),
                        ParamSchema::new(ParamType::String),
                    )
                    .with_required_parameter("body".to_owned(), ParamSchema::new(ParamType::String)),
            ),
        )
}

/// The demo plan: two weather lookups, their temperature difference, and a
/// formatted report. Step 3 declares its dependencies; step 4 relies on
/// reference scanning alone.
pub fn demo_steps() -> Vec<StepSpec> {
    vec![
        StepSpec::new(1, "get_weather".to_owned())
            .with_argument("location".to_owned(), json!("Paris")),
        StepSpec::new(2, "get_weather".to_owned())
            .with_argument("location".to_owned(), json!("London")),
        StepSpec::new(3, "calculator".to_owned())
            .with_argument("expression".to_owned(), json!("$step_1.temp - $step_2.temp"))
            .with_dependencies(vec![StepId::new(1), StepId::new(2)]),
        StepSpec::new(4, "format_report".to_owned())
            .with_argument("title".to_owned(), json!("Temperature difference"))
            .with_argument(
                "body".to_owned(),
                json!(
                    "Paris ($step_1.conditions) is $step_3.result degrees warmer \
                     than London ($step_2.conditions)"
                ),
            ),
    ]
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use kestrel_core::GoalId;
    use kestrel_engine::{OrchestrationContext, Orchestrator};
    use std::sync::Arc;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    #[test]
    fn test_calculator_operations() {
        let sum = calculate(&args(&[("expression", json!("2 + 3"))])).unwrap();
        assert_eq!(sum["result"], json!(5));

        let quotient = calculate(&args(&[("expression", json!("7 / 2"))])).unwrap();
        assert_eq!(quotient["result"], json!(3.5));

        assert!(matches!(
            calculate(&args(&[("expression", json!("1 / 0"))])),
            Err(Error::Execution(_))
        ));
        assert!(matches!(
            calculate(&args(&[("expression", json!("1 ^ 2"))])),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_weather_unknown_city_fails() {
        assert!(matches!(
            weather(&args(&[("location", json!("Atlantis"))])),
            Err(Error::Execution(_))
        ));
    }

    #[tokio::test]
    async fn test_demo_plan_runs_to_completion() {
        let context = OrchestrationContext::new(demo_registry(), Arc::new(DemoInvoker));
        let report = Orchestrator::new(context)
            .submit(GoalId::new(), &demo_steps())
            .await
            .unwrap();

        assert!(report.is_complete());
        let formatted = report.steps[3].result.as_ref().unwrap();
        let text = formatted["report"].as_str().unwrap();
        assert!(text.contains("3 degrees warmer"), "got: {text}");
        assert!(text.contains("cloudy"), "got: {text}");
    }
}
