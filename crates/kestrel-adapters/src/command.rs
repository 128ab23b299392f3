use std::path::Path;
use std::process::Stdio;

use kestrel_core::{Error, Result};
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tracing::debug;

use crate::schema::render_scalar;

/// Adapter for tools exposed as one-shot command-line programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliAdapter;

impl CliAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs a CLI tool once and captures its output.
    ///
    /// `${param}` placeholders in the argument templates are filled from the
    /// validated arguments before the program is spawned. The result is an
    /// envelope `{command, exit_code, stdout, stderr, success}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unterminated or unmatched
    /// placeholder and [`Error::Execution`] when the program cannot be
    /// spawned or exits non-zero.
    pub async fn run(
        &self,
        program: &str,
        arg_templates: &[String],
        working_dir: Option<&Path>,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let mut rendered_args = Vec::with_capacity(arg_templates.len());
        for template in arg_templates {
            rendered_args.push(interpolate(template, arguments)?);
        }

        let mut command = Command::new(program);
        command
            .args(&rendered_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        debug!("Running '{program}' with {} argument(s)", rendered_args.len());
        let output = command
            .output()
            .await
            .map_err(|err| Error::Execution(format!("Failed to run '{program}': {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(Error::Execution(format!(
                "'{program}' exited with code {exit_code}: {}",
                stderr.trim()
            )));
        }

        Ok(json!({
            "command": program,
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
            "success": true
        }))
    }
}

/// Fills `${param}` placeholders in one argument template.
fn interpolate(template: &str, arguments: &Map<String, Value>) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(Error::Validation(format!(
                "Unterminated placeholder in template '{template}'"
            )));
        };
        let name = &after[..end];
        let value = arguments.get(name).ok_or_else(|| {
            Error::Validation(format!("No argument for placeholder '${{{name}}}'"))
        })?;
        rendered.push_str(&render_scalar(value));
        rest = &after[end + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    #[test]
    fn test_interpolate_fills_placeholders() {
        let rendered = interpolate(
            "--city=${city}/${units}",
            &args(&[("city", json!("Paris")), ("units", json!("metric"))]),
        )
        .unwrap();
        assert_eq!(rendered, "--city=Paris/metric");
    }

    #[test]
    fn test_interpolate_rejects_unknown_placeholder() {
        let result = interpolate("${missing}", &Map::new());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_interpolate_rejects_unterminated_placeholder() {
        let result = interpolate("${city", &args(&[("city", json!("Paris"))]));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let adapter = CliAdapter::new();
        let envelope = adapter
            .run(
                "echo",
                &["Hello ${name}".to_owned()],
                None,
                &args(&[("name", json!("World"))]),
            )
            .await
            .unwrap();

        assert_eq!(envelope["exit_code"], 0);
        assert_eq!(envelope["success"], true);
        assert!(envelope["stdout"].as_str().unwrap().contains("Hello World"));
    }

    #[tokio::test]
    async fn test_run_fails_on_nonzero_exit() {
        let adapter = CliAdapter::new();
        let result = adapter
            .run("sh", &["-c".to_owned(), "exit 3".to_owned()], None, &Map::new())
            .await;

        let error = result.unwrap_err();
        assert!(matches!(error, Error::Execution(_)));
        assert!(error.to_string().contains("code 3"), "got: {error}");
    }

    #[tokio::test]
    async fn test_run_fails_on_missing_program() {
        let adapter = CliAdapter::new();
        let result = adapter
            .run("kestrel-no-such-binary", &[], None, &Map::new())
            .await;
        assert!(matches!(result, Err(Error::Execution(_))));
    }

    #[tokio::test]
    async fn test_run_respects_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("marker.txt"), "here").unwrap();

        let adapter = CliAdapter::new();
        let envelope = adapter
            .run("ls", &[], Some(temp_dir.path()), &Map::new())
            .await
            .unwrap();
        assert!(envelope["stdout"].as_str().unwrap().contains("marker.txt"));
    }
}
