//! Terminal rendering of progress events and execution reports.

use std::collections::BTreeMap;
use std::io;

use console::{Term, style};
use kestrel_core::{ExecutionReport, OverallStatus, ProgressEvent, StepOutcome, StepStatus};
use kestrel_engine::{HealthStatus, ToolMetrics};
use tokio::sync::mpsc::UnboundedReceiver;

/// Drains progress events to the terminal until the sender closes.
pub async fn print_progress(mut receiver: UnboundedReceiver<ProgressEvent>) -> io::Result<()> {
    let term = Term::stdout();
    while let Some(event) = receiver.recv().await {
        match event {
            ProgressEvent::PlanStarted {
                total_steps,
                wave_count,
                ..
            } => {
                term.write_line(&format!(
                    "Executing {total_steps} step(s) in {wave_count} wave(s)"
                ))?;
            }
            ProgressEvent::WaveStarted {
                index, step_ids, ..
            } => {
                term.write_line(&format!(
                    "{} wave {} ({} step(s))",
                    style("▶").cyan(),
                    index + 1,
                    step_ids.len()
                ))?;
            }
            ProgressEvent::StepChanged {
                step_id, status, ..
            } => {
                // Running is transient noise; only terminal states print.
                if status.is_terminal() {
                    term.write_line(&format!(
                        "  {} step {step_id} {status}",
                        status_glyph(status)
                    ))?;
                }
            }
            ProgressEvent::PlanFinished { .. } => {}
        }
    }
    Ok(())
}

/// Writes the full report: one line per step, errors indented, then the
/// summary.
pub fn print_report(report: &ExecutionReport) -> io::Result<()> {
    let term = Term::stdout();
    term.write_line("")?;
    for outcome in &report.steps {
        term.write_line(&step_line(outcome))?;
        if let Some(error) = &outcome.error {
            term.write_line(&format!("      {}", style(error).red()))?;
        }
    }
    term.write_line(&summary_line(report))?;
    Ok(())
}

/// Writes the per-tool metrics table shown under `--verbose`.
pub fn print_metrics(snapshot: &BTreeMap<String, ToolMetrics>) -> io::Result<()> {
    let term = Term::stdout();
    if snapshot.is_empty() {
        return Ok(());
    }
    term.write_line("")?;
    term.write_line("Tool metrics:")?;
    for (name, metrics) in snapshot {
        term.write_line(&format!(
            "  {name}: {} call(s), {} retried, {:.0}% errors, avg {:.0}ms, {}",
            metrics.invocations,
            metrics.retries,
            metrics.error_rate() * 100.0,
            metrics.avg_duration_ms(),
            health_label(metrics.health())
        ))?;
    }
    Ok(())
}

fn health_label(health: HealthStatus) -> &'static str {
    match health {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Critical => "critical",
    }
}

fn status_glyph(status: StepStatus) -> String {
    match status {
        StepStatus::Succeeded => style("✓").green().to_string(),
        StepStatus::Failed => style("✗").red().to_string(),
        StepStatus::Skipped => style("↷").yellow().to_string(),
        StepStatus::Pending | StepStatus::Running => style("…").dim().to_string(),
    }
}

fn step_line(outcome: &StepOutcome) -> String {
    let attempts = if outcome.attempts == 1 {
        "1 attempt".to_owned()
    } else {
        format!("{} attempts", outcome.attempts)
    };
    format!(
        "  {} step {} {} ({attempts}, {}ms)",
        status_glyph(outcome.status),
        outcome.id,
        outcome.tool_name,
        outcome.duration_ms
    )
}

fn summary_line(report: &ExecutionReport) -> String {
    let succeeded = report.count_with_status(StepStatus::Succeeded);
    let failed = report.count_with_status(StepStatus::Failed);
    let skipped = report.count_with_status(StepStatus::Skipped);
    let heading = match report.overall {
        OverallStatus::Complete => style("Plan complete").green().bold(),
        OverallStatus::Partial => style("Plan partial").yellow().bold(),
        OverallStatus::Aborted => style("Plan aborted").red().bold(),
    };
    format!(
        "{heading}: {succeeded} succeeded, {failed} failed, {skipped} skipped in {}ms",
        report.duration_ms()
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kestrel_core::{GoalId, StepId};
    use serde_json::json;

    fn outcome(status: StepStatus, attempts: u32) -> StepOutcome {
        StepOutcome {
            id: StepId::new(1),
            tool_name: "get_weather".to_owned(),
            status,
            attempts,
            duration_ms: 42,
            result: Some(json!({"temp": 18})),
            error: None,
        }
    }

    #[test]
    fn test_step_line_names_tool_and_attempts() {
        let line = step_line(&outcome(StepStatus::Succeeded, 1));
        assert!(line.contains("get_weather"), "got: {line}");
        assert!(line.contains("1 attempt,"), "got: {line}");
        assert!(line.contains("42ms"), "got: {line}");

        let retried = step_line(&outcome(StepStatus::Failed, 3));
        assert!(retried.contains("3 attempts"), "got: {retried}");
    }

    #[test]
    fn test_summary_counts_statuses() {
        let now = Utc::now();
        let report = ExecutionReport {
            goal_id: GoalId::new(),
            overall: OverallStatus::Partial,
            steps: vec![
                outcome(StepStatus::Succeeded, 1),
                outcome(StepStatus::Failed, 2),
                outcome(StepStatus::Skipped, 0),
            ],
            started_at: now,
            finished_at: now,
        };
        let line = summary_line(&report);
        assert!(line.contains("Plan partial"), "got: {line}");
        assert!(
            line.contains("1 succeeded, 1 failed, 1 skipped"),
            "got: {line}"
        );
    }
}
