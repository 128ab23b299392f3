//! Subcommand handlers.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use console::Term;
use kestrel_adapters::ToolRegistry;
use kestrel_core::{FailurePolicy, GoalId, ProgressChannel, StepSpec};
use kestrel_engine::{KestrelConfig, OrchestrationContext, Orchestrator};
use serde::Deserialize;
use tracing::info;

use crate::demo;
use crate::render;

/// On-disk shape of a plan file.
#[derive(Debug, Deserialize)]
struct PlanFile {
    /// Human description of the goal; not interpreted by the executor.
    #[serde(default)]
    goal: Option<String>,
    /// Steps in submission order.
    steps: Vec<StepSpec>,
}

/// Executes a plan file.
pub async fn handle_run(
    plan_path: PathBuf,
    manifests: Vec<PathBuf>,
    continue_on_failure: bool,
    max_concurrent: Option<usize>,
    verbose: bool,
) -> Result<()> {
    let config = KestrelConfig::load_or_create()?;
    let registry = load_registry(&config, &manifests)?;

    let raw = fs::read_to_string(&plan_path)
        .with_context(|| format!("Cannot read plan file '{}'", plan_path.display()))?;
    let plan_file: PlanFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid plan file '{}'", plan_path.display()))?;
    if let Some(goal) = &plan_file.goal {
        info!("Goal: {goal}");
    }

    let mut context = OrchestrationContext::with_adapters(registry).with_config(&config);
    if continue_on_failure {
        context = context.with_failure_policy(FailurePolicy::ContinueIndependentSteps);
    }
    if let Some(cap) = max_concurrent {
        context = context.with_max_concurrent_steps(cap);
    }

    execute(context, &plan_file.steps, verbose).await
}

/// Lists every registered tool.
pub fn handle_tools(manifests: Vec<PathBuf>) -> Result<()> {
    let config = KestrelConfig::load_or_create()?;
    let registry = load_registry(&config, &manifests)?;

    let term = Term::stdout();
    if registry.is_empty() {
        term.write_line("No tools registered; pass --manifest or configure manifest_paths")?;
        return Ok(());
    }
    for descriptor in registry.descriptors() {
        term.write_line(&format!(
            "{:<24} {:<8} {}",
            descriptor.name,
            descriptor.adapter_kind().to_string(),
            descriptor.description
        ))?;
    }
    Ok(())
}

/// Shows the effective configuration.
pub fn handle_config(full: bool) -> Result<()> {
    let config = KestrelConfig::load_or_create()?;
    let term = Term::stdout();

    if full {
        term.write_line(&toml::to_string_pretty(&config)?)?;
    } else {
        term.write_line(&format!(
            "Config file: {}",
            KestrelConfig::config_dir()?.join("config.toml").display()
        ))?;
        term.write_line(&format!(
            "Manifests: {} configured",
            config.manifest_paths.len()
        ))?;
        term.write_line(&format!(
            "Max concurrent steps: {}",
            config.execution.max_concurrent_steps
        ))?;
        term.write_line(&format!(
            "On step failure: {:?}",
            config.execution.on_step_failure
        ))?;
        term.write_line(&format!(
            "Retries: {} (base delay {}ms, timeout {}ms)",
            config.resilience.default.max_retries,
            config.resilience.default.base_delay_ms,
            config.resilience.default.timeout_ms
        ))?;
    }
    Ok(())
}

/// Runs the built-in demo plan against fixture tools.
pub async fn handle_demo(verbose: bool) -> Result<()> {
    let context = OrchestrationContext::new(demo::demo_registry(), Arc::new(demo::DemoInvoker));
    execute(context, &demo::demo_steps(), verbose).await
}

/// Wires progress rendering, runs the plan, and reports the outcome. A
/// non-complete run becomes a non-zero exit.
async fn execute(context: OrchestrationContext, steps: &[StepSpec], verbose: bool) -> Result<()> {
    let (channel, receiver) = ProgressChannel::channel();
    let orchestrator = Orchestrator::new(context.with_progress(channel));
    let printer = tokio::spawn(render::print_progress(receiver));
    let metrics = orchestrator.context().metrics();

    let report = orchestrator.submit(GoalId::new(), steps).await?;

    // The progress sender lives in the context; dropping the orchestrator
    // closes the channel so the printer can drain and finish.
    drop(orchestrator);
    printer.await??;

    render::print_report(&report)?;
    if verbose {
        render::print_metrics(&metrics.snapshot())?;
    }
    if !report.is_complete() {
        bail!("Plan finished {}", report.overall);
    }
    Ok(())
}

/// Builds the registry from configured manifest paths plus any passed on
/// the command line. Directories load every `*.json` inside.
fn load_registry(config: &KestrelConfig, extra: &[PathBuf]) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let mut total = 0;
    for path in config.manifest_paths.iter().chain(extra) {
        let loaded = if path.is_dir() {
            registry.load_dir(path)?
        } else {
            registry.load_manifest(path)?
        };
        total += loaded;
    }
    if total > 0 {
        info!("{total} tool(s) registered");
    }
    Ok(registry)
}
