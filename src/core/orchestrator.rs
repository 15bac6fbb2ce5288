//! Main orchestrator for pipeline execution.
//!
//! Resolves skill names against the registry, substitutes parameters
//! between steps, and runs sequences (with retry and timeout) or
//! independent parallel batches of skill processes.
//!
//! Each skill invocation is an independent OS process; the only state
//! shared across concurrent invocations is the filesystem. A timeout
//! on one parallel step kills only that step's process, never its
//! siblings, and there is no cross-step cancellation propagation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Envelope, ExecStatus, PipelineResult, PipelineStep, StepResult};

use super::metrics::MetricsCollector;
use super::pipeline::{substitute_params, Pipeline, RunMode};
use super::registry::SkillRegistry;
use super::runner::classify_error;

/// Pipeline orchestrator
pub struct Orchestrator<'a> {
    /// Registry used to resolve skill names to executables
    registry: &'a SkillRegistry,

    /// Optional collector for per-step outcome recording
    metrics: Option<&'a MetricsCollector>,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator over the given registry
    pub fn new(registry: &'a SkillRegistry) -> Self {
        Self {
            registry,
            metrics: None,
        }
    }

    /// Record each step's outcome to a metrics collector
    pub fn with_metrics(mut self, metrics: &'a MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute a pipeline with the given initial variables.
    ///
    /// Configuration errors (invalid definition, unresolvable skill,
    /// unresolved placeholder) are raised as `Err` before or during the
    /// run; execution errors are captured in the returned step results.
    #[instrument(skip(self, pipeline, vars), fields(pipeline = %pipeline.name))]
    pub async fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        vars: BTreeMap<String, Value>,
    ) -> Result<PipelineResult> {
        pipeline.validate()?;

        // Resolve every skill up front so a bad name fails the run
        // before any process is spawned
        let executables = self.resolve_all(&pipeline.steps)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, mode = ?pipeline.mode, "Starting pipeline run");

        let steps = match pipeline.mode {
            RunMode::Sequential => {
                self.run_sequential(&pipeline.steps, &executables, &vars)
                    .await?
            }
            RunMode::Parallel => {
                self.run_parallel(&pipeline.steps, &executables, &vars)
                    .await?
            }
        };

        let status = if steps.iter().all(|s| s.status == ExecStatus::Success) {
            ExecStatus::Success
        } else {
            ExecStatus::Error
        };

        let result = PipelineResult {
            run_id,
            pipeline: pipeline.name.clone(),
            status,
            steps,
            started_at,
            completed_at: Utc::now(),
        };

        match result.status {
            ExecStatus::Success => info!(%run_id, "Pipeline run completed"),
            ExecStatus::Error => error!(%run_id, "Pipeline run finished with failures"),
        }

        Ok(result)
    }

    fn resolve_all(&self, steps: &[PipelineStep]) -> Result<Vec<PathBuf>> {
        steps
            .iter()
            .map(|step| Ok(self.registry.resolve(&step.skill)?.to_path_buf()))
            .collect()
    }

    /// Blocking single-threaded control loop: one step in flight at a
    /// time, each step seeing the previous step's envelope.
    async fn run_sequential(
        &self,
        steps: &[PipelineStep],
        executables: &[PathBuf],
        vars: &BTreeMap<String, Value>,
    ) -> Result<Vec<StepResult>> {
        let mut results = Vec::new();
        let mut prev: Option<Envelope> = None;

        for (step, exe) in steps.iter().zip(executables) {
            let params = substitute_params(&step.params, prev.as_ref(), vars)
                .with_context(|| format!("Step '{}' has unresolved parameters", step.skill))?;

            let (envelope, attempts) = execute_with_retry(exe, step, &params).await;
            self.record(&envelope).await;

            let failed = envelope.status == ExecStatus::Error;
            results.push(step_result(&envelope, attempts));
            prev = Some(envelope);

            if failed && !step.continue_on_error {
                warn!(skill = %step.skill, "Step failed, halting pipeline");
                break;
            }
            if failed {
                debug!(skill = %step.skill, "Step failed, continuing (continue_on_error)");
            }
        }

        Ok(results)
    }

    /// Launch all steps concurrently and join in input order, so the
    /// results array matches the declared step order regardless of
    /// completion order.
    async fn run_parallel(
        &self,
        steps: &[PipelineStep],
        executables: &[PathBuf],
        vars: &BTreeMap<String, Value>,
    ) -> Result<Vec<StepResult>> {
        let mut handles = Vec::with_capacity(steps.len());

        for (step, exe) in steps.iter().zip(executables) {
            let params = substitute_params(&step.params, None, vars)
                .with_context(|| format!("Step '{}' has unresolved parameters", step.skill))?;

            let step = step.clone();
            let exe = exe.clone();
            handles.push(tokio::spawn(async move {
                execute_with_retry(&exe, &step, &params).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let (envelope, attempts) = handle.await.context("Parallel step task panicked")?;
            self.record(&envelope).await;
            results.push(step_result(&envelope, attempts));
        }

        Ok(results)
    }

    async fn record(&self, envelope: &Envelope) {
        if let Some(metrics) = self.metrics {
            metrics
                .record(
                    &envelope.skill,
                    Duration::from_millis(envelope.metadata.duration_ms),
                    envelope.status,
                )
                .await;
        }
    }
}

fn step_result(envelope: &Envelope, attempts: u32) -> StepResult {
    StepResult {
        skill: envelope.skill.clone(),
        status: envelope.status,
        data: envelope.data.clone(),
        error: envelope.error.clone(),
        attempts,
    }
}

/// Run one step, retrying up to `step.retries` additional times with a
/// timed sleep between attempts. Always settles into an envelope; a
/// spawn or timeout failure becomes an error envelope.
async fn execute_with_retry(
    exe: &Path,
    step: &PipelineStep,
    params: &BTreeMap<String, Value>,
) -> (Envelope, u32) {
    let max_attempts = step.retries + 1;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let outcome = spawn_skill(exe, &step.skill, params, step.timeout()).await;

        let envelope = match outcome {
            Ok(envelope) => envelope,
            Err(e) => {
                let message = e.to_string();
                let (code, suggestion) = classify_error(&message);
                Envelope::error(&step.skill, code, message, suggestion, 0)
            }
        };

        if envelope.status == ExecStatus::Success {
            return (envelope, attempt);
        }

        if attempt < max_attempts {
            warn!(
                skill = %step.skill,
                attempt,
                delay_ms = step.retry_delay_ms,
                "Step failed, retrying"
            );
            tokio::time::sleep(step.retry_delay()).await;
            continue;
        }

        error!(skill = %step.skill, attempt, "Step failed permanently");
        return (envelope, attempt);
    }
}

/// Spawn one skill process and interpret its stdout.
///
/// Parameters are passed as `--key value` arguments. Stdout that
/// parses as an envelope is taken verbatim (the skill's own wrapper
/// built it); any other output from a zero exit is wrapped as
/// `{"output": ...}`.
async fn spawn_skill(
    exe: &Path,
    skill: &str,
    params: &BTreeMap<String, Value>,
    step_timeout: Duration,
) -> Result<Envelope> {
    let mut command = Command::new(exe);
    for (key, value) in params {
        command.arg(format!("--{}", key));
        command.arg(render_arg(value));
    }

    let start = Instant::now();
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn skill '{}' ({})", skill, exe.display()))?;

    // kill_on_drop reaps the child when the timeout drops this future,
    // so an expired step terminates without touching its siblings
    let output = timeout(step_timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            anyhow::anyhow!("Skill '{}' timed out after {:?}", skill, step_timeout)
        })?
        .with_context(|| format!("Failed to wait for skill '{}'", skill))?;

    let duration_ms = start.elapsed().as_millis() as u64;
    let stdout = String::from_utf8_lossy(&output.stdout);

    // A skill that used the execution wrapper printed an envelope,
    // whatever its exit code
    if let Ok(envelope) = serde_json::from_str::<Envelope>(stdout.trim()) {
        return Ok(envelope);
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        anyhow::bail!(
            "Skill '{}' failed with exit code {}: {}",
            skill,
            exit_code,
            stderr.trim()
        );
    }

    Ok(Envelope::success(
        skill,
        serde_json::json!({ "output": stdout.trim() }),
        duration_ms,
    ))
}

fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
