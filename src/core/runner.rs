//! The execution wrapper around a single skill's logic.
//!
//! Produces exactly one envelope per invocation: pre-hooks fire (each
//! isolated in its own failure boundary), the skill body runs under
//! wall-clock timing, the outcome is classified against known failure
//! signatures, post-hooks may observe or replace the final envelope,
//! and the result is forwarded to the metrics collector.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::domain::{Envelope, ErrorCode, ExecStatus};

use super::metrics::MetricsCollector;

/// How envelopes are rendered on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// One JSON object per invocation (the machine contract)
    #[default]
    Json,
    /// Human-readable rendering
    Human,
}

impl OutputMode {
    /// Resolve from the `SKILLRT_OUTPUT` environment variable
    pub fn from_env() -> Self {
        match std::env::var("SKILLRT_OUTPUT").as_deref() {
            Ok("human") => Self::Human,
            _ => Self::Json,
        }
    }
}

/// An in-process skill implementation
#[async_trait]
pub trait Skill: Send + Sync {
    /// Skill name as it appears in envelopes and the registry
    fn name(&self) -> &str;

    /// Run the skill's logic; the returned value becomes envelope data
    async fn execute(&self, params: &Value) -> Result<Value>;
}

/// Observes skill invocations. A hook that errors or panics is logged
/// and skipped; it can never abort the skill it observes.
pub trait SkillHook: Send + Sync {
    /// Hook name, for log attribution
    fn name(&self) -> &str;

    /// Called before the skill body runs
    fn before(&self, _skill: &str, _params: &Value) -> Result<()> {
        Ok(())
    }

    /// Called with the final envelope; may return a replacement
    fn after(&self, _skill: &str, _envelope: &Envelope) -> Result<Option<Envelope>> {
        Ok(None)
    }
}

/// Hook registry populated at startup
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn SkillHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; invocation order follows registration order
    pub fn register(&mut self, hook: Box<dyn SkillHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fire all before-hooks, each in its own failure boundary
    pub fn run_before(&self, skill: &str, params: &Value) {
        for hook in &self.hooks {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.before(skill, params)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(hook = hook.name(), skill, error = %e, "Before-hook failed"),
                Err(_) => warn!(hook = hook.name(), skill, "Before-hook panicked"),
            }
        }
    }

    /// Fire all after-hooks; the last replacement wins
    pub fn run_after(&self, skill: &str, mut envelope: Envelope) -> Envelope {
        for hook in &self.hooks {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.after(skill, &envelope)));
            match outcome {
                Ok(Ok(Some(replacement))) => envelope = replacement,
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(hook = hook.name(), skill, error = %e, "After-hook failed"),
                Err(_) => warn!(hook = hook.name(), skill, "After-hook panicked"),
            }
        }
        envelope
    }
}

/// Match an error message against known failure signatures to pick an
/// error code and an actionable suggestion
pub fn classify_error(message: &str) -> (ErrorCode, Option<String>) {
    let lower = message.to_lowercase();

    if lower.contains("command not found")
        || lower.contains("not installed")
        || lower.contains("failed to spawn")
    {
        return (
            ErrorCode::MissingDependency,
            Some("install the missing executable or fix its registry path".to_string()),
        );
    }
    if lower.contains("required argument") || lower.contains("missing argument") {
        return (
            ErrorCode::MissingArgument,
            Some("pass the required parameter in the step's params map".to_string()),
        );
    }
    if lower.contains("permission denied") || lower.contains("eacces") {
        return (
            ErrorCode::PermissionDenied,
            Some("check file permissions and the configured tier clearance".to_string()),
        );
    }
    if lower.contains("no such file") || lower.contains("file not found") {
        return (
            ErrorCode::FileNotFound,
            Some("verify the input path exists and is spelled correctly".to_string()),
        );
    }
    if lower.contains("malformed") || lower.contains("invalid") || lower.contains("parse") {
        return (
            ErrorCode::MalformedInput,
            Some("validate the input format before invoking the skill".to_string()),
        );
    }

    (ErrorCode::ExecutionError, None)
}

/// Runs skill bodies and produces their envelopes
pub struct Runner<'a> {
    metrics: &'a MetricsCollector,
    hooks: &'a HookRegistry,
    mode: OutputMode,
}

impl<'a> Runner<'a> {
    pub fn new(metrics: &'a MetricsCollector, hooks: &'a HookRegistry) -> Self {
        Self {
            metrics,
            hooks,
            mode: OutputMode::from_env(),
        }
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run a synchronous skill body
    pub async fn run_sync<F>(&self, skill: &str, params: &Value, body: F) -> Envelope
    where
        F: FnOnce(&Value) -> Result<Value>,
    {
        self.hooks.run_before(skill, params);
        let start = Instant::now();
        let result = body(params);
        self.seal(skill, result, start).await
    }

    /// Run an asynchronous skill body; identical semantics to
    /// [`Runner::run_sync`]
    pub async fn run_async<F, Fut>(&self, skill: &str, params: &Value, body: F) -> Envelope
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        self.hooks.run_before(skill, params);
        let start = Instant::now();
        let result = body(params.clone()).await;
        self.seal(skill, result, start).await
    }

    /// Run a [`Skill`] implementation
    pub async fn run_skill(&self, skill: &dyn Skill, params: &Value) -> Envelope {
        let name = skill.name().to_string();
        self.hooks.run_before(&name, params);
        let start = Instant::now();
        let result = skill.execute(params).await;
        self.seal(&name, result, start).await
    }

    async fn seal(&self, skill: &str, result: Result<Value>, start: Instant) -> Envelope {
        let duration = start.elapsed();
        let duration_ms = duration.as_millis() as u64;

        let envelope = match result {
            Ok(data) => Envelope::success(skill, data, duration_ms),
            Err(e) => {
                let message = e.to_string();
                let (code, suggestion) = classify_error(&message);
                Envelope::error(skill, code, message, suggestion, duration_ms)
            }
        };

        let envelope = self.hooks.run_after(skill, envelope);

        self.metrics.record(skill, duration, envelope.status).await;

        envelope
    }

    /// Print the envelope in the configured mode
    pub fn emit(&self, envelope: &Envelope) {
        match self.mode {
            OutputMode::Json => {
                let json = serde_json::to_string(envelope)
                    .unwrap_or_else(|_| "{\"status\":\"error\"}".to_string());
                println!("{}", json);
            }
            OutputMode::Human => print!("{}", envelope.render_human()),
        }
    }

    /// Print the envelope and exit with its status code. Used when the
    /// wrapper is the process entry point, so shells and orchestration
    /// layers can detect failure without parsing output.
    pub fn emit_and_exit(&self, envelope: &Envelope) -> ! {
        self.emit(envelope);
        std::process::exit(envelope.exit_code())
    }
}

/// Convenience check used by callers that only need the status
pub fn succeeded(envelope: &Envelope) -> bool {
    envelope.status == ExecStatus::Success
}
