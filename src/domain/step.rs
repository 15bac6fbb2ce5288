//! Step and run result types for pipeline execution.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::{EnvelopeError, ExecStatus};

/// A single declared step in a pipeline run.
///
/// Immutable once a run starts. Usually deserialized from a YAML
/// pipeline definition, but can be constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Skill to invoke (resolved against the registry)
    pub skill: String,

    /// Parameters passed to the skill; string values may contain
    /// `{{var}}` or `$prev.<field>` placeholders
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,

    /// Additional attempts after the first failure
    #[serde(default)]
    pub retries: u32,

    /// Delay between retry attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-step timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Record the failure and keep going instead of halting the pipeline
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_timeout_seconds() -> u64 {
    300
}

impl PipelineStep {
    /// Construct a step with defaults for everything but the skill name
    pub fn new(skill: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            params: BTreeMap::new(),
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            timeout_seconds: default_timeout_seconds(),
            continue_on_error: false,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Retry delay as a [`Duration`]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Effective timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Lifecycle of a step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl Default for StepState {
    fn default() -> Self {
        Self::Pending
    }
}

/// Outcome of one step, appended to [`PipelineResult::steps`] and never
/// mutated afterward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Skill that was invoked
    pub skill: String,

    /// Final status after all attempts
    pub status: ExecStatus,

    /// Envelope data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error details on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,

    /// Number of attempts actually made (1-indexed; retries count)
    pub attempts: u32,
}

/// Result of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique run identifier
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline: String,

    /// Overall status (error iff any non-`continue_on_error` step failed,
    /// or any step failed at all in continue-on-error mode)
    pub status: ExecStatus,

    /// Ordered step results, one per executed step
    pub steps: Vec<StepResult>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Whether every executed step succeeded
    pub fn all_succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.status == ExecStatus::Success)
    }
}
