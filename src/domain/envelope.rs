//! The execution envelope: the uniform result structure every skill
//! invocation produces.
//!
//! Exactly one envelope is created per invocation, by the execution
//! wrapper. It is the sole externally visible representation of a
//! skill's outcome, serialized to stdout as a single JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a skill invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    Error,
}

/// Error payload attached to a failed envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeError {
    /// Machine-readable error code (see [`ErrorCode`])
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion, when the failure matched a known signature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Known failure signatures, matched against error messages to attach
/// actionable suggestions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingDependency,
    MissingArgument,
    FileNotFound,
    PermissionDenied,
    MalformedInput,
    ExecutionError,
}

/// Timing metadata recorded for every invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// Wall-clock duration from entry to exit
    pub duration_ms: u64,

    /// When the invocation completed
    pub timestamp: DateTime<Utc>,
}

/// The standard result envelope for a skill invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the skill that produced this envelope
    pub skill: String,

    /// Success or error
    pub status: ExecStatus,

    /// Skill output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error details on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,

    /// Timing metadata
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    /// Create a success envelope
    pub fn success(skill: impl Into<String>, data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            skill: skill.into(),
            status: ExecStatus::Success,
            data: Some(data),
            error: None,
            metadata: EnvelopeMetadata {
                duration_ms,
                timestamp: Utc::now(),
            },
        }
    }

    /// Create an error envelope
    pub fn error(
        skill: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        suggestion: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            skill: skill.into(),
            status: ExecStatus::Error,
            data: None,
            error: Some(EnvelopeError {
                code,
                message: message.into(),
                suggestion,
            }),
            metadata: EnvelopeMetadata {
                duration_ms,
                timestamp: Utc::now(),
            },
        }
    }

    /// Whether this envelope represents a successful invocation
    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// Process exit code for this envelope (0 on success, 1 on error)
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ExecStatus::Success => 0,
            ExecStatus::Error => 1,
        }
    }

    /// Look up a field of `data` by name (for `$prev.<field>` substitution)
    pub fn data_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|d| d.get(field))
    }

    /// Render as a human-readable report instead of JSON
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        match self.status {
            ExecStatus::Success => {
                out.push_str(&format!("✓ {} ({}ms)\n", self.skill, self.metadata.duration_ms));
                if let Some(ref data) = self.data {
                    out.push_str(
                        &serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()),
                    );
                    out.push('\n');
                }
            }
            ExecStatus::Error => {
                let err = self.error.as_ref();
                out.push_str(&format!(
                    "✗ {} failed ({}ms): {}\n",
                    self.skill,
                    self.metadata.duration_ms,
                    err.map(|e| e.message.as_str()).unwrap_or("unknown error")
                ));
                if let Some(suggestion) = err.and_then(|e| e.suggestion.as_deref()) {
                    out.push_str(&format!("  suggestion: {}\n", suggestion));
                }
            }
        }
        out
    }
}
