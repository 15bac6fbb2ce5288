//! Pipeline definitions, loading, and parameter substitution.
//!
//! Pipelines are defined in YAML as ordered steps, each naming a skill
//! from the registry. String parameters may reference the previous
//! step's envelope (`$prev.<field>`) or caller-supplied variables
//! (`{{var}}`). An unresolved reference is a configuration error,
//! never silently defaulted.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Envelope, PipelineStep};

/// How the steps of a pipeline are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One step at a time, each seeing the previous step's envelope
    #[default]
    Sequential,
    /// All steps launched concurrently; no `$prev` references allowed
    Parallel,
}

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name (used in CLI and results)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Sequential or parallel dispatch
    #[serde(default)]
    pub mode: RunMode,

    /// Ordered list of steps to execute
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Validate the pipeline definition before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Pipeline must have at least one step");
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.skill.is_empty() {
                anyhow::bail!("Step {} has an empty skill name", i);
            }

            let uses_prev = step.params.values().any(references_prev);
            if uses_prev && i == 0 {
                anyhow::bail!(
                    "Step '{}' references $prev but is the first step",
                    step.skill
                );
            }
            if uses_prev && self.mode == RunMode::Parallel {
                anyhow::bail!(
                    "Step '{}' references $prev, which is not available in parallel mode",
                    step.skill
                );
            }
        }

        Ok(())
    }
}

fn references_prev(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with("$prev."),
        Value::Array(items) => items.iter().any(references_prev),
        Value::Object(map) => map.values().any(references_prev),
        _ => false,
    }
}

/// Resolve every placeholder in a step's parameters.
///
/// `$prev.<field>` takes the referenced value from the previous step's
/// envelope data (dotted paths descend into nested objects). `{{var}}`
/// draws from the caller-supplied variable map; a placeholder that is
/// the entire string keeps the variable's type, an embedded one is
/// rendered as text.
pub fn substitute_params(
    params: &BTreeMap<String, Value>,
    prev: Option<&Envelope>,
    vars: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    params
        .iter()
        .map(|(key, value)| Ok((key.clone(), substitute_value(value, prev, vars)?)))
        .collect()
}

fn substitute_value(
    value: &Value,
    prev: Option<&Envelope>,
    vars: &BTreeMap<String, Value>,
) -> Result<Value> {
    match value {
        Value::String(s) => substitute_string(s, prev, vars),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, prev, vars))
                .collect::<Result<_>>()?,
        )),
        Value::Object(map) => Ok(Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), substitute_value(v, prev, vars)?)))
                .collect::<Result<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    prev: Option<&Envelope>,
    vars: &BTreeMap<String, Value>,
) -> Result<Value> {
    if let Some(path) = s.strip_prefix("$prev.") {
        let envelope =
            prev.ok_or_else(|| anyhow::anyhow!("'{}' used where no previous step exists", s))?;
        return lookup_prev_field(envelope, path)
            .with_context(|| format!("Unresolved reference '{}'", s));
    }

    // Whole-string variable keeps the variable's JSON type
    if let Some(name) = s.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
        let name = name.trim();
        if !name.is_empty() && !name.contains("{{") {
            return vars
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Unresolved pipeline variable '{{{{{}}}}}'", name));
        }
    }

    // Embedded variables are rendered as text
    let mut out = String::new();
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| anyhow::anyhow!("Unterminated '{{{{' placeholder in '{}'", s))?;
        let name = after[..close].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unresolved pipeline variable '{{{{{}}}}}'", name))?;
        out.push_str(&render_scalar(value));
        rest = &after[close + 2..];
    }
    out.push_str(rest);

    Ok(Value::String(out))
}

fn lookup_prev_field(envelope: &Envelope, path: &str) -> Result<Value> {
    let mut current = envelope
        .data
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("previous step produced no data"))?;

    for segment in path.split('.') {
        current = current
            .get(segment)
            .ok_or_else(|| anyhow::anyhow!("field '{}' not present in previous output", segment))?;
    }

    Ok(current.clone())
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
