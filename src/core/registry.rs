//! Skill registry: the lookup document mapping skill names to on-disk
//! executables and lifecycle status.
//!
//! Resolution is a pure lookup. An unknown or disabled skill is a
//! configuration error raised before any process is spawned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle status of a registered skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    Active,
    Deprecated,
    Disabled,
}

/// One registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    /// Path to the skill executable
    pub path: PathBuf,

    /// Lifecycle status
    #[serde(default = "default_status")]
    pub status: SkillStatus,

    /// Optional short description for listings
    #[serde(default)]
    pub description: String,
}

fn default_status() -> SkillStatus {
    SkillStatus::Active
}

/// The registry document (`skills.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillRegistry {
    #[serde(default)]
    pub skills: BTreeMap<String, SkillEntry>,
}

impl SkillRegistry {
    /// Load the registry from a YAML file; a missing file is an empty
    /// registry
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read skill registry: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse skill registry: {}", path.display()))
    }

    /// Register a skill programmatically
    pub fn register(&mut self, name: impl Into<String>, path: PathBuf) {
        self.skills.insert(
            name.into(),
            SkillEntry {
                path,
                status: SkillStatus::Active,
                description: String::new(),
            },
        );
    }

    /// Resolve a skill name to its executable path.
    ///
    /// Deprecated skills resolve with a warning; disabled or unknown
    /// skills are configuration errors.
    pub fn resolve(&self, name: &str) -> Result<&Path> {
        let entry = self
            .skills
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown skill '{}' (not in registry)", name))?;

        match entry.status {
            SkillStatus::Active => {}
            SkillStatus::Deprecated => {
                warn!(skill = name, "Resolving deprecated skill");
            }
            SkillStatus::Disabled => {
                anyhow::bail!("Skill '{}' is disabled in the registry", name);
            }
        }

        Ok(&entry.path)
    }

    /// All entries, for listings
    pub fn entries(&self) -> impl Iterator<Item = (&String, &SkillEntry)> {
        self.skills.iter()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_REGISTRY_YAML: &str = r#"
skills:
  word-count:
    path: /opt/skills/word-count
    description: Count words in a file
  old-extract:
    path: /opt/skills/old-extract
    status: deprecated
  broken:
    path: /opt/skills/broken
    status: disabled
"#;

    #[test]
    fn test_registry_parsing() {
        let registry: SkillRegistry = serde_yaml::from_str(TEST_REGISTRY_YAML).unwrap();

        assert_eq!(registry.len(), 3);
        let entry = &registry.skills["word-count"];
        assert_eq!(entry.status, SkillStatus::Active);
        assert_eq!(entry.path, PathBuf::from("/opt/skills/word-count"));
    }

    #[test]
    fn test_resolution() {
        let registry: SkillRegistry = serde_yaml::from_str(TEST_REGISTRY_YAML).unwrap();

        assert!(registry.resolve("word-count").is_ok());
        // Deprecated still resolves
        assert!(registry.resolve("old-extract").is_ok());
        // Disabled and unknown are configuration errors
        assert!(registry.resolve("broken").is_err());
        assert!(registry.resolve("nonexistent").is_err());
    }

    #[test]
    fn test_missing_file_is_empty_registry() {
        let registry = SkillRegistry::from_file(Path::new("/nonexistent/skills.yaml")).unwrap();
        assert!(registry.is_empty());
    }
}
