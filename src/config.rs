//! Configuration for skillrt paths and limits.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SKILLRT_HOME)
//! 2. Config file (.skillrt/config.yaml)
//! 3. Defaults (~/.skillrt)
//!
//! Config file discovery:
//! - Searches current directory and parents for .skillrt/config.yaml
//! - Paths in config file are relative to the config file's parent directory
//!
//! Loading produces a [`ResolvedConfig`] value owned by the runtime
//! context; there is no global configuration state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
    /// Path to the skill registry document
    pub registry: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Runtime state directory (relative to config file)
    pub home: Option<String>,
    /// Root of the tier-classified knowledge directories
    pub knowledge: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub max_entries: Option<usize>,
    pub memory_limit_mb: Option<f64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the skillrt state root
    pub home: PathBuf,
    /// Root of the knowledge subtrees
    pub knowledge: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// In-memory cache capacity
    pub cache_max_entries: usize,
    /// Resident-memory budget for the cache pressure check
    pub cache_memory_limit_mb: f64,
    /// Skill registry document
    pub registry_path: PathBuf,
}

impl ResolvedConfig {
    /// Disk cache directory ($SKILLRT_HOME/cache)
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Append-only metrics log ($SKILLRT_HOME/metrics.jsonl)
    pub fn metrics_path(&self) -> PathBuf {
        self.home.join("metrics.jsonl")
    }

    /// Root of the `personal` tier
    pub fn personal_dir(&self) -> PathBuf {
        self.knowledge.join("personal")
    }

    /// Root of the `confidential` tier
    pub fn confidential_dir(&self) -> PathBuf {
        self.knowledge.join("confidential")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".skillrt").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".skillrt");

    let config_path = find_config_file();
    let config = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // Base for relative paths is the parent of .skillrt/
    let base_dir = config_path
        .as_deref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let home = if let Ok(env_home) = std::env::var("SKILLRT_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = config.paths.home {
        resolve_path(&base_dir, home_path)
    } else {
        default_home
    };

    let knowledge = match config.paths.knowledge {
        Some(ref knowledge_path) => resolve_path(&base_dir, knowledge_path),
        None => home.join("knowledge"),
    };

    let registry_path = match config.registry {
        Some(ref registry) => resolve_path(&base_dir, registry),
        None => home.join("skills.yaml"),
    };

    let cache = config.cache.unwrap_or(CacheSettings {
        max_entries: None,
        memory_limit_mb: None,
    });

    Ok(ResolvedConfig {
        home,
        knowledge,
        config_file: config_path,
        cache_max_entries: cache.max_entries.unwrap_or(1000),
        cache_memory_limit_mb: cache.memory_limit_mb.unwrap_or(512.0),
        registry_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let skillrt_dir = temp.path().join(".skillrt");
        std::fs::create_dir_all(&skillrt_dir).unwrap();

        let config_path = skillrt_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
paths:
  home: ./state
  knowledge: ./knowledge
cache:
  max_entries: 200
  memory_limit_mb: 128
registry: ./skills.yaml
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.paths.home, Some("./state".to_string()));
        assert_eq!(config.paths.knowledge, Some("./knowledge".to_string()));
        let cache = config.cache.unwrap();
        assert_eq!(cache.max_entries, Some(200));
        assert_eq!(cache.memory_limit_mb, Some(128.0));
        assert_eq!(config.registry, Some("./skills.yaml".to_string()));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_derived_paths() {
        let config = ResolvedConfig {
            home: PathBuf::from("/state/.skillrt"),
            knowledge: PathBuf::from("/state/.skillrt/knowledge"),
            config_file: None,
            cache_max_entries: 1000,
            cache_memory_limit_mb: 512.0,
            registry_path: PathBuf::from("/state/.skillrt/skills.yaml"),
        };

        assert_eq!(config.cache_dir(), PathBuf::from("/state/.skillrt/cache"));
        assert_eq!(
            config.metrics_path(),
            PathBuf::from("/state/.skillrt/metrics.jsonl")
        );
        assert_eq!(
            config.personal_dir(),
            PathBuf::from("/state/.skillrt/knowledge/personal")
        );
        assert_eq!(
            config.confidential_dir(),
            PathBuf::from("/state/.skillrt/knowledge/confidential")
        );
    }
}
