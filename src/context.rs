//! The runtime context: one explicitly constructed bundle of shared
//! services, owned by the process entry point and passed by reference.
//!
//! Replaces module-level singletons so tests and embedders can build
//! isolated runtimes side by side.

use std::sync::Arc;

use anyhow::Result;

use crate::config::{load_config, ResolvedConfig};
use crate::core::cache::{CacheConfig, SkillCache};
use crate::core::metrics::MetricsCollector;
use crate::core::registry::SkillRegistry;
use crate::core::runner::HookRegistry;
use crate::core::storage::AtomicStore;
use crate::core::tier::TierGuard;

/// Shared services for one runtime instance
pub struct RuntimeContext {
    pub config: ResolvedConfig,
    pub guard: Arc<TierGuard>,
    pub store: AtomicStore,
    pub cache: SkillCache,
    pub metrics: MetricsCollector,
    pub registry: SkillRegistry,
    pub hooks: HookRegistry,
}

impl RuntimeContext {
    /// Build a context from the resolved environment configuration
    pub fn from_env() -> Result<Self> {
        Self::from_config(load_config()?)
    }

    /// Build a context from an explicit configuration (tests pass a
    /// config rooted in a temp directory)
    pub fn from_config(config: ResolvedConfig) -> Result<Self> {
        let guard = Arc::new(TierGuard::new(
            config.personal_dir(),
            config.confidential_dir(),
        ));
        let store = AtomicStore::new(guard.clone());

        let cache = SkillCache::new(
            store.clone(),
            config.cache_dir(),
            CacheConfig {
                max_entries: config.cache_max_entries,
                memory_limit_mb: config.cache_memory_limit_mb,
                ..Default::default()
            },
        );

        let metrics = MetricsCollector::new(store.clone(), config.metrics_path());
        let registry = SkillRegistry::from_file(&config.registry_path)?;

        Ok(Self {
            config,
            guard,
            store,
            cache,
            metrics,
            registry,
            hooks: HookRegistry::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_from_explicit_config() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig {
            home: temp.path().to_path_buf(),
            knowledge: temp.path().join("knowledge"),
            config_file: None,
            cache_max_entries: 10,
            cache_memory_limit_mb: 64.0,
            registry_path: temp.path().join("skills.yaml"),
        };

        let ctx = RuntimeContext::from_config(config).unwrap();
        assert!(ctx.registry.is_empty());
        assert!(ctx.cache.is_empty());
        assert_eq!(
            ctx.metrics.history_path(),
            temp.path().join("metrics.jsonl").as_path()
        );
    }
}
