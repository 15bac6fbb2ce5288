//! Core runtime logic.
//!
//! This module contains:
//! - Storage: crash-consistent atomic file primitives
//! - Cache: two-tier memoization with integrity checking
//! - Tier: confidentiality lattice enforcement
//! - Metrics: execution history and regression detection
//! - Runner: the per-invocation execution wrapper
//! - Pipeline/Registry/Orchestrator: chained skill execution

pub mod cache;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod storage;
pub mod tier;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, SkillCache};
pub use metrics::{MetricsCollector, Regression, SkillAggregate};
pub use orchestrator::Orchestrator;
pub use pipeline::{substitute_params, Pipeline, RunMode};
pub use registry::{SkillRegistry, SkillStatus};
pub use runner::{HookRegistry, OutputMode, Runner, Skill, SkillHook};
pub use storage::AtomicStore;
pub use tier::{Tier, TierGuard, TierViolation};
