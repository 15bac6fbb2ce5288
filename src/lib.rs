//! skillrt - shared execution runtime for agent-facing skills
//!
//! Individual skills are thin command-line tools; this crate is the
//! runtime they share:
//!
//! - Every invocation produces a uniform result envelope
//! - A two-tier (memory + disk) cache with tamper-evident persistence
//! - A pipeline orchestrator chaining skills with substitution,
//!   retries, timeouts, and parallel batches
//! - A metrics collector with an append-only history and regression
//!   detection
//! - A confidentiality-tier guard gating every data flow and
//!   filesystem mutation
//!
//! # Modules
//!
//! - `core`: runtime logic (cache, tier guard, metrics, runner,
//!   orchestrator)
//! - `domain`: data structures (Envelope, PipelineStep, MetricSample)
//! - `context`: the explicitly constructed runtime context
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! skillrt run pipelines/report.yaml --var source=notes.md
//!
//! # Invoke one skill
//! skillrt exec word-count --param input=notes.md
//!
//! # Inspect metrics history
//! skillrt report
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use context::RuntimeContext;
pub use core::{
    AtomicStore, CacheStats, MetricsCollector, Orchestrator, Pipeline, Runner, SkillCache,
    SkillRegistry, Tier, TierGuard,
};
pub use domain::{Envelope, ExecStatus, MetricSample, PipelineResult, PipelineStep, StepResult};
