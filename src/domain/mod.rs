//! Domain types for the skill runtime.
//!
//! This module contains the core data structures:
//! - Envelope: the uniform result of every skill invocation
//! - PipelineStep/StepResult: declared steps and their outcomes
//! - MetricSample: append-only execution metrics

pub mod envelope;
pub mod sample;
pub mod step;

// Re-export commonly used types
pub use envelope::{Envelope, EnvelopeError, EnvelopeMetadata, ErrorCode, ExecStatus};
pub use sample::{MemorySnapshot, MetricSample};
pub use step::{PipelineResult, PipelineStep, StepResult, StepState};
