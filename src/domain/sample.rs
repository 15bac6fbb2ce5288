//! Metric sample types.
//!
//! One immutable sample is appended to the metrics log per skill
//! invocation; the historical record is the union of all samples ever
//! appended, never edited or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::ExecStatus;

/// Process memory at the time of a sample
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Resident set size in megabytes
    pub resident_mb: f64,

    /// Virtual memory size in megabytes
    pub virtual_mb: f64,
}

impl MemorySnapshot {
    /// Snapshot the current process via sysinfo
    pub fn capture() -> Self {
        let mut system = sysinfo::System::new();
        let pid = sysinfo::Pid::from_u32(std::process::id());
        system.refresh_process(pid);

        match system.process(pid) {
            Some(process) => Self {
                resident_mb: process.memory() as f64 / (1024.0 * 1024.0),
                virtual_mb: process.virtual_memory() as f64 / (1024.0 * 1024.0),
            },
            None => Self::default(),
        }
    }
}

/// One invocation's worth of metrics, as persisted to the JSONL log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Skill name
    pub skill: String,

    /// Wall-clock duration
    pub duration_ms: u64,

    /// Invocation outcome
    pub status: ExecStatus,

    /// When the sample was recorded
    pub timestamp: DateTime<Utc>,

    /// Process memory at record time
    pub memory: MemorySnapshot,
}

impl MetricSample {
    /// Build a sample with the current timestamp and memory snapshot
    pub fn now(skill: impl Into<String>, duration_ms: u64, status: ExecStatus) -> Self {
        Self {
            skill: skill.into(),
            duration_ms,
            status,
            timestamp: Utc::now(),
            memory: MemorySnapshot::capture(),
        }
    }
}
