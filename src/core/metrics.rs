//! Execution metrics: running aggregates, an append-only history, and
//! regression detection.
//!
//! Recording is best-effort by contract: a metrics persistence failure
//! is logged and swallowed, never allowed to abort the invocation it
//! describes. History lives in a newline-delimited JSON log; one line
//! per sample, safe to truncate or rotate externally. Appends are
//! single-line O_APPEND writes; line-level atomicity across concurrent
//! multi-process writers is assumed rather than proven.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::domain::{ExecStatus, MemorySnapshot, MetricSample};

use super::storage::AtomicStore;

/// Latency baseline for the efficiency score
const BASELINE_DURATION_MS: f64 = 1000.0;

/// Memory baseline for the efficiency score
const BASELINE_MEMORY_MB: f64 = 100.0;

/// Minimum history before a skill can be flagged as regressed
const MIN_SAMPLES_FOR_REGRESSION: usize = 5;

/// Per-skill rollup derived from samples; never the source of truth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillAggregate {
    pub skill: String,
    pub count: u64,
    pub errors: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub avg_duration_ms: f64,
    pub peak_resident_mb: f64,
    /// 0-100; latency and memory impact against fixed baselines
    pub efficiency_score: f64,
}

/// A skill whose latest run is markedly slower than its history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Regression {
    pub skill: String,
    pub latest_duration_ms: u64,
    pub prior_avg_ms: f64,
    /// How many times slower the latest run is than the prior average
    pub increase_rate: f64,
}

#[derive(Debug, Clone, Default)]
struct RunningTotals {
    count: u64,
    errors: u64,
    min_duration_ms: u64,
    max_duration_ms: u64,
    total_duration_ms: u64,
    peak_resident_mb: f64,
}

impl RunningTotals {
    fn absorb(&mut self, duration_ms: u64, status: ExecStatus, memory: &MemorySnapshot) {
        if self.count == 0 {
            self.min_duration_ms = duration_ms;
        } else {
            self.min_duration_ms = self.min_duration_ms.min(duration_ms);
        }
        self.max_duration_ms = self.max_duration_ms.max(duration_ms);
        self.total_duration_ms += duration_ms;
        self.count += 1;
        if status == ExecStatus::Error {
            self.errors += 1;
        }
        if memory.resident_mb > self.peak_resident_mb {
            self.peak_resident_mb = memory.resident_mb;
        }
    }

    fn into_aggregate(self, skill: String) -> SkillAggregate {
        let avg = if self.count == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.count as f64
        };
        SkillAggregate {
            skill,
            count: self.count,
            errors: self.errors,
            min_duration_ms: self.min_duration_ms,
            max_duration_ms: self.max_duration_ms,
            avg_duration_ms: avg,
            peak_resident_mb: self.peak_resident_mb,
            efficiency_score: efficiency_score(avg, self.peak_resident_mb),
        }
    }
}

/// `100 - (time_impact + memory_impact)`, each impact capped at 50
fn efficiency_score(avg_duration_ms: f64, peak_resident_mb: f64) -> f64 {
    let time_impact = (avg_duration_ms / BASELINE_DURATION_MS * 50.0).min(50.0);
    let memory_impact = (peak_resident_mb / BASELINE_MEMORY_MB * 50.0).min(50.0);
    100.0 - (time_impact + memory_impact)
}

/// Records one sample per invocation and serves rollups on demand
pub struct MetricsCollector {
    totals: Mutex<BTreeMap<String, RunningTotals>>,
    store: AtomicStore,
    history_path: PathBuf,
}

impl MetricsCollector {
    /// Create a collector persisting history to `history_path`
    pub fn new(store: AtomicStore, history_path: PathBuf) -> Self {
        Self {
            totals: Mutex::new(BTreeMap::new()),
            store,
            history_path,
        }
    }

    /// Path of the append-only history log
    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Record one invocation: update in-memory totals and append a
    /// sample to the history. Persistence failures are swallowed.
    pub async fn record(&self, skill: &str, duration: Duration, status: ExecStatus) {
        let sample = MetricSample::now(skill, duration.as_millis() as u64, status);
        self.record_sample(&sample).await;
    }

    /// Record a pre-built sample (used by tests and replayers)
    pub async fn record_sample(&self, sample: &MetricSample) {
        {
            let mut totals = self.totals.lock().expect("metrics mutex poisoned");
            totals.entry(sample.skill.clone()).or_default().absorb(
                sample.duration_ms,
                sample.status,
                &sample.memory,
            );
        }

        match serde_json::to_string(sample) {
            Ok(line) => {
                if let Err(e) = self.store.append_line(&self.history_path, &line).await {
                    warn!(skill = %sample.skill, error = %e, "Failed to persist metric sample");
                }
            }
            Err(e) => {
                warn!(skill = %sample.skill, error = %e, "Failed to serialize metric sample");
            }
        }
    }

    /// Per-skill rollups from the in-process running totals
    pub fn summarize(&self) -> Vec<SkillAggregate> {
        let totals = self.totals.lock().expect("metrics mutex poisoned");
        totals
            .iter()
            .map(|(skill, t)| t.clone().into_aggregate(skill.clone()))
            .collect()
    }

    /// Per-skill rollups recomputed purely from the persisted log,
    /// independent of in-process state
    pub async fn report_from_history(&self) -> Result<Vec<SkillAggregate>> {
        let samples = self.load_history().await?;

        let mut totals: BTreeMap<String, RunningTotals> = BTreeMap::new();
        for sample in &samples {
            totals.entry(sample.skill.clone()).or_default().absorb(
                sample.duration_ms,
                sample.status,
                &sample.memory,
            );
        }

        Ok(totals
            .into_iter()
            .map(|(skill, t)| t.into_aggregate(skill))
            .collect())
    }

    /// Flag skills whose most recent duration exceeds `threshold` times
    /// the average of all prior samples. Skills with fewer than 5
    /// samples are never flagged.
    pub async fn detect_regressions(&self, threshold: f64) -> Result<Vec<Regression>> {
        let samples = self.load_history().await?;

        let mut by_skill: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for sample in &samples {
            by_skill
                .entry(sample.skill.clone())
                .or_default()
                .push(sample.duration_ms);
        }

        let mut regressions = Vec::new();
        for (skill, durations) in by_skill {
            if durations.len() < MIN_SAMPLES_FOR_REGRESSION {
                continue;
            }

            let (latest, prior) = durations.split_last().expect("len >= 5");
            let prior_avg = prior.iter().sum::<u64>() as f64 / prior.len() as f64;
            if prior_avg <= 0.0 {
                continue;
            }

            let increase_rate = *latest as f64 / prior_avg;
            if *latest as f64 > threshold * prior_avg {
                regressions.push(Regression {
                    skill,
                    latest_duration_ms: *latest,
                    prior_avg_ms: prior_avg,
                    increase_rate,
                });
            }
        }

        Ok(regressions)
    }

    /// Read every sample from the history log, in append order.
    /// Unparseable lines (partial appends, rotation seams) are skipped.
    pub async fn load_history(&self) -> Result<Vec<MetricSample>> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.history_path).await.with_context(|| {
            format!("Failed to open metrics log: {}", self.history_path.display())
        })?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut samples = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricSample>(&line) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(error = %e, "Skipping malformed metrics line"),
            }
        }

        Ok(samples)
    }
}
