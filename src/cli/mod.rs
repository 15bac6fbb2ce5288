//! Command-line interface for skillrt.
//!
//! Provides commands for running pipelines, invoking single skills,
//! inspecting the registry, and querying metrics and cache state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use crate::context::RuntimeContext;
use crate::core::pipeline::Pipeline;
use crate::core::runner::OutputMode;
use crate::core::Orchestrator;
use crate::domain::{ExecStatus, PipelineStep};

/// skillrt - shared execution runtime for agent skills
#[derive(Parser, Debug)]
#[command(name = "skillrt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Envelope rendering on stdout
    #[arg(long, value_enum, global = true)]
    pub output: Option<OutputArg>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline definition
    Run {
        /// Path to the pipeline YAML file
        pipeline: PathBuf,

        /// Initial variables, as key=value (value may be JSON)
        #[arg(short, long = "var")]
        vars: Vec<String>,
    },

    /// Invoke a single skill from the registry
    Exec {
        /// Skill name
        skill: String,

        /// Parameters, as key=value (value may be JSON)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Per-invocation timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// List registered skills
    Skills,

    /// Show per-skill rollups from the current process
    Stats,

    /// Recompute rollups from the persisted metrics history
    Report,

    /// Flag skills whose latest run regressed against their history
    Regressions {
        /// Duration multiplier that counts as a regression
        #[arg(short, long, default_value = "1.5")]
        threshold: f64,
    },

    /// Cache inspection and maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show hit/miss/purge counters
    Stats,

    /// Drop all in-memory entries
    Clear,

    /// Evict a fraction of entries, nearest expiry first
    Purge {
        #[arg(short, long, default_value = "0.3")]
        fraction: f64,
    },
}

/// Output mode for CLI (maps to OutputMode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputArg {
    Json,
    Human,
}

impl From<OutputArg> for OutputMode {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Json => OutputMode::Json,
            OutputArg::Human => OutputMode::Human,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let ctx = RuntimeContext::from_env()?;
        let mode = self
            .output
            .map(OutputMode::from)
            .unwrap_or_else(OutputMode::from_env);

        match self.command {
            Commands::Run { pipeline, vars } => run_pipeline(&ctx, &pipeline, &vars, mode).await,
            Commands::Exec {
                skill,
                params,
                timeout,
            } => exec_skill(&ctx, &skill, &params, timeout, mode).await,
            Commands::Skills => list_skills(&ctx),
            Commands::Stats => show_stats(&ctx),
            Commands::Report => show_report(&ctx).await,
            Commands::Regressions { threshold } => show_regressions(&ctx, threshold).await,
            Commands::Cache { command } => cache_command(&ctx, command),
            Commands::Config => show_config(&ctx),
        }
    }
}

/// Parse repeated `key=value` arguments; values that parse as JSON keep
/// their type, everything else stays a string
fn parse_kv(pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected key=value, got '{}'", pair))?;
        let parsed = serde_json::from_str(value).unwrap_or(Value::String(value.to_string()));
        map.insert(key.to_string(), parsed);
    }
    Ok(map)
}

/// Run a pipeline and exit non-zero if any step failed
async fn run_pipeline(
    ctx: &RuntimeContext,
    pipeline_path: &PathBuf,
    vars: &[String],
    mode: OutputMode,
) -> Result<()> {
    let pipeline = Pipeline::from_file(pipeline_path)?;
    let vars = parse_kv(vars)?;

    let orchestrator = Orchestrator::new(&ctx.registry).with_metrics(&ctx.metrics);
    let result = orchestrator.run_pipeline(&pipeline, vars).await?;

    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputMode::Human => {
            println!("Pipeline: {} ({})", result.pipeline, result.run_id);
            for step in &result.steps {
                let mark = match step.status {
                    ExecStatus::Success => "✓",
                    ExecStatus::Error => "✗",
                };
                println!("  {} {} (attempts: {})", mark, step.skill, step.attempts);
                if let Some(ref error) = step.error {
                    println!("      {}", error.message);
                }
            }
        }
    }

    if result.status == ExecStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

/// Invoke one skill as a single-step pipeline and emit its result
async fn exec_skill(
    ctx: &RuntimeContext,
    skill: &str,
    params: &[String],
    timeout: u64,
    mode: OutputMode,
) -> Result<()> {
    let mut step = PipelineStep::new(skill);
    step.params = parse_kv(params)?;
    step.timeout_seconds = timeout;

    let pipeline = Pipeline {
        name: format!("exec-{}", skill),
        description: String::new(),
        mode: crate::core::RunMode::Sequential,
        steps: vec![step],
    };

    let orchestrator = Orchestrator::new(&ctx.registry).with_metrics(&ctx.metrics);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await?;

    let step = result.steps.first().context("No step result produced")?;
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string(step)?),
        OutputMode::Human => match step.status {
            ExecStatus::Success => println!("✓ {} succeeded", step.skill),
            ExecStatus::Error => {
                let message = step
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error");
                println!("✗ {} failed: {}", step.skill, message);
            }
        },
    }

    if step.status == ExecStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn list_skills(ctx: &RuntimeContext) -> Result<()> {
    if ctx.registry.is_empty() {
        println!(
            "No skills registered ({})",
            ctx.config.registry_path.display()
        );
        return Ok(());
    }

    for (name, entry) in ctx.registry.entries() {
        println!(
            "{:<24} {:<12} {}",
            name,
            format!("{:?}", entry.status).to_lowercase(),
            entry.path.display()
        );
    }
    Ok(())
}

fn show_stats(ctx: &RuntimeContext) -> Result<()> {
    let summary = ctx.metrics.summarize();
    if summary.is_empty() {
        println!("No invocations recorded in this process");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn show_report(ctx: &RuntimeContext) -> Result<()> {
    let report = ctx.metrics.report_from_history().await?;
    if report.is_empty() {
        println!(
            "No metrics history at {}",
            ctx.metrics.history_path().display()
        );
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn show_regressions(ctx: &RuntimeContext, threshold: f64) -> Result<()> {
    let regressions = ctx.metrics.detect_regressions(threshold).await?;
    if regressions.is_empty() {
        println!("No regressions detected (threshold {}x)", threshold);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&regressions)?);
    Ok(())
}

fn cache_command(ctx: &RuntimeContext, command: CacheCommands) -> Result<()> {
    match command {
        CacheCommands::Stats => {
            let stats = ctx.cache.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("hit_ratio: {:.3}", stats.hit_ratio());
        }
        CacheCommands::Clear => {
            ctx.cache.clear();
            println!("Cache cleared");
        }
        CacheCommands::Purge { fraction } => {
            let evicted = ctx.cache.purge(fraction);
            println!("Purged {} entries", evicted);
        }
    }
    Ok(())
}

fn show_config(ctx: &RuntimeContext) -> Result<()> {
    println!("home:       {}", ctx.config.home.display());
    println!("knowledge:  {}", ctx.config.knowledge.display());
    println!("cache dir:  {}", ctx.config.cache_dir().display());
    println!("metrics:    {}", ctx.config.metrics_path().display());
    println!("registry:   {}", ctx.config.registry_path.display());
    match &ctx.config.config_file {
        Some(path) => println!("config:     {}", path.display()),
        None => println!("config:     (defaults)"),
    }
    Ok(())
}
