//! Pipeline Execution Integration Tests
//!
//! End-to-end runs against real skill processes (small shell scripts
//! created in a temp directory and registered by path).

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use skillrt::core::{Orchestrator, Pipeline, RunMode, SkillRegistry};
use skillrt::domain::{ErrorCode, ExecStatus, PipelineStep};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn test_sequential_chaining_via_prev() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    registry.register("greet", write_script(temp.path(), "greet", "echo hello"));
    // Parameters arrive as `--key value`, so $2 is the first value
    registry.register(
        "relay",
        write_script(temp.path(), "relay", "echo \"received:$2\""),
    );

    let pipeline = Pipeline {
        name: "chain".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![
            PipelineStep::new("greet"),
            PipelineStep::new("relay").with_param("input", json!("$prev.output")),
        ],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecStatus::Success);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].data, Some(json!({"output": "hello"})));
    assert_eq!(
        result.steps[1].data,
        Some(json!({"output": "received:hello"}))
    );
}

#[tokio::test]
async fn test_variable_substitution_reaches_the_process() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    registry.register(
        "echo-arg",
        write_script(temp.path(), "echo-arg", "echo \"$2\""),
    );

    let pipeline = Pipeline {
        name: "vars".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![PipelineStep::new("echo-arg").with_param("greeting", json!("hi {{name}}"))],
    };

    let mut vars = BTreeMap::new();
    vars.insert("name".to_string(), json!("world"));

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator.run_pipeline(&pipeline, vars).await.unwrap();

    assert_eq!(result.steps[0].data, Some(json!({"output": "hi world"})));
}

#[tokio::test]
async fn test_failed_step_is_retried_the_declared_number_of_times() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    registry.register(
        "flaky",
        write_script(temp.path(), "flaky", "echo boom >&2; exit 1"),
    );

    let mut step = PipelineStep::new("flaky");
    step.retries = 2;
    step.retry_delay_ms = 10;

    let pipeline = Pipeline {
        name: "retrying".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![step],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecStatus::Error);
    let step = &result.steps[0];
    assert_eq!(step.status, ExecStatus::Error);
    // 1 initial attempt + 2 retries
    assert_eq!(step.attempts, 3);
    assert!(step.error.as_ref().unwrap().message.contains("boom"));
}

#[tokio::test]
async fn test_attempts_reflect_the_succeeding_attempt() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("attempted");

    // Fails on the first attempt, succeeds on the second
    let body = format!(
        "if [ -f {m} ]; then echo recovered; else touch {m}; exit 1; fi",
        m = marker.display()
    );

    let mut registry = SkillRegistry::default();
    registry.register("eventually", write_script(temp.path(), "eventually", &body));

    let mut step = PipelineStep::new("eventually");
    step.retries = 3;
    step.retry_delay_ms = 10;

    let pipeline = Pipeline {
        name: "recovering".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![step],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await
        .unwrap();

    let step = &result.steps[0];
    assert_eq!(step.status, ExecStatus::Success);
    assert_eq!(step.attempts, 2);
    assert_eq!(step.data, Some(json!({"output": "recovered"})));
}

#[tokio::test]
async fn test_failure_halts_unless_continue_on_error() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    registry.register("fail", write_script(temp.path(), "fail", "exit 1"));
    registry.register("ok", write_script(temp.path(), "ok", "echo fine"));

    let halting = Pipeline {
        name: "halting".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![PipelineStep::new("fail"), PipelineStep::new("ok")],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&halting, BTreeMap::new())
        .await
        .unwrap();

    // The second step never ran
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.status, ExecStatus::Error);

    let mut tolerant_fail = PipelineStep::new("fail");
    tolerant_fail.continue_on_error = true;

    let tolerant = Pipeline {
        name: "tolerant".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![tolerant_fail, PipelineStep::new("ok")],
    };

    let result = orchestrator
        .run_pipeline(&tolerant, BTreeMap::new())
        .await
        .unwrap();

    // Both steps ran, and the overall run still reports the failure
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].status, ExecStatus::Error);
    assert_eq!(result.steps[1].status, ExecStatus::Success);
    assert_eq!(result.status, ExecStatus::Error);
}

#[tokio::test]
async fn test_parallel_results_keep_declared_order() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    // The slow step is declared first, so completion order differs
    // from declaration order
    registry.register(
        "slow",
        write_script(temp.path(), "slow", "sleep 0.2; echo slow-done"),
    );
    registry.register("quick", write_script(temp.path(), "quick", "echo quick-done"));

    let pipeline = Pipeline {
        name: "fanout".to_string(),
        description: String::new(),
        mode: RunMode::Parallel,
        steps: vec![PipelineStep::new("slow"), PipelineStep::new("quick")],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecStatus::Success);
    assert_eq!(result.steps[0].skill, "slow");
    assert_eq!(result.steps[0].data, Some(json!({"output": "slow-done"})));
    assert_eq!(result.steps[1].skill, "quick");
    assert_eq!(result.steps[1].data, Some(json!({"output": "quick-done"})));
}

#[tokio::test]
async fn test_step_timeout_produces_error_result() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    registry.register("hang", write_script(temp.path(), "hang", "sleep 30"));

    let mut step = PipelineStep::new("hang");
    step.timeout_seconds = 1;

    let pipeline = Pipeline {
        name: "hung".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![step],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await
        .unwrap();

    let step = &result.steps[0];
    assert_eq!(step.status, ExecStatus::Error);
    assert_eq!(step.attempts, 1);
    assert!(step.error.as_ref().unwrap().message.contains("timed out"));
}

#[tokio::test]
async fn test_skill_emitting_an_envelope_is_taken_verbatim() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();

    // A skill whose own wrapper already built an error envelope; its
    // stdout wins over exit-code interpretation
    let body = concat!(
        "echo '{\"skill\":\"fussy\",\"status\":\"error\",",
        "\"error\":{\"code\":\"malformed_input\",\"message\":\"bad frontmatter\"},",
        "\"metadata\":{\"duration_ms\":3,\"timestamp\":\"2026-01-01T00:00:00Z\"}}'\n",
        "exit 1"
    );
    registry.register("fussy", write_script(temp.path(), "fussy", body));

    let pipeline = Pipeline {
        name: "wrapped".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![PipelineStep::new("fussy")],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator
        .run_pipeline(&pipeline, BTreeMap::new())
        .await
        .unwrap();

    let step = &result.steps[0];
    assert_eq!(step.status, ExecStatus::Error);
    let error = step.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::MalformedInput);
    assert_eq!(error.message, "bad frontmatter");
}

#[tokio::test]
async fn test_unresolved_placeholder_aborts_before_execution() {
    let temp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::default();
    let marker = temp.path().join("ran");
    registry.register(
        "tracer",
        write_script(
            temp.path(),
            "tracer",
            &format!("touch {}", marker.display()),
        ),
    );

    let pipeline = Pipeline {
        name: "misconfigured".to_string(),
        description: String::new(),
        mode: RunMode::Sequential,
        steps: vec![PipelineStep::new("tracer").with_param("input", json!("{{undefined}}"))],
    };

    let orchestrator = Orchestrator::new(&registry);
    let result = orchestrator.run_pipeline(&pipeline, BTreeMap::new()).await;

    assert!(result.is_err());
    // The process was never spawned
    assert!(!marker.exists());
}
