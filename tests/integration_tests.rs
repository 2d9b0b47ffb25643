//! Integration tests for the coding pipeline orchestrator.
//!
//! These exercise the full stack — orchestrator, phase executor, Sherlock
//! gate, checkpoints and memory — over a scripted step executor, plus CLI
//! smoke tests against the built binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use async_trait::async_trait;
use god_code::agent::AgentId;
use god_code::catalog::builtin_mappings;
use god_code::config::PipelineConfig;
use god_code::dag::{DagBuilder, PipelineDag, batch_agents_for_execution, resolve_execution_order};
use god_code::executor::{StepExecutor, StepOutcome, extract_output_summary};
use god_code::memory::{InMemoryBackend, MemoryBackend};
use god_code::orchestrator::PipelineOrchestrator;
use god_code::phase::Phase;
use god_code::sherlock::Verdict;
use god_code::state::{AgentExecutionResult, ExecutionState};
use predicates::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Helper to create a god-code Command.
fn god_code() -> Command {
    cargo_bin_cmd!("god-code")
}

/// Scripted step executor: every agent succeeds with the given quality
/// unless listed in `fail_for`.
struct ScriptedExecutor {
    quality: f64,
    fail_for: Vec<AgentId>,
}

impl ScriptedExecutor {
    fn clean(quality: f64) -> Self {
        Self {
            quality,
            fail_for: Vec::new(),
        }
    }

    fn failing(quality: f64, fail_for: Vec<AgentId>) -> Self {
        Self { quality, fail_for }
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        agent: AgentId,
        _prompt: &str,
        _timeout: Duration,
    ) -> anyhow::Result<StepOutcome> {
        if self.fail_for.contains(&agent) {
            anyhow::bail!("scripted failure for {agent}");
        }
        Ok(StepOutcome {
            output: format!("Decision: handled by {agent}\nFinding: looks good"),
            quality: self.quality,
            duration: Duration::from_millis(2),
        })
    }
}

fn orchestrator(executor: ScriptedExecutor) -> PipelineOrchestrator {
    PipelineOrchestrator::builder()
        .step_executor(Arc::new(executor))
        .build()
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

mod scenarios {
    use super::*;

    /// Scenario 1: happy path, understanding phase only.
    #[tokio::test]
    async fn happy_path_understanding_only() {
        let orchestrator = orchestrator(ScriptedExecutor::clean(0.9));
        let config = PipelineConfig::new("add a widget")
            .with_phase_range(Some(Phase::Understanding), Some(Phase::Understanding))
            .unwrap();

        let result = orchestrator.execute(config).await.unwrap();

        assert!(result.success);
        assert_eq!(result.phase_results.len(), 1);
        let phase = &result.phase_results[0];
        assert_eq!(phase.agent_results.len(), 6);
        assert!(phase.agent_results.iter().all(|r| r.success));
        assert_eq!(phase.total_xp, 275);
        assert_eq!(result.total_xp, 275);
        assert!(phase.checkpoint_created);

        let review = phase.validation.as_ref().unwrap();
        assert_eq!(review.verdict, Verdict::Innocent);
        assert!(review.can_proceed);
        assert!(!result.rollback_applied);
        assert_eq!(result.completed_phases, vec![Phase::Understanding]);
    }

    /// Scenario 2: critical agent failure in implementation.
    #[tokio::test]
    async fn critical_failure_stops_implementation() {
        let orchestrator = orchestrator(ScriptedExecutor::failing(
            0.9,
            vec![AgentId::CodeGenerator],
        ));
        let config = PipelineConfig::new("task")
            .with_phase_range(Some(Phase::Implementation), Some(Phase::Implementation))
            .unwrap();

        let result = orchestrator.execute(config).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_phase, Some(Phase::Implementation));
        let phase = &result.phase_results[0];
        assert!(!phase.success);

        // code-generator's failure is the last entry; nothing ran after it.
        let last = phase.agent_results.last().unwrap();
        assert_eq!(last.agent, AgentId::CodeGenerator);
        assert!(!last.success);
        let after: Vec<&AgentExecutionResult> = phase
            .agent_results
            .iter()
            .filter(|r| r.agent != AgentId::CodeGenerator)
            .collect();
        // code-generator leads the phase; no other implementation agent ran.
        assert!(after.is_empty());
    }

    /// Scenario 3: GUILTY in exploration rolls back to the understanding
    /// boundary checkpoint.
    #[tokio::test]
    async fn guilty_phase_triggers_rollback() {
        // pattern-researcher is not critical: exploration completes, the
        // gate convicts, retries re-fail, the orchestrator rolls back.
        let backend = Arc::new(InMemoryBackend::new());
        let orchestrator = PipelineOrchestrator::builder()
            .step_executor(Arc::new(ScriptedExecutor::failing(
                0.9,
                vec![AgentId::PatternResearcher],
            )))
            .memory_backend(backend.clone())
            .build();
        let config = PipelineConfig::new("task")
            .with_phase_range(Some(Phase::Understanding), Some(Phase::Exploration))
            .unwrap();

        let result = orchestrator.execute(config).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.completed_phases, vec![Phase::Understanding]);
        assert_eq!(result.failed_phase, Some(Phase::Exploration));
        assert!(result.rollback_applied);

        let exploration = result
            .phase_results
            .iter()
            .find(|r| r.phase == Phase::Exploration)
            .unwrap();
        let review = exploration.validation.as_ref().unwrap();
        assert_eq!(review.verdict, Verdict::Guilty);
        assert!(!review.remediations.is_empty());
        assert!(result
            .remediations()
            .iter()
            .any(|r| r.contains("pattern-researcher")));

        // Rollback restored the understanding boundary: every exploration
        // write is gone, the understanding hand-offs survive.
        let exploration = backend.list_prefix("coding/exploration/").await.unwrap();
        assert!(exploration.is_empty());
        let understanding = backend.list_prefix("coding/understanding/").await.unwrap();
        assert_eq!(understanding.len(), 6);
    }

    /// Scenario 4: bounded result-map eviction, cap 3, inserts A..E.
    #[test]
    fn bounded_result_map_eviction() {
        let mut state = ExecutionState::new("p1").with_result_cap(3);
        let agents = [
            AgentId::RequirementsAnalyst,
            AgentId::ScopeMapper,
            AgentId::ConstraintIdentifier,
            AgentId::SuccessCriteriaDefiner,
            AgentId::ContextGatherer,
        ];
        let result = |agent: AgentId| AgentExecutionResult {
            agent,
            success: true,
            output: json!("out"),
            quality: 0.9,
            xp_earned: 10,
            memory_writes: Vec::new(),
            execution_time: Duration::from_millis(1),
            error: None,
        };

        for agent in &agents[..4] {
            state.record_result(result(*agent));
        }
        let after_four: HashSet<AgentId> = state.result_agents();
        assert_eq!(
            after_four,
            [agents[1], agents[2], agents[3]].into_iter().collect()
        );

        state.record_result(result(agents[4]));
        let after_five: HashSet<AgentId> = state.result_agents();
        assert_eq!(
            after_five,
            [agents[2], agents[3], agents[4]].into_iter().collect()
        );
    }

    /// Scenario 5: parallel batching over the implementation chain.
    #[test]
    fn parallel_batching_follows_dependency_waves() {
        let dag = PipelineDag::from_catalog(builtin_mappings()).unwrap();
        let agents = [
            AgentId::CodeGenerator,
            AgentId::TypeImplementer,
            AgentId::UnitImplementer,
            AgentId::ServiceImplementer,
        ];
        let ordered = resolve_execution_order(&dag, &agents);
        let batches = batch_agents_for_execution(&dag, &ordered, true, 3);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![AgentId::CodeGenerator]);
        assert_eq!(batches[1], vec![AgentId::TypeImplementer]);
        let last: HashSet<AgentId> = batches[2].iter().copied().collect();
        assert_eq!(
            last,
            [AgentId::UnitImplementer, AgentId::ServiceImplementer]
                .into_iter()
                .collect()
        );
    }

    /// Scenario 6: deterministic summary extraction.
    #[test]
    fn deterministic_summary_extraction() {
        let raw = "Created: a.ts\nModified: b.ts\nDecision: use X\nFinding: faster";
        let summary = extract_output_summary(raw);

        assert_eq!(summary.files_created, vec!["a.ts"]);
        assert_eq!(summary.files_modified, vec!["b.ts"]);
        assert_eq!(summary.decisions, vec!["use X"]);
        assert_eq!(summary.key_findings, vec!["faster"]);
        assert_eq!(summary.output_length, raw.len());
    }
}

// =============================================================================
// Universal invariants
// =============================================================================

mod invariants {
    use super::*;

    #[test]
    fn topological_order_covers_all_47() {
        let dag = PipelineDag::from_catalog(builtin_mappings()).unwrap();
        assert_eq!(dag.topological_order().len(), 47);
    }

    #[test]
    fn every_batch_respects_dependencies_and_cap() {
        let dag = PipelineDag::from_catalog(builtin_mappings()).unwrap();
        for phase in Phase::ALL {
            let agents = dag.agents_by_phase(phase).to_vec();
            let ordered = resolve_execution_order(&dag, &agents);
            let batches = batch_agents_for_execution(&dag, &ordered, true, 3);

            let mut executed: HashSet<AgentId> = HashSet::new();
            let mut seen: HashSet<AgentId> = HashSet::new();
            for batch in &batches {
                assert!(batch.len() <= 3, "{phase}: batch over cap");
                let non_parallel = batch
                    .iter()
                    .filter(|a| !dag.mapping(**a).unwrap().parallelizable)
                    .count();
                if non_parallel > 0 {
                    assert_eq!(batch.len(), 1, "{phase}: non-parallelizable agent shared a batch");
                }
                for agent in batch {
                    assert!(seen.insert(*agent), "{phase}: {agent} in two batches");
                    for dep in dag.mapping(*agent).unwrap().intra_phase_deps() {
                        assert!(
                            executed.contains(&dep),
                            "{phase}: {agent} batched before {dep}"
                        );
                    }
                }
                executed.extend(batch.iter().copied());
            }
            assert_eq!(seen.len(), agents.len());
        }
    }

    #[tokio::test]
    async fn phase_xp_equals_sum_of_successful_agents() {
        let orchestrator = orchestrator(ScriptedExecutor::clean(0.9));
        let config = PipelineConfig::new("task")
            .with_phase_range(Some(Phase::Understanding), Some(Phase::Exploration))
            .unwrap();

        let result = orchestrator.execute(config).await.unwrap();
        for phase in &result.phase_results {
            if phase.success {
                let expected: u64 = phase
                    .agent_results
                    .iter()
                    .filter(|r| r.success)
                    .map(|r| r.xp_earned as u64)
                    .sum();
                assert_eq!(phase.total_xp, expected);
            }
        }
    }

    #[test]
    fn summary_extraction_is_idempotent() {
        let raw = "Finding: alpha\nFinding: beta\nDecision: gamma";
        let first = extract_output_summary(raw);
        let rejoined = first
            .key_findings
            .iter()
            .map(|f| format!("Finding: {f}"))
            .chain(first.decisions.iter().map(|d| format!("Decision: {d}")))
            .collect::<Vec<_>>()
            .join("\n");
        let second = extract_output_summary(&rejoined);
        assert_eq!(first.key_findings, second.key_findings);
        assert_eq!(first.decisions, second.decisions);
    }

    #[tokio::test]
    async fn memory_entries_are_monotonic_within_a_pipeline() {
        let backend = Arc::new(InMemoryBackend::new());
        let orchestrator = PipelineOrchestrator::builder()
            .step_executor(Arc::new(ScriptedExecutor::clean(0.9)))
            .memory_backend(backend.clone())
            .build();
        let config = PipelineConfig::new("task")
            .with_phase_range(Some(Phase::Understanding), Some(Phase::Understanding))
            .unwrap();
        orchestrator.execute(config).await.unwrap();

        let entries = backend.list_prefix("coding/").await.unwrap();
        assert!(!entries.is_empty());
        for pair in entries.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn sequential_mode_degenerates_to_resolved_order() {
        let orchestrator = PipelineOrchestrator::builder()
            .step_executor(Arc::new(ScriptedExecutor::clean(0.9)))
            .build();
        let config = PipelineConfig::new("task")
            .with_phase_range(Some(Phase::Understanding), Some(Phase::Understanding))
            .unwrap()
            .with_parallel_execution(false);

        let result = orchestrator.execute(config).await.unwrap();
        let order: Vec<AgentId> = result.phase_results[0]
            .agent_results
            .iter()
            .map(|r| r.agent)
            .collect();

        let dag = PipelineDag::from_catalog(builtin_mappings()).unwrap();
        assert_eq!(order, dag.phase_execution_order(Phase::Understanding));
    }

    #[test]
    fn cycle_in_catalog_is_a_startup_error() {
        let mut mappings = builtin_mappings();
        // Introduce a cycle inside the understanding phase.
        let idx = mappings
            .iter()
            .position(|m| m.id == AgentId::RequirementsAnalyst)
            .unwrap();
        mappings[idx].depends_on.push(AgentId::TaskDecomposer);

        let result = DagBuilder::new(mappings).build();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Cycle"));
    }

    /// Forensic keys appear verbatim after a gated run.
    #[tokio::test]
    async fn forensic_namespace_is_bit_exact() {
        let backend = Arc::new(InMemoryBackend::new());
        let orchestrator = PipelineOrchestrator::builder()
            .step_executor(Arc::new(ScriptedExecutor::clean(0.9)))
            .memory_backend(backend.clone())
            .build();
        let config = PipelineConfig::new("task")
            .with_phase_range(Some(Phase::Understanding), Some(Phase::Understanding))
            .unwrap();
        orchestrator.execute(config).await.unwrap();

        for domain in [
            "coding/forensics/phase-1/case-file",
            "coding/forensics/phase-1/verdict",
            "coding/forensics/phase-1/evidence-summary",
            "coding/forensics/phase-1/remediation",
            "coding/forensics/pipeline/all-verdicts",
        ] {
            let entries = backend.list(domain).await.unwrap();
            assert_eq!(entries.len(), 1, "missing forensic domain {domain}");
        }
    }
}

// =============================================================================
// CLI smoke tests
// =============================================================================

mod cli {
    use super::*;

    #[test]
    fn test_help() {
        god_code().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        god_code().arg("--version").assert().success();
    }

    #[test]
    fn test_agents_lists_the_full_roster() {
        god_code()
            .arg("agents")
            .assert()
            .success()
            .stdout(predicate::str::contains("code-generator"))
            .stdout(predicate::str::contains("delivery-coordinator"))
            .stdout(predicate::str::contains("requirements-analyst"));
    }

    #[test]
    fn test_run_without_step_executor_is_refused() {
        god_code()
            .arg("run")
            .arg("some task")
            .env_remove("GOD_CODE_CMD")
            .assert()
            .failure()
            .stderr(predicate::str::contains("step executor"));
    }

    #[test]
    fn test_validate_reports_missing_directory() {
        god_code()
            .arg("--agents-dir")
            .arg("/nonexistent/agents")
            .arg("validate")
            .assert()
            .failure();
    }

    #[test]
    fn test_validate_empty_directory_reports_file_less_catalog() {
        let dir = tempfile::tempdir().unwrap();
        god_code()
            .arg("--agents-dir")
            .arg(dir.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("47 issues"));
    }

    #[test]
    fn test_run_with_scripted_shell_executor() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("step.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf 'Decision: ok\\nQUALITY: 0.9\\n'\n",
        )
        .unwrap();

        god_code()
            .arg("run")
            .arg("echo-based smoke task")
            .arg("--step-cmd")
            .arg(format!("sh {}", script.display()))
            .arg("--start-phase")
            .arg("understanding")
            .arg("--end-phase")
            .arg("understanding")
            .assert()
            .success()
            .stdout(predicate::str::contains("succeeded"));
    }
}
