//! Whole-phase execution.
//!
//! Orders the phase's agents, takes the boundary checkpoint, runs the
//! batches (awaiting each batch in full before the next opens), cancels on
//! a critical-agent failure, then puts the phase in front of the L-Score
//! validator and the Sherlock gate. GUILTY verdicts re-run the phase while
//! retries remain; INSUFFICIENT_EVIDENCE re-collects evidence only.

use crate::agent::AgentId;
use crate::catalog::AgentMapping;
use crate::checkpoint::CheckpointManager;
use crate::config::PipelineConfig;
use crate::dag::{PipelineDag, batch_agents_for_execution, resolve_execution_order};
use crate::executor::AgentExecutor;
use crate::gates::{IntegratedValidator, LScore};
use crate::observability::{EventStatus, ObservabilityBus, ObservabilityEvent};
use crate::phase::Phase;
use crate::progress::ProgressStore;
use crate::sherlock::{GateReview, ReviewInput, SherlockGate, Verdict};
use crate::state::{AgentExecutionResult, ExecutionState};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Aggregate outcome of one phase (after any retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecutionResult {
    pub phase: Phase,
    pub success: bool,
    pub agent_results: Vec<AgentExecutionResult>,
    pub total_xp: u64,
    pub checkpoint_created: bool,
    #[serde(with = "crate::config::duration_millis")]
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<GateReview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l_score: Option<LScore>,
    /// Set when a GUILTY verdict exhausted its retries.
    pub escalated: bool,
}

impl PhaseExecutionResult {
    fn empty_success(phase: Phase, elapsed: Duration) -> Self {
        Self {
            phase,
            success: true,
            agent_results: Vec::new(),
            total_xp: 0,
            checkpoint_created: false,
            execution_time: elapsed,
            validation: None,
            l_score: None,
            escalated: false,
        }
    }
}

/// Executes one phase at a time for a single run.
pub struct PhaseExecutor {
    dag: Arc<PipelineDag>,
    agent_executor: AgentExecutor,
    progress: Arc<ProgressStore>,
    sherlock: Arc<SherlockGate>,
    validator: IntegratedValidator,
    checkpoints: CheckpointManager,
    bus: ObservabilityBus,
    config: PipelineConfig,
}

impl PhaseExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dag: Arc<PipelineDag>,
        agent_executor: AgentExecutor,
        progress: Arc<ProgressStore>,
        sherlock: Arc<SherlockGate>,
        validator: IntegratedValidator,
        checkpoints: CheckpointManager,
        bus: ObservabilityBus,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dag,
            agent_executor,
            progress,
            sherlock,
            validator,
            checkpoints,
            bus,
            config,
        }
    }

    /// Roll the run back to its most recent checkpoint.
    pub async fn rollback_to_last(
        &self,
        state: &mut ExecutionState,
    ) -> Result<bool, crate::errors::CheckpointError> {
        self.checkpoints.rollback_to_last(state).await
    }

    /// Run a phase to a final verdict, re-running on GUILTY while retries
    /// remain.
    pub async fn execute_phase(
        &mut self,
        phase: Phase,
        state: &mut ExecutionState,
    ) -> PhaseExecutionResult {
        let mut retry_count = 0;
        loop {
            let mut result = self.execute_attempt(phase, state, retry_count).await;
            if result.success {
                return result;
            }

            let guilty = result
                .validation
                .as_ref()
                .is_some_and(|v| v.verdict == Verdict::Guilty);
            if guilty && retry_count < self.config.max_retry_count {
                retry_count += 1;
                info!(
                    phase = %phase,
                    retry = retry_count,
                    "GUILTY verdict: re-running phase with remediations"
                );
                continue;
            }

            if guilty {
                // Retries exhausted: escalate to human intervention.
                result.escalated = true;
                warn!(phase = %phase, "GUILTY with retries exhausted; escalating");
            }
            return result;
        }
    }

    async fn execute_attempt(
        &mut self,
        phase: Phase,
        state: &mut ExecutionState,
        retry_count: u32,
    ) -> PhaseExecutionResult {
        let start = Instant::now();
        let agents = self.dag.agents_by_phase(phase).to_vec();
        if agents.is_empty() {
            return PhaseExecutionResult::empty_success(phase, start.elapsed());
        }

        self.bus.emit(
            ObservabilityEvent::new("phase-executor", "phase_started", EventStatus::Running)
                .with_metadata(json!({
                    "phase": phase.key(),
                    "agents": agents.len(),
                    "retry": retry_count,
                })),
        );

        let ordered = resolve_execution_order(&self.dag, &agents);

        // The boundary snapshot is taken once, before the first attempt;
        // re-snapshotting on a retry would capture the failed attempt's
        // writes and break rollback.
        let mut checkpoint_created = false;
        if retry_count == 0
            && self.config.enable_checkpoints
            && self.config.checkpoint_phases.contains(&phase)
        {
            match self.checkpoints.create(phase, state).await {
                Ok(()) => checkpoint_created = true,
                Err(err) => warn!(phase = %phase, error = %err, "checkpoint creation failed"),
            }
        }

        self.progress.register(phase, &ordered).await;

        let batches = batch_agents_for_execution(
            &self.dag,
            &ordered,
            self.config.enable_parallel_execution,
            self.config.max_parallel_agents,
        );

        let (agent_results, critical_failure, timed_out) =
            self.run_batches(phase, &batches, state, start).await;

        let total_xp: u64 = agent_results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.xp_earned as u64)
            .sum();

        if critical_failure || timed_out {
            self.bus.emit(
                ObservabilityEvent::new("phase-executor", "phase_failed", EventStatus::Error)
                    .with_duration_ms(start.elapsed().as_millis() as u64)
                    .with_metadata(json!({
                        "phase": phase.key(),
                        "critical_failure": critical_failure,
                        "timed_out": timed_out,
                    })),
            );
            return PhaseExecutionResult {
                phase,
                success: false,
                agent_results,
                total_xp,
                checkpoint_created,
                execution_time: start.elapsed(),
                validation: None,
                l_score: None,
                escalated: false,
            };
        }

        let validation = self.validator.validate_phase(phase, &agent_results);
        let phase_mappings: Vec<AgentMapping> = ordered
            .iter()
            .filter_map(|a| self.dag.mapping(*a).cloned())
            .collect();

        // INSUFFICIENT_EVIDENCE re-collects at an escalated tier without
        // re-running agents, bounded by the retry budget.
        let mut effective_retry = retry_count;
        let mut review = self
            .sherlock
            .review(ReviewInput {
                phase,
                pipeline_id: state.pipeline_id(),
                phase_mappings: &phase_mappings,
                results: &agent_results,
                retry_count: effective_retry,
                validation: Some(&validation),
            })
            .await;
        while review.verdict == Verdict::InsufficientEvidence
            && effective_retry < self.config.max_retry_count
        {
            effective_retry += 1;
            info!(
                phase = %phase,
                retry = effective_retry,
                "INSUFFICIENT_EVIDENCE: re-collecting evidence"
            );
            review = self
                .sherlock
                .review(ReviewInput {
                    phase,
                    pipeline_id: state.pipeline_id(),
                    phase_mappings: &phase_mappings,
                    results: &agent_results,
                    retry_count: effective_retry,
                    validation: Some(&validation),
                })
                .await;
        }

        let success = review.can_proceed;
        self.bus.emit(
            ObservabilityEvent::new(
                "phase-executor",
                "phase_completed",
                if success {
                    EventStatus::Success
                } else {
                    EventStatus::Error
                },
            )
            .with_duration_ms(start.elapsed().as_millis() as u64)
            .with_metadata(json!({
                "phase": phase.key(),
                "verdict": review.verdict.to_string(),
                "xp": total_xp,
            })),
        );

        PhaseExecutionResult {
            phase,
            success,
            agent_results,
            total_xp,
            checkpoint_created,
            execution_time: start.elapsed(),
            validation: Some(review),
            l_score: Some(validation.l_score),
            escalated: false,
        }
    }

    /// Run the batches in order, awaiting each batch in full. Returns the
    /// results in scheduling order, whether a critical agent failed, and
    /// whether the phase timed out. The phase deadline is checked at batch
    /// boundaries; each agent is already bounded by its own timeout.
    async fn run_batches(
        &self,
        phase: Phase,
        batches: &[Vec<AgentId>],
        state: &mut ExecutionState,
        start: Instant,
    ) -> (Vec<AgentExecutionResult>, bool, bool) {
        let mut agent_results = Vec::new();

        for batch in batches {
            if start.elapsed() > self.config.phase_timeout {
                warn!(
                    phase = %phase,
                    elapsed_s = start.elapsed().as_secs(),
                    "phase timeout exceeded; abandoning remaining batches"
                );
                return (agent_results, false, true);
            }

            let futures = batch.iter().filter_map(|a| self.dag.mapping(*a)).map(|mapping| {
                self.agent_executor
                    .execute_agent(mapping, mapping.id.canonical_order())
            });
            let batch_results = join_all(futures).await;

            for result in batch_results {
                let agent = result.agent;
                let is_critical = self.dag.mapping(agent).is_some_and(|m| m.critical);
                let failed_critically = !result.success && is_critical;

                state.record_result(result.clone());
                agent_results.push(result);

                if failed_critically {
                    warn!(phase = %phase, agent = %agent, "critical agent failed; terminating phase");
                    return (agent_results, true, false);
                }
            }
        }

        (agent_results, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_mappings;
    use crate::executor::{
        AgentServices, SectionPromptBuilder, StepExecutor, StepOutcome,
    };
    use crate::memory::{InMemoryBackend, MemoryCoordinator};
    use crate::observability::ObservabilityBus;
    use crate::progress::FileClaims;
    use crate::sherlock::SherlockConfig;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct ScriptedExecutor {
        quality: f64,
        fail_for: Vec<AgentId>,
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            agent: AgentId,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<StepOutcome> {
            if self.fail_for.contains(&agent) {
                bail!("scripted failure for {agent}");
            }
            Ok(StepOutcome {
                output: format!("Decision: done by {agent}\nFinding: ok"),
                quality: self.quality,
                duration: Duration::from_millis(2),
            })
        }
    }

    fn build_executor(
        step_executor: ScriptedExecutor,
        config: PipelineConfig,
    ) -> (PhaseExecutor, Arc<MemoryCoordinator>) {
        let coordinator = Arc::new(MemoryCoordinator::new(Arc::new(InMemoryBackend::new())));
        let progress = Arc::new(ProgressStore::new());
        let services = AgentServices {
            coordinator: coordinator.clone(),
            progress: progress.clone(),
            claims: Arc::new(FileClaims::new()),
            step_executor: Arc::new(step_executor),
            prompt_builder: Arc::new(SectionPromptBuilder),
            learning: None,
            semantic: None,
            bus: ObservabilityBus::disabled(),
            instructions: Arc::new(HashMap::new()),
        };
        let agent_executor = AgentExecutor::new(
            services,
            "p1",
            &config.task_description,
            config.agent_timeout,
            false,
        );
        let dag = Arc::new(PipelineDag::from_catalog(builtin_mappings()).unwrap());
        let sherlock = Arc::new(SherlockGate::new(
            coordinator.clone(),
            None,
            SherlockConfig {
                enable_learning: false,
                ..Default::default()
            },
        ));
        let validator = IntegratedValidator::new(config.agent_timeout, config.emergency_bypass);
        let checkpoints = CheckpointManager::new(coordinator.clone(), config.max_checkpoints);
        let executor = PhaseExecutor::new(
            dag,
            agent_executor,
            progress,
            sherlock,
            validator,
            checkpoints,
            ObservabilityBus::disabled(),
            config,
        );
        (executor, coordinator)
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new("test task").with_agent_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_happy_path_understanding_phase() {
        let (mut executor, _) = build_executor(
            ScriptedExecutor {
                quality: 0.9,
                fail_for: vec![],
            },
            config(),
        );
        let mut state = ExecutionState::new("p1");

        let result = executor.execute_phase(Phase::Understanding, &mut state).await;
        assert!(result.success);
        assert_eq!(result.agent_results.len(), 6);
        assert!(result.agent_results.iter().all(|r| r.success));
        assert_eq!(result.total_xp, 275);
        assert!(result.checkpoint_created);
        let review = result.validation.unwrap();
        assert_eq!(review.verdict, Verdict::Innocent);
        assert!(!result.escalated);
    }

    #[tokio::test]
    async fn test_critical_failure_terminates_phase_early() {
        let (mut executor, _) = build_executor(
            ScriptedExecutor {
                quality: 0.9,
                fail_for: vec![AgentId::CodeGenerator],
            },
            config(),
        );
        let mut state = ExecutionState::new("p1");

        let result = executor.execute_phase(Phase::Implementation, &mut state).await;
        assert!(!result.success);
        // code-generator runs alone in the first batch; nothing follows it.
        let last = result.agent_results.last().unwrap();
        assert_eq!(last.agent, AgentId::CodeGenerator);
        assert!(!last.success);
        assert_eq!(result.agent_results.len(), 1);
        assert!(result.validation.is_none());
    }

    #[tokio::test]
    async fn test_noncritical_failure_reaches_guilty_and_escalates() {
        // pattern-researcher is not critical: the phase runs to completion,
        // the gate finds the failure, retries re-run it, the deterministic
        // executor fails again and the verdict escalates.
        let (mut executor, _) = build_executor(
            ScriptedExecutor {
                quality: 0.9,
                fail_for: vec![AgentId::PatternResearcher],
            },
            config(),
        );
        let mut state = ExecutionState::new("p1");

        let result = executor.execute_phase(Phase::Exploration, &mut state).await;
        assert!(!result.success);
        let review = result.validation.unwrap();
        assert_eq!(review.verdict, Verdict::Guilty);
        assert!(review.remediations.iter().any(|r| r.contains("pattern-researcher")));
        assert!(result.escalated);
    }

    #[tokio::test]
    async fn test_zero_agent_phase_is_clean_success() {
        let (mut executor, _) = build_executor(
            ScriptedExecutor {
                quality: 0.9,
                fail_for: vec![],
            },
            config(),
        );
        // Swap in an empty graph so the phase has no roster.
        executor.dag = Arc::new(crate::dag::DagBuilder::new(vec![]).build().unwrap());
        let mut state = ExecutionState::new("p1");

        let result = executor.execute_phase(Phase::Delivery, &mut state).await;
        assert!(result.success);
        assert!(result.agent_results.is_empty());
        assert_eq!(result.total_xp, 0);
    }

    #[tokio::test]
    async fn test_sequential_mode_runs_every_agent_alone() {
        let (mut executor, _) = build_executor(
            ScriptedExecutor {
                quality: 0.9,
                fail_for: vec![],
            },
            config().with_parallel_execution(false),
        );
        let mut state = ExecutionState::new("p1");

        let result = executor.execute_phase(Phase::Understanding, &mut state).await;
        assert!(result.success);
        assert_eq!(result.agent_results.len(), 6);
        // Order equals the resolved execution order.
        let order: Vec<AgentId> = result.agent_results.iter().map(|r| r.agent).collect();
        let expected = executor.dag.phase_execution_order(Phase::Understanding);
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_xp_sums_only_successful_agents() {
        let (mut executor, _) = build_executor(
            ScriptedExecutor {
                quality: 0.9,
                fail_for: vec![AgentId::DependencyAuditor],
            },
            config(),
        );
        let mut state = ExecutionState::new("p1");

        let result = executor.execute_phase(Phase::Exploration, &mut state).await;
        let expected: u64 = result
            .agent_results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.xp_earned as u64)
            .sum();
        assert_eq!(result.total_xp, expected);
    }
}
