//! Top-level pipeline orchestration.
//!
//! `PipelineOrchestrator::execute` owns the run: it generates the pipeline
//! id, validates the roster, walks the configured phases strictly in
//! order, applies rollback when a phase fails past its retries, feeds the
//! run-level learning signal, and returns the aggregate result. It never
//! panics into the caller; the only fatal preconditions are a missing step
//! executor and an invalid catalog.
//!
//! ## Persistence ownership
//!
//! | Layer                | What it persists                                |
//! |----------------------|--------------------------------------------------|
//! | memory coordinator   | agent hand-offs, forensic records, XP, state    |
//! | checkpoint manager   | phase-boundary snapshots (via the coordinator)  |
//! | progress store       | in-process lifecycle only, never durable        |

use crate::catalog::{AgentMapping, builtin_mappings};
use crate::config::PipelineConfig;
use crate::dag::PipelineDag;
use crate::errors::PipelineError;
use crate::executor::{
    AgentExecutor, AgentServices, PhaseExecutionResult, PhaseExecutor, PromptBuilder,
    SectionPromptBuilder, StepExecutor,
};
use crate::gates::IntegratedValidator;
use crate::learning::{LearningEngine, SemanticContextService};
use crate::memory::{InMemoryBackend, MemoryBackend, MemoryCoordinator};
use crate::observability::{EventStatus, ObservabilityBus, ObservabilityEvent};
use crate::phase::Phase;
use crate::progress::{FileClaims, ProgressStore};
use crate::sherlock::{SherlockConfig, SherlockGate};
use crate::state::ExecutionState;
use crate::checkpoint::CheckpointManager;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecutionResult {
    pub success: bool,
    pub phase_results: Vec<PhaseExecutionResult>,
    pub total_xp: u64,
    #[serde(with = "crate::config::duration_millis")]
    pub execution_time: Duration,
    pub completed_phases: Vec<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    pub rollback_applied: bool,
}

impl PipelineExecutionResult {
    /// Remediations aggregated from every gated phase, for the failure
    /// report.
    pub fn remediations(&self) -> Vec<String> {
        self.phase_results
            .iter()
            .filter_map(|r| r.validation.as_ref())
            .flat_map(|v| v.remediations.iter().cloned())
            .collect()
    }
}

/// Pre-run roster validation. Warnings never block the run.
pub trait PipelineValidator: Send + Sync {
    fn validate(&self, mappings: &[AgentMapping]) -> Vec<String>;
}

/// Default validator: structural sanity warnings over the flat roster.
pub struct RosterValidator;

impl PipelineValidator for RosterValidator {
    fn validate(&self, mappings: &[AgentMapping]) -> Vec<String> {
        let mut warnings = Vec::new();

        let written: HashSet<&str> = mappings
            .iter()
            .flat_map(|m| m.memory_writes.iter().map(String::as_str))
            .collect();
        for mapping in mappings {
            for read in &mapping.memory_reads {
                if !written.contains(read.as_str()) {
                    warnings.push(format!(
                        "{} reads '{}' which no agent writes",
                        mapping.id, read
                    ));
                }
            }
            if mapping.description.is_empty() {
                warnings.push(format!("{} has no description", mapping.id));
            }
        }

        for phase in Phase::ALL {
            let mut seen = HashSet::new();
            for mapping in mappings.iter().filter(|m| m.phase == phase) {
                if !seen.insert(mapping.priority) {
                    warnings.push(format!(
                        "phase {} has duplicate priority {}",
                        phase, mapping.priority
                    ));
                }
            }
        }

        warnings
    }
}

/// Builder for a configured orchestrator.
pub struct OrchestratorBuilder {
    step_executor: Option<Arc<dyn StepExecutor>>,
    prompt_builder: Arc<dyn PromptBuilder>,
    backend: Arc<dyn MemoryBackend>,
    learning: Option<Arc<dyn LearningEngine>>,
    semantic: Option<Arc<dyn SemanticContextService>>,
    validator: Arc<dyn PipelineValidator>,
    bus: ObservabilityBus,
    mappings: Vec<AgentMapping>,
    instructions: HashMap<crate::agent::AgentId, String>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            step_executor: None,
            prompt_builder: Arc::new(SectionPromptBuilder),
            backend: Arc::new(InMemoryBackend::new()),
            learning: None,
            semantic: None,
            validator: Arc::new(RosterValidator),
            bus: ObservabilityBus::disabled(),
            mappings: builtin_mappings(),
            instructions: HashMap::new(),
        }
    }
}

impl OrchestratorBuilder {
    pub fn step_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.step_executor = Some(executor);
        self
    }

    pub fn prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn memory_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn learning(mut self, learning: Arc<dyn LearningEngine>) -> Self {
        self.learning = Some(learning);
        self
    }

    pub fn semantic(mut self, semantic: Arc<dyn SemanticContextService>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn PipelineValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn observability(mut self, bus: ObservabilityBus) -> Self {
        self.bus = bus;
        self
    }

    /// Replace the canonical catalog with a loaded one (mappings plus
    /// instruction bodies).
    pub fn catalog(
        mut self,
        mappings: Vec<AgentMapping>,
        instructions: HashMap<crate::agent::AgentId, String>,
    ) -> Self {
        self.mappings = mappings;
        self.instructions = instructions;
        self
    }

    pub fn build(self) -> PipelineOrchestrator {
        PipelineOrchestrator {
            step_executor: self.step_executor,
            prompt_builder: self.prompt_builder,
            backend: self.backend,
            learning: self.learning,
            semantic: self.semantic,
            validator: self.validator,
            bus: self.bus,
            mappings: self.mappings,
            instructions: Arc::new(self.instructions),
        }
    }
}

/// The top-level pipeline runner.
pub struct PipelineOrchestrator {
    step_executor: Option<Arc<dyn StepExecutor>>,
    prompt_builder: Arc<dyn PromptBuilder>,
    backend: Arc<dyn MemoryBackend>,
    learning: Option<Arc<dyn LearningEngine>>,
    semantic: Option<Arc<dyn SemanticContextService>>,
    validator: Arc<dyn PipelineValidator>,
    bus: ObservabilityBus,
    mappings: Vec<AgentMapping>,
    instructions: Arc<HashMap<crate::agent::AgentId, String>>,
}

impl PipelineOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Run the pipeline. Startup preconditions (step executor, catalog)
    /// are the only error path; everything after returns a result whose
    /// `success` reflects the outcome.
    pub async fn execute(
        &self,
        config: PipelineConfig,
    ) -> Result<PipelineExecutionResult, PipelineError> {
        let Some(step_executor) = self.step_executor.clone() else {
            return Err(PipelineError::MissingStepExecutor);
        };

        let start = Instant::now();
        let pipeline_id = format!("coding-{}", Uuid::new_v4().simple());
        let dag = Arc::new(PipelineDag::from_catalog(self.mappings.clone())?);

        for warning in self.validator.validate(dag.mappings()) {
            warn!(pipeline = %pipeline_id, %warning, "roster validation warning");
        }

        let total_agents: usize = config
            .phases
            .iter()
            .map(|p| dag.agents_by_phase(*p).len())
            .sum();

        self.bus.emit(
            ObservabilityEvent::new("orchestrator", "pipeline_started", EventStatus::Running)
                .with_metadata(json!({
                    "pipeline_id": pipeline_id,
                    "phases": config.phases.iter().map(|p| p.key()).collect::<Vec<_>>(),
                    "total_agents": total_agents,
                })),
        );
        info!(pipeline = %pipeline_id, phases = config.phases.len(), total_agents, "pipeline started");

        let coordinator = Arc::new(MemoryCoordinator::new(self.backend.clone()));
        let progress = Arc::new(ProgressStore::new());
        let claims = Arc::new(FileClaims::new());

        if let Err(err) = coordinator
            .store_pipeline_state(
                &pipeline_id,
                json!({
                    "status": "running",
                    "start_time": Utc::now(),
                    "phases": config.phases.iter().map(|p| p.key()).collect::<Vec<_>>(),
                    "current_phase": 0,
                }),
            )
            .await
        {
            warn!(error = %err, "failed to persist initial pipeline state");
        }
        if let Err(err) = coordinator
            .store_context(
                &pipeline_id,
                "task",
                json!({ "description": config.task_description }),
            )
            .await
        {
            warn!(error = %err, "failed to persist task context");
        }
        if let Err(err) = coordinator
            .store_dag_summary(
                &pipeline_id,
                json!({
                    "agents": dag.len(),
                    "critical": dag.critical_agents().iter().map(|a| a.key()).collect::<Vec<_>>(),
                    "topological_order": dag
                        .topological_order()
                        .iter()
                        .map(|a| a.key())
                        .collect::<Vec<_>>(),
                }),
            )
            .await
        {
            warn!(error = %err, "failed to persist DAG summary");
        }

        let services = AgentServices {
            coordinator: coordinator.clone(),
            progress: progress.clone(),
            claims,
            step_executor,
            prompt_builder: self.prompt_builder.clone(),
            learning: self.learning.clone(),
            semantic: self.semantic.clone(),
            bus: self.bus.clone(),
            instructions: self.instructions.clone(),
        };
        let agent_executor = AgentExecutor::new(
            services,
            &pipeline_id,
            &config.task_description,
            config.agent_timeout,
            config.enable_learning,
        );
        let sherlock = Arc::new(SherlockGate::new(
            coordinator.clone(),
            self.learning.clone(),
            SherlockConfig {
                default_tier: config.default_tier,
                pattern_threshold: config.pattern_threshold,
                enable_learning: config.enable_learning,
                ..Default::default()
            },
        ));
        let validator = IntegratedValidator::new(config.agent_timeout, config.emergency_bypass);
        let checkpoints = CheckpointManager::new(coordinator.clone(), config.max_checkpoints);
        let mut phase_executor = PhaseExecutor::new(
            dag.clone(),
            agent_executor,
            progress,
            sherlock,
            validator,
            checkpoints,
            self.bus.clone(),
            config.clone(),
        );

        let mut state = ExecutionState::new(&pipeline_id);
        let mut phase_results: Vec<PhaseExecutionResult> = Vec::new();
        let mut completed_phases = Vec::new();
        let mut failed_phase = None;
        let mut rollback_applied = false;

        for (index, phase) in config.phases.iter().copied().enumerate() {
            state.set_current_phase_index(index);
            if let Err(err) = coordinator
                .store_pipeline_state(
                    &pipeline_id,
                    json!({
                        "status": "running",
                        "current_phase": index,
                        "phase": phase.key(),
                    }),
                )
                .await
            {
                warn!(error = %err, "failed to persist phase transition");
            }

            let result = phase_executor.execute_phase(phase, &mut state).await;
            let phase_success = result.success;
            let phase_xp = result.total_xp;
            phase_results.push(result);

            if phase_success {
                state.add_xp(phase_xp);
                if let Err(err) = coordinator
                    .store_phase_xp(&pipeline_id, phase, phase_xp)
                    .await
                {
                    warn!(error = %err, "failed to persist phase XP");
                }
                completed_phases.push(phase);
            } else {
                failed_phase = Some(phase);
                if state.has_checkpoints() {
                    match phase_executor.rollback_to_last(&mut state).await {
                        Ok(applied) => rollback_applied = applied,
                        Err(err) => warn!(error = %err, "rollback failed"),
                    }
                }
                break;
            }
        }

        let success = failed_phase.is_none();
        let attempted: usize = phase_results.iter().map(|r| r.agent_results.len()).sum();
        let successful: usize = phase_results
            .iter()
            .flat_map(|r| &r.agent_results)
            .filter(|r| r.success)
            .count();
        let quality = if attempted == 0 {
            0.0
        } else {
            successful as f64 / attempted as f64
        };

        self.provide_pipeline_feedback(&pipeline_id, &config, success, quality)
            .await;

        if let Err(err) = coordinator
            .store_pipeline_state(
                &pipeline_id,
                json!({
                    "status": if success { "completed" } else { "failed" },
                    "completed_phases": completed_phases.iter().map(|p| p.key()).collect::<Vec<_>>(),
                    "failed_phase": failed_phase.map(|p| p.key()),
                    "rollback_applied": rollback_applied,
                }),
            )
            .await
        {
            warn!(error = %err, "failed to persist final pipeline state");
        }
        if let Err(err) = coordinator.store_xp_total(&pipeline_id, state.total_xp()).await {
            warn!(error = %err, "failed to persist XP total");
        }

        self.bus.emit(
            ObservabilityEvent::new(
                "orchestrator",
                "pipeline_completed",
                if success {
                    EventStatus::Success
                } else {
                    EventStatus::Error
                },
            )
            .with_duration_ms(start.elapsed().as_millis() as u64)
            .with_metadata(json!({
                "success": success,
                "total_xp": state.total_xp(),
                "completed_phases": completed_phases.iter().map(|p| p.key()).collect::<Vec<_>>(),
                "failed_phase": failed_phase.map(|p| p.key()),
                "rollback_applied": rollback_applied,
            })),
        );
        info!(
            pipeline = %pipeline_id,
            success,
            total_xp = state.total_xp(),
            completed = completed_phases.len(),
            "pipeline finished"
        );

        Ok(PipelineExecutionResult {
            success,
            phase_results,
            total_xp: state.total_xp(),
            execution_time: start.elapsed(),
            completed_phases,
            failed_phase,
            rollback_applied,
        })
    }

    async fn provide_pipeline_feedback(
        &self,
        pipeline_id: &str,
        config: &PipelineConfig,
        success: bool,
        quality: f64,
    ) {
        if !config.enable_learning {
            return;
        }
        let Some(learning) = self.learning.as_ref() else {
            return;
        };
        let trajectory_id = format!("trajectory_pipeline_{pipeline_id}");
        let context = json!({
            "task": config.task_description,
            "phases": config.phases.iter().map(|p| p.key()).collect::<Vec<_>>(),
        });
        if let Err(err) = learning
            .create_trajectory_with_id(&trajectory_id, "pipeline", &[], &context)
            .await
        {
            warn!(error = %err, "pipeline trajectory creation failed");
        }
        let feedback_quality = if success { quality } else { 0.0 };
        if let Err(err) = learning
            .provide_feedback(&trajectory_id, feedback_quality, Default::default())
            .await
        {
            warn!(error = %err, "pipeline feedback failed");
        }
    }
}
