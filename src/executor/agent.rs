//! One-agent execution lifecycle.
//!
//! The executor runs an agent exactly once: context gathering, prompt
//! composition, the timed step execution, output storage, learning
//! feedback, progress bookkeeping and claim release. Every execution error
//! is converted into a `success = false` result here; halting decisions
//! belong to the phase executor.

use crate::agent::AgentId;
use crate::catalog::AgentMapping;
use crate::executor::{
    OutputSummary, PromptBuilder, PromptContext, StepExecutor, StepOutcome,
    extract_output_summary,
};
use crate::learning::{
    LearnedPattern, LearningEngine, ReflexionContext, SemanticContext, SemanticContextRequest,
    SemanticContextService, select_pattern_context, select_reflexion_context,
};
use crate::memory::MemoryCoordinator;
use crate::observability::{EventStatus, ObservabilityBus, ObservabilityEvent};
use crate::progress::{AgentStatus, FileClaims, ProgressStore};
use crate::state::AgentExecutionResult;
use anyhow::{Context, Result, bail};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared service handles an agent run needs.
#[derive(Clone)]
pub struct AgentServices {
    pub coordinator: Arc<MemoryCoordinator>,
    pub progress: Arc<ProgressStore>,
    pub claims: Arc<FileClaims>,
    pub step_executor: Arc<dyn StepExecutor>,
    pub prompt_builder: Arc<dyn PromptBuilder>,
    pub learning: Option<Arc<dyn LearningEngine>>,
    pub semantic: Option<Arc<dyn SemanticContextService>>,
    pub bus: ObservabilityBus,
    pub instructions: Arc<HashMap<AgentId, String>>,
}

/// Executes exactly one agent per call.
pub struct AgentExecutor {
    services: AgentServices,
    pipeline_id: String,
    task_description: String,
    agent_timeout: Duration,
    enable_learning: bool,
}

impl AgentExecutor {
    pub fn new(
        services: AgentServices,
        pipeline_id: &str,
        task_description: &str,
        agent_timeout: Duration,
        enable_learning: bool,
    ) -> Self {
        Self {
            services,
            pipeline_id: pipeline_id.to_string(),
            task_description: task_description.to_string(),
            agent_timeout,
            enable_learning,
        }
    }

    /// Run one agent. Never returns an error: failures become
    /// `success = false` results.
    pub async fn execute_agent(
        &self,
        step: &AgentMapping,
        step_index: usize,
    ) -> AgentExecutionResult {
        let start = Instant::now();
        self.services.progress.mark_active(step.id).await;

        match self.run_step(step, step_index, start).await {
            Ok(result) => result,
            Err(err) => self.record_failure(step, &err, start).await,
        }
    }

    async fn run_step(
        &self,
        step: &AgentMapping,
        step_index: usize,
        start: Instant,
    ) -> Result<AgentExecutionResult> {
        let agent = step.id;

        // Hand-off context from prior steps, newest first per domain.
        let context_entries = self
            .services
            .coordinator
            .gather_context(&step.memory_reads, &self.pipeline_id, 3)
            .await
            .context("Failed to gather memory context")?;
        let previous_output = self
            .services
            .coordinator
            .retrieve_previous_output(step, &self.pipeline_id)
            .await
            .context("Failed to retrieve previous output")?;

        let semantic_context = self.fetch_semantic_context(step, &previous_output).await;
        let reflexion_context = self.fetch_reflexion_context(agent).await;
        let pattern_context = self.fetch_pattern_context(step).await;
        let situational_awareness = self.build_situational_awareness(step).await;

        let instructions = self
            .services
            .instructions
            .get(&agent)
            .map(|s| s.as_str())
            .unwrap_or(&step.description);

        let prompt = self.services.prompt_builder.build_prompt(&PromptContext {
            step,
            step_index,
            pipeline_id: &self.pipeline_id,
            task_description: &self.task_description,
            instructions,
            previous_output: previous_output.as_ref(),
            semantic_context: semantic_context.as_ref(),
            reflexion_context: reflexion_context.as_ref(),
            pattern_context: &pattern_context,
            situational_awareness: situational_awareness.as_deref(),
        });

        let outcome = self.run_with_timeout(agent, &prompt).await?;

        let receipt = self
            .services
            .coordinator
            .store_step_output(step, step_index, &self.pipeline_id, json!(outcome.output))
            .await
            .context("Failed to store step output")?;

        let summary = extract_output_summary(&outcome.output);
        self.claim_touched_files(agent, &summary).await;
        self.provide_success_feedback(step, &outcome, context_entries.len())
            .await;

        self.services.bus.emit(
            ObservabilityEvent::new("agent-executor", "agent_completed", EventStatus::Success)
                .with_duration_ms(start.elapsed().as_millis() as u64)
                .with_metadata(json!({
                    "agent": agent.key(),
                    "phase": step.phase.key(),
                    "quality": outcome.quality,
                })),
        );

        self.services
            .progress
            .mark_completed(agent, summary.clone())
            .await;
        self.services.claims.release_all(agent).await;
        self.index_produced_files(&summary).await;

        Ok(AgentExecutionResult {
            agent,
            success: true,
            output: json!(outcome.output),
            quality: outcome.quality,
            xp_earned: step.xp_reward,
            memory_writes: vec![receipt.domain],
            execution_time: start.elapsed(),
            error: None,
        })
    }

    /// Race the step execution against the per-agent timer. This is the
    /// only place a run is forcibly abandoned; memory side effects up to
    /// that point remain.
    async fn run_with_timeout(&self, agent: AgentId, prompt: &str) -> Result<StepOutcome> {
        match tokio::time::timeout(
            self.agent_timeout,
            self.services
                .step_executor
                .execute(agent, prompt, self.agent_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => bail!(
                "Agent '{}' timed out after {}s",
                agent,
                self.agent_timeout.as_secs()
            ),
        }
    }

    async fn fetch_semantic_context(
        &self,
        step: &AgentMapping,
        previous_output: &Option<crate::memory::PreviousOutput>,
    ) -> Option<SemanticContext> {
        let service = self.services.semantic.as_ref()?;
        let request = SemanticContextRequest {
            task_description: self.task_description.clone(),
            phase: step.phase.key().to_string(),
            previous_output: previous_output.as_ref().map(|p| p.output.to_string()),
            max_results: 5,
        };
        match service.build_semantic_context(request).await {
            Ok(context) => Some(context),
            Err(err) => {
                warn!(agent = %step.id, error = %err, "semantic context unavailable");
                None
            }
        }
    }

    async fn fetch_reflexion_context(&self, agent: AgentId) -> Option<ReflexionContext> {
        if !self.enable_learning {
            return None;
        }
        let learning = self.services.learning.as_ref()?;
        match learning
            .recent_trajectories(&format!("agent:{}", agent.key()), 20)
            .await
        {
            Ok(trajectories) => select_reflexion_context(&trajectories),
            Err(err) => {
                warn!(agent = %agent, error = %err, "reflexion context unavailable");
                None
            }
        }
    }

    async fn fetch_pattern_context(&self, step: &AgentMapping) -> Vec<LearnedPattern> {
        if !self.enable_learning {
            return Vec::new();
        }
        let Some(learning) = self.services.learning.as_ref() else {
            return Vec::new();
        };
        match learning.patterns_for_task_type(step.phase.task_type()).await {
            Ok(patterns) => select_pattern_context(patterns),
            Err(err) => {
                warn!(agent = %step.id, error = %err, "pattern context unavailable");
                Vec::new()
            }
        }
    }

    /// Peer activity and claim conflicts, or `None` when there is nothing
    /// worth telling the agent.
    async fn build_situational_awareness(&self, step: &AgentMapping) -> Option<String> {
        let active = self
            .services
            .progress
            .peers_with_status(step.phase, step.id, AgentStatus::Active)
            .await;
        let completed = self
            .services
            .progress
            .peers_with_status(step.phase, step.id, AgentStatus::Completed)
            .await;
        let conflicts = self.services.claims.conflicts_for(step.id).await;

        if active.is_empty() && completed.is_empty() && conflicts.is_empty() {
            return None;
        }

        let mut text = String::new();
        if !active.is_empty() {
            text.push_str(&format!(
                "Currently active in this phase: {}.\n",
                active.iter().map(|a| a.key()).collect::<Vec<_>>().join(", ")
            ));
        }
        if !completed.is_empty() {
            text.push_str(&format!(
                "Already completed: {}.\n",
                completed
                    .iter()
                    .map(|a| a.key())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        for claim in conflicts {
            text.push_str(&format!(
                "File {} is write-claimed by {}; coordinate before touching it.\n",
                claim.file_path.display(),
                claim.claimed_by
            ));
        }
        Some(text)
    }

    /// Advisory write claims on the files the step reported touching.
    async fn claim_touched_files(&self, agent: AgentId, summary: &OutputSummary) {
        for file in summary.files_created.iter().chain(&summary.files_modified) {
            if !self.services.claims.claim_for_write(agent, Path::new(file)).await {
                debug!(agent = %agent, file, "write claim contested");
            }
        }
    }

    async fn provide_success_feedback(
        &self,
        step: &AgentMapping,
        outcome: &StepOutcome,
        context_entries: usize,
    ) {
        if !self.enable_learning {
            return;
        }
        let Some(learning) = self.services.learning.as_ref() else {
            return;
        };
        let trajectory_id = self.trajectory_id(step.id);
        let context = json!({
            "phase": step.phase.key(),
            "algorithm": step.algorithm.key(),
            "duration_ms": outcome.duration.as_millis() as u64,
            "context_entries": context_entries,
        });
        if let Err(err) = learning
            .create_trajectory_with_id(&trajectory_id, step.algorithm.key(), &[], &context)
            .await
        {
            warn!(agent = %step.id, error = %err, "trajectory creation failed");
        }
        if let Err(err) = learning
            .provide_feedback(&trajectory_id, outcome.quality, Default::default())
            .await
        {
            warn!(agent = %step.id, error = %err, "quality feedback failed");
        }
    }

    async fn index_produced_files(&self, summary: &OutputSummary) {
        let Some(semantic) = self.services.semantic.as_ref() else {
            return;
        };
        let files: Vec<String> = summary
            .files_created
            .iter()
            .chain(&summary.files_modified)
            .cloned()
            .collect();
        if files.is_empty() {
            return;
        }
        if let Err(err) = semantic
            .index_files(&files, json!({ "pipeline": self.pipeline_id }))
            .await
        {
            warn!(error = %err, "semantic indexing failed");
        }
    }

    async fn record_failure(
        &self,
        step: &AgentMapping,
        err: &anyhow::Error,
        start: Instant,
    ) -> AgentExecutionResult {
        let agent = step.id;
        let message = format!("{err:#}");
        warn!(agent = %agent, error = %message, "agent execution failed");

        if self.enable_learning {
            if let Some(learning) = self.services.learning.as_ref() {
                let trajectory_id = self.trajectory_id(agent);
                let context = json!({
                    "phase": step.phase.key(),
                    "error": message,
                });
                if let Err(e) = learning
                    .create_trajectory_with_id(&trajectory_id, step.algorithm.key(), &[], &context)
                    .await
                {
                    warn!(agent = %agent, error = %e, "failure trajectory creation failed");
                }
                if let Err(e) = learning
                    .provide_feedback(&trajectory_id, 0.0, Default::default())
                    .await
                {
                    warn!(agent = %agent, error = %e, "failure feedback failed");
                }
            }
        }

        self.services.progress.mark_failed(agent, &message).await;
        self.services.claims.release_all(agent).await;
        self.services.bus.emit(
            ObservabilityEvent::new("agent-executor", "agent_failed", EventStatus::Error)
                .with_duration_ms(start.elapsed().as_millis() as u64)
                .with_metadata(json!({
                    "agent": agent.key(),
                    "phase": step.phase.key(),
                    "error": message,
                })),
        );

        AgentExecutionResult::failure(agent, &message, start.elapsed())
    }

    fn trajectory_id(&self, agent: AgentId) -> String {
        format!("trajectory_coding_{}_{}", self.pipeline_id, agent.key())
    }
}
