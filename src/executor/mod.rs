//! Agent and phase execution.
//!
//! The pluggable seams live here: [`StepExecutor`] is the required agent
//! runner (there is deliberately no default — the pipeline refuses to run
//! with fabricated output), [`PromptBuilder`] composes the per-step prompt.
//! [`AgentExecutor`] drives one agent's lifecycle; [`PhaseExecutor`] orders,
//! batches and gates a whole phase.

mod agent;
mod command;
mod phase;
mod summary;

pub use agent::{AgentExecutor, AgentServices};
pub use command::CommandStepExecutor;
pub use phase::{PhaseExecutionResult, PhaseExecutor};
pub use summary::{OutputSummary, extract_output_summary};

use crate::agent::AgentId;
use crate::catalog::AgentMapping;
use crate::learning::{LearnedPattern, ReflexionContext, SemanticContext};
use crate::memory::PreviousOutput;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one step execution.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Raw agent output text.
    pub output: String,
    /// Self-assessed quality in [0, 1].
    pub quality: f64,
    /// Wall-clock duration reported by the executor.
    pub duration: Duration,
}

/// The pluggable agent runner. Implementations must honor the timeout and
/// be safe to invoke concurrently from different agent runs.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        agent: AgentId,
        prompt: &str,
        timeout: Duration,
    ) -> Result<StepOutcome>;
}

/// Everything a prompt is composed from.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub step: &'a AgentMapping,
    pub step_index: usize,
    pub pipeline_id: &'a str,
    pub task_description: &'a str,
    pub instructions: &'a str,
    pub previous_output: Option<&'a PreviousOutput>,
    pub semantic_context: Option<&'a SemanticContext>,
    pub reflexion_context: Option<&'a ReflexionContext>,
    pub pattern_context: &'a [LearnedPattern],
    pub situational_awareness: Option<&'a str>,
}

/// Composes the prompt handed to the step executor.
pub trait PromptBuilder: Send + Sync {
    fn build_prompt(&self, context: &PromptContext<'_>) -> String;
}

/// Default builder: one markdown section per available context source.
#[derive(Debug, Default)]
pub struct SectionPromptBuilder;

impl PromptBuilder for SectionPromptBuilder {
    fn build_prompt(&self, ctx: &PromptContext<'_>) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "# Agent: {} (step {} of pipeline {})\n\n",
            ctx.step.id, ctx.step_index, ctx.pipeline_id
        ));
        prompt.push_str(&format!(
            "Phase: {} | Algorithm: {} (fallback: {})\n\n",
            ctx.step.phase.display_name(),
            ctx.step.algorithm,
            ctx.step.fallback_algorithm()
        ));
        prompt.push_str("## Task\n\n");
        prompt.push_str(ctx.task_description);
        prompt.push_str("\n\n## Instructions\n\n");
        prompt.push_str(ctx.instructions);
        prompt.push('\n');

        if let Some(previous) = ctx.previous_output {
            prompt.push_str("\n## Previous output\n\n");
            if let Some(agent_key) = &previous.agent_key {
                prompt.push_str(&format!("From {agent_key}:\n"));
            }
            prompt.push_str(&previous.output.to_string());
            prompt.push('\n');
        }

        if let Some(semantic) = ctx.semantic_context {
            if !semantic.code_context.is_empty() {
                prompt.push_str("\n## Relevant code\n");
                for fragment in &semantic.code_context {
                    prompt.push_str(&format!("\n### {}\n{}\n", fragment.file_path, fragment.content));
                }
            }
        }

        if let Some(reflexion) = ctx.reflexion_context {
            prompt.push_str(&format!(
                "\n## Prior attempts (success rate {:.0}%)\n",
                reflexion.success_rate * 100.0
            ));
            for attempt in &reflexion.attempts {
                prompt.push_str(&format!(
                    "- {} (quality {})\n",
                    attempt.id,
                    attempt
                        .quality
                        .map(|q| format!("{q:.2}"))
                        .unwrap_or_else(|| "unknown".to_string())
                ));
            }
        }

        if !ctx.pattern_context.is_empty() {
            prompt.push_str("\n## Learned patterns\n");
            for pattern in ctx.pattern_context {
                prompt.push_str(&format!(
                    "- {} ({:.0}% success): {}\n",
                    pattern.name,
                    pattern.success_rate * 100.0,
                    pattern.guidance
                ));
            }
        }

        if let Some(awareness) = ctx.situational_awareness {
            prompt.push_str("\n## Situational awareness\n\n");
            prompt.push_str(awareness);
            prompt.push('\n');
        }

        prompt
    }
}
