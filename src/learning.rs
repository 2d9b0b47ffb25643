//! Contracts for the optional learning and semantic-context collaborators.
//!
//! Both services are injected and optional; every failure from them is
//! logged and swallowed — learning never decides whether the pipeline
//! advances. The selection helpers for reflexion and pattern context live
//! here so executors share one set of rules.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Quality level below which a trajectory counts as a poor attempt.
pub const REFLEXION_QUALITY_CUTOFF: f64 = 0.7;

/// Minimum success rate for a pattern to be offered as context.
pub const PATTERN_SUCCESS_FLOOR: f64 = 0.5;

/// One recorded trajectory from the learning subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub id: String,
    pub quality: Option<f64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A learned pattern offered as prompt context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub name: String,
    pub task_type: String,
    pub success_rate: f64,
    pub uses: u32,
    pub guidance: String,
}

/// Options accompanying quality feedback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackOptions {
    pub skip_auto_save: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rlm_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l_score: Option<f64>,
}

/// The SonaEngine / ReasoningBank contract.
#[async_trait]
pub trait LearningEngine: Send + Sync {
    /// Create a trajectory with a caller-chosen id.
    async fn create_trajectory_with_id(
        &self,
        id: &str,
        route: &str,
        patterns: &[String],
        context: &Value,
    ) -> Result<()>;

    /// Deliver quality feedback for a trajectory.
    async fn provide_feedback(
        &self,
        id: &str,
        quality: f64,
        options: FeedbackOptions,
    ) -> Result<()>;

    /// Most recent trajectories carrying a tag, newest first.
    async fn recent_trajectories(&self, tag: &str, limit: usize) -> Result<Vec<TrajectoryRecord>>;

    /// Patterns recorded for a task type.
    async fn patterns_for_task_type(&self, task_type: &str) -> Result<Vec<LearnedPattern>>;
}

/// Reflexion context: prior poor attempts plus the historical success rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexionContext {
    pub attempts: Vec<TrajectoryRecord>,
    pub success_rate: f64,
}

/// Select reflexion context from an agent's trajectory history: up to five
/// most recent attempts with quality below the cutoff or tagged `failed`,
/// and the overall success rate (quality ≥ cutoff over total).
pub fn select_reflexion_context(trajectories: &[TrajectoryRecord]) -> Option<ReflexionContext> {
    if trajectories.is_empty() {
        return None;
    }
    let successes = trajectories
        .iter()
        .filter(|t| t.quality.is_some_and(|q| q >= REFLEXION_QUALITY_CUTOFF))
        .count();
    let success_rate = successes as f64 / trajectories.len() as f64;

    let mut attempts: Vec<TrajectoryRecord> = trajectories
        .iter()
        .filter(|t| {
            t.quality.is_none_or(|q| q < REFLEXION_QUALITY_CUTOFF)
                || t.tags.iter().any(|tag| tag == "failed")
        })
        .cloned()
        .collect();
    attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    attempts.truncate(5);

    Some(ReflexionContext {
        attempts,
        success_rate,
    })
}

/// Select pattern context: patterns at or above the success floor, best
/// first, top five.
pub fn select_pattern_context(patterns: Vec<LearnedPattern>) -> Vec<LearnedPattern> {
    let mut kept: Vec<LearnedPattern> = patterns
        .into_iter()
        .filter(|p| p.success_rate >= PATTERN_SUCCESS_FLOOR)
        .collect();
    kept.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    kept.truncate(5);
    kept
}

/// One code fragment of semantic context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFragment {
    pub file_path: String,
    pub content: String,
}

/// Result of a semantic-context search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticContext {
    pub code_context: Vec<CodeFragment>,
    pub total_results: usize,
    pub search_query: String,
}

/// Request for semantic context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticContextRequest {
    pub task_description: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<String>,
    pub max_results: usize,
}

/// The LEANN embedding/semantic-search contract.
#[async_trait]
pub trait SemanticContextService: Send + Sync {
    /// Up to `max_results` relevant code fragments for a step.
    async fn build_semantic_context(
        &self,
        request: SemanticContextRequest,
    ) -> Result<SemanticContext>;

    /// Index files produced by an agent. Best-effort.
    async fn index_files(&self, files: &[String], metadata: Value) -> Result<()>;
}
