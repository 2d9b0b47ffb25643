//! Typed error hierarchy for the pipeline orchestrator.
//!
//! Four enums cover the four failure surfaces:
//! - `CatalogError` — agent catalog loading and validation (fatal at startup)
//! - `DagError` — graph construction failures (fatal at startup)
//! - `CheckpointError` — snapshot/rollback failures (abort the operation only)
//! - `MemoryError` — coordinator store/retrieve failures (propagated with the
//!   failing domain, no automatic retry)
//!
//! L-Score gate results and Sherlock verdicts are never errors; they are
//! ordinary outputs carried in results.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading and validating the agent catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Agent catalog directory not found at {path}")]
    MissingDirectory { path: PathBuf },

    #[error("Failed to read agent file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent file {file} is missing required header field '{field}'")]
    MissingHeaderField { file: String, field: String },

    #[error(transparent)]
    Dag(#[from] DagError),
}

/// Errors from constructing the pipeline DAG.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("Duplicate agent in catalog: {agent}")]
    DuplicateAgent { agent: String },

    #[error("Agent '{agent}' depends on unknown agent '{dependency}'")]
    UnknownDependency { agent: String, dependency: String },

    #[error("Cycle detected in agent dependencies. Involved agents: {agents:?}")]
    CycleDetected { agents: Vec<String> },

    #[error("Incomplete catalog: topological order covers {actual} agents, expected {expected}")]
    IncompleteCatalog { expected: usize, actual: usize },
}

/// Errors from checkpoint creation and rollback.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint creation failed for phase {phase}: {reason}")]
    CreateFailed { phase: String, reason: String },

    #[error("Rollback failed: {reason}")]
    RollbackFailed { reason: String },

    #[error("Invalid checkpoint for phase {phase}: {reason}")]
    InvalidCheckpoint { phase: String, reason: String },
}

/// Errors from the memory coordinator. Each variant names the failing
/// domain so callers can report the exact operation.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Store failed in domain '{domain}': {reason}")]
    StoreFailed { domain: String, reason: String },

    #[error("Retrieve failed in domain '{domain}': {reason}")]
    RetrieveFailed { domain: String, reason: String },
}

/// Fatal pipeline-level configuration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "No step executor configured: refusing to run the pipeline with fabricated agent output"
    )]
    MissingStepExecutor,

    #[error("Invalid phase range: start phase '{start}' comes after end phase '{end}'")]
    InvalidPhaseRange { start: String, end: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Dag(#[from] DagError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_error_cycle_names_participants() {
        let err = DagError::CycleDetected {
            agents: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Cycle"));
        assert!(msg.contains("\"a\""));
    }

    #[test]
    fn memory_error_carries_domain() {
        let err = MemoryError::StoreFailed {
            domain: "coding/understanding/requirements".into(),
            reason: "backend unavailable".into(),
        };
        assert!(err.to_string().contains("coding/understanding/requirements"));
    }

    #[test]
    fn pipeline_error_missing_executor_is_descriptive() {
        let err = PipelineError::MissingStepExecutor;
        assert!(err.to_string().contains("step executor"));
        assert!(err.to_string().contains("refusing"));
    }

    #[test]
    fn catalog_error_converts_from_dag_error() {
        let inner = DagError::DuplicateAgent {
            agent: "code-generator".into(),
        };
        let err: CatalogError = inner.into();
        assert!(matches!(err, CatalogError::Dag(DagError::DuplicateAgent { .. })));
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CatalogError::MissingDirectory {
            path: PathBuf::from("/agents"),
        });
        assert_std_error(&CheckpointError::RollbackFailed {
            reason: "no checkpoint".into(),
        });
        assert_std_error(&MemoryError::RetrieveFailed {
            domain: "coding/pipeline/state".into(),
            reason: "parse".into(),
        });
        assert_std_error(&PipelineError::MissingStepExecutor);
    }
}
