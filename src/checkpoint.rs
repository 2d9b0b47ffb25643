//! Phase-boundary checkpoints and rollback.
//!
//! A checkpoint is taken when a configured phase begins: the pipeline's
//! memory namespace, the set of completed agents, and the XP total at that
//! boundary. Rollback restores the most recent checkpoint and evicts every
//! execution result recorded after it. Creation order is tracked for FIFO
//! trimming.

use crate::errors::CheckpointError;
use crate::memory::MemoryCoordinator;
use crate::phase::Phase;
use crate::state::{Checkpoint, ExecutionState};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates, trims and rolls back checkpoints for one run.
pub struct CheckpointManager {
    coordinator: Arc<MemoryCoordinator>,
    /// Phases in checkpoint-creation order, oldest first.
    created_order: Vec<Phase>,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(coordinator: Arc<MemoryCoordinator>, max_checkpoints: usize) -> Self {
        Self {
            coordinator,
            created_order: Vec::new(),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    /// Snapshot the pipeline at a phase boundary.
    pub async fn create(
        &mut self,
        phase: Phase,
        state: &mut ExecutionState,
    ) -> Result<(), CheckpointError> {
        let pipeline_id = state.pipeline_id().to_string();
        let snapshot = self
            .coordinator
            .snapshot_pipeline(&pipeline_id)
            .await
            .map_err(|e| CheckpointError::CreateFailed {
                phase: phase.key().to_string(),
                reason: e.to_string(),
            })?;

        let checkpoint = Checkpoint {
            phase,
            timestamp: Utc::now(),
            memory_snapshot: snapshot,
            completed_agents: state.completed_agents(),
            total_xp: state.total_xp(),
        };

        self.coordinator
            .store_checkpoint_record(
                &pipeline_id,
                phase,
                json!({
                    "phase": phase.key(),
                    "completed_agents": checkpoint
                        .completed_agents
                        .iter()
                        .map(|a| a.key())
                        .collect::<Vec<_>>(),
                    "total_xp": checkpoint.total_xp,
                    "timestamp": checkpoint.timestamp,
                    "snapshot_entries": checkpoint.memory_snapshot.len(),
                }),
            )
            .await
            .map_err(|e| CheckpointError::CreateFailed {
                phase: phase.key().to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            phase = %phase,
            completed = checkpoint.completed_agents.len(),
            xp = checkpoint.total_xp,
            "checkpoint created"
        );

        self.created_order.retain(|p| *p != phase);
        self.created_order.push(phase);
        state.put_checkpoint(checkpoint);
        self.trim(self.max_checkpoints, state);
        Ok(())
    }

    /// Restore the most recently created checkpoint. Returns `false` when
    /// no checkpoint exists. Calling twice in a row is a no-op the second
    /// time around: the state already matches the snapshot.
    pub async fn rollback_to_last(
        &self,
        state: &mut ExecutionState,
    ) -> Result<bool, CheckpointError> {
        let Some(checkpoint) = state.latest_checkpoint().cloned() else {
            return Ok(false);
        };

        let pipeline_id = state.pipeline_id().to_string();
        self.coordinator
            .restore_snapshot(&pipeline_id, &checkpoint.memory_snapshot)
            .await
            .map_err(|e| CheckpointError::RollbackFailed {
                reason: e.to_string(),
            })?;

        state.set_total_xp(checkpoint.total_xp);
        let keep: HashSet<_> = checkpoint.completed_agents.iter().copied().collect();
        state.retain_results(&keep);

        info!(
            phase = %checkpoint.phase,
            restored_entries = checkpoint.memory_snapshot.len(),
            "rolled back to checkpoint"
        );
        Ok(true)
    }

    /// Keep at most `max` checkpoints, dropping the oldest first.
    pub fn trim(&mut self, max: usize, state: &mut ExecutionState) {
        while self.created_order.len() > max {
            let oldest = self.created_order.remove(0);
            state.remove_checkpoint(oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use crate::catalog::builtin_mappings;
    use crate::memory::InMemoryBackend;
    use crate::state::AgentExecutionResult;
    use std::time::Duration;

    fn coordinator() -> Arc<MemoryCoordinator> {
        Arc::new(MemoryCoordinator::new(Arc::new(InMemoryBackend::new())))
    }

    fn success(agent: AgentId) -> AgentExecutionResult {
        AgentExecutionResult {
            agent,
            success: true,
            output: json!("out"),
            quality: 0.9,
            xp_earned: 50,
            memory_writes: Vec::new(),
            execution_time: Duration::from_millis(5),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_rollback_restores_boundary() {
        let coord = coordinator();
        let mut manager = CheckpointManager::new(coord.clone(), 5);
        let mut state = ExecutionState::new("p1");

        // Understanding completed before the boundary.
        let writer = builtin_mappings()
            .into_iter()
            .find(|m| m.id == AgentId::RequirementsAnalyst)
            .unwrap();
        coord
            .store_step_output(&writer, 0, "p1", json!("requirements"))
            .await
            .unwrap();
        state.record_result(success(AgentId::RequirementsAnalyst));
        state.add_xp(50);

        manager.create(Phase::Exploration, &mut state).await.unwrap();

        // Later work that rollback should discard.
        state.record_result(success(AgentId::CodebaseExplorer));
        state.add_xp(55);
        coord
            .store_step_output(&writer, 1, "p1", json!("later"))
            .await
            .unwrap();

        let applied = manager.rollback_to_last(&mut state).await.unwrap();
        assert!(applied);
        assert_eq!(state.total_xp(), 50);
        assert_eq!(
            state.completed_agents(),
            vec![AgentId::RequirementsAnalyst]
        );
        assert!(state.result(AgentId::CodebaseExplorer).is_none());
    }

    #[tokio::test]
    async fn test_rollback_without_checkpoint_returns_false() {
        let manager = CheckpointManager::new(coordinator(), 5);
        let mut state = ExecutionState::new("p1");
        assert!(!manager.rollback_to_last(&mut state).await.unwrap());
    }

    #[tokio::test]
    async fn test_rollback_is_idempotent() {
        let coord = coordinator();
        let mut manager = CheckpointManager::new(coord.clone(), 5);
        let mut state = ExecutionState::new("p1");

        state.record_result(success(AgentId::RequirementsAnalyst));
        state.add_xp(50);
        manager.create(Phase::Exploration, &mut state).await.unwrap();

        state.record_result(success(AgentId::CodebaseExplorer));
        state.add_xp(55);

        manager.rollback_to_last(&mut state).await.unwrap();
        let xp_once = state.total_xp();
        let agents_once = state.completed_agents();

        manager.rollback_to_last(&mut state).await.unwrap();
        assert_eq!(state.total_xp(), xp_once);
        assert_eq!(state.completed_agents(), agents_once);
    }

    #[tokio::test]
    async fn test_fifo_trim_keeps_newest() {
        let coord = coordinator();
        let mut manager = CheckpointManager::new(coord, 2);
        let mut state = ExecutionState::new("p1");

        manager.create(Phase::Understanding, &mut state).await.unwrap();
        manager.create(Phase::Exploration, &mut state).await.unwrap();
        manager.create(Phase::Architecture, &mut state).await.unwrap();

        assert!(state.checkpoint(Phase::Understanding).is_none());
        assert!(state.checkpoint(Phase::Exploration).is_some());
        assert!(state.checkpoint(Phase::Architecture).is_some());
    }
}
