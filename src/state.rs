//! Per-run mutable execution state and result types.
//!
//! The execution-result map is hard-capped: every insertion trims the
//! least-recently-written entries down to the cap, so a long or retried
//! run never grows memory without bound. The scheduler is the only writer;
//! agents receive immutable views.

use crate::agent::AgentId;
use crate::config::duration_millis;
use crate::memory::MemoryEntry;
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Hard cap on retained agent results.
pub const MAX_EXECUTION_RESULTS: usize = 1000;

/// Result of one agent attempt. Produced exactly once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub agent: AgentId,
    pub success: bool,
    /// Opaque step output (raw executor text, JSON-wrapped).
    pub output: serde_json::Value,
    /// Step quality in [0, 1] as reported by the executor; 0 on failure.
    pub quality: f64,
    pub xp_earned: u32,
    /// Domains written during the run.
    pub memory_writes: Vec<String>,
    #[serde(with = "duration_millis")]
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentExecutionResult {
    /// A failure result carrying the error message.
    pub fn failure(agent: AgentId, error: &str, execution_time: Duration) -> Self {
        Self {
            agent,
            success: false,
            output: serde_json::Value::Null,
            quality: 0.0,
            xp_earned: 0,
            memory_writes: Vec::new(),
            execution_time,
            error: Some(error.to_string()),
        }
    }
}

/// Snapshot taken at a configured phase boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    pub memory_snapshot: Vec<MemoryEntry>,
    pub completed_agents: Vec<AgentId>,
    pub total_xp: u64,
}

/// Mutable state for one pipeline run. Owned exclusively by the
/// orchestrator; never shared across pipelines.
#[derive(Debug)]
pub struct ExecutionState {
    pipeline_id: String,
    /// Agent results keyed by agent, with the write sequence that decides
    /// least-recently-written eviction.
    results: HashMap<AgentId, (u64, AgentExecutionResult)>,
    write_seq: u64,
    checkpoints: HashMap<Phase, Checkpoint>,
    total_xp: u64,
    current_phase_index: usize,
    max_results: usize,
}

impl ExecutionState {
    pub fn new(pipeline_id: &str) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            results: HashMap::new(),
            write_seq: 0,
            checkpoints: HashMap::new(),
            total_xp: 0,
            current_phase_index: 0,
            max_results: MAX_EXECUTION_RESULTS,
        }
    }

    /// Override the result cap (tests exercise eviction with small caps).
    pub fn with_result_cap(mut self, cap: usize) -> Self {
        self.max_results = cap.max(1);
        self
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Record a result, evicting least-recently-written entries beyond the
    /// cap. Re-recording an agent refreshes its write recency.
    pub fn record_result(&mut self, result: AgentExecutionResult) {
        self.write_seq += 1;
        self.results.insert(result.agent, (self.write_seq, result));

        while self.results.len() > self.max_results {
            if let Some(oldest) = self
                .results
                .iter()
                .min_by_key(|(_, (seq, _))| *seq)
                .map(|(agent, _)| *agent)
            {
                self.results.remove(&oldest);
            }
        }
    }

    pub fn result(&self, agent: AgentId) -> Option<&AgentExecutionResult> {
        self.results.get(&agent).map(|(_, r)| r)
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Agents currently holding results, unordered.
    pub fn result_agents(&self) -> HashSet<AgentId> {
        self.results.keys().copied().collect()
    }

    /// Agents with successful results, in canonical order.
    pub fn completed_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .results
            .values()
            .filter(|(_, r)| r.success)
            .map(|(_, r)| r.agent)
            .collect();
        agents.sort_by_key(|a| a.canonical_order());
        agents
    }

    /// Drop every result whose agent is not in `keep`.
    pub fn retain_results(&mut self, keep: &HashSet<AgentId>) {
        self.results.retain(|agent, _| keep.contains(agent));
    }

    pub fn add_xp(&mut self, xp: u64) {
        self.total_xp += xp;
    }

    pub fn set_total_xp(&mut self, xp: u64) {
        self.total_xp = xp;
    }

    pub fn total_xp(&self) -> u64 {
        self.total_xp
    }

    pub fn set_current_phase_index(&mut self, index: usize) {
        self.current_phase_index = index;
    }

    pub fn current_phase_index(&self) -> usize {
        self.current_phase_index
    }

    pub fn put_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.insert(checkpoint.phase, checkpoint);
    }

    pub fn checkpoint(&self, phase: Phase) -> Option<&Checkpoint> {
        self.checkpoints.get(&phase)
    }

    pub fn checkpoints(&self) -> &HashMap<Phase, Checkpoint> {
        &self.checkpoints
    }

    pub fn remove_checkpoint(&mut self, phase: Phase) -> Option<Checkpoint> {
        self.checkpoints.remove(&phase)
    }

    pub fn has_checkpoints(&self) -> bool {
        !self.checkpoints.is_empty()
    }

    /// The most recently created checkpoint, if any.
    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.values().max_by_key(|c| c.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(agent: AgentId, success: bool) -> AgentExecutionResult {
        AgentExecutionResult {
            agent,
            success,
            output: json!("out"),
            quality: if success { 0.9 } else { 0.0 },
            xp_earned: if success { 10 } else { 0 },
            memory_writes: Vec::new(),
            execution_time: Duration::from_millis(5),
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_bounded_eviction_is_least_recently_written() {
        let mut state = ExecutionState::new("p1").with_result_cap(3);
        let agents = [
            AgentId::RequirementsAnalyst, // A
            AgentId::ScopeMapper,         // B
            AgentId::ConstraintIdentifier, // C
            AgentId::SuccessCriteriaDefiner, // D
            AgentId::ContextGatherer,     // E
        ];

        for agent in &agents[..4] {
            state.record_result(result(*agent, true));
        }
        // After the fourth insert: {B, C, D}.
        assert_eq!(state.result_count(), 3);
        assert!(state.result(agents[0]).is_none());
        assert!(state.result(agents[1]).is_some());
        assert!(state.result(agents[3]).is_some());

        state.record_result(result(agents[4], true));
        // After the fifth: {C, D, E}.
        assert_eq!(state.result_count(), 3);
        assert!(state.result(agents[1]).is_none());
        assert!(state.result(agents[2]).is_some());
        assert!(state.result(agents[4]).is_some());
    }

    #[test]
    fn test_rewrite_refreshes_recency() {
        let mut state = ExecutionState::new("p1").with_result_cap(2);
        state.record_result(result(AgentId::RequirementsAnalyst, true));
        state.record_result(result(AgentId::ScopeMapper, true));
        // Refresh A, then insert C: B should be evicted, not A.
        state.record_result(result(AgentId::RequirementsAnalyst, true));
        state.record_result(result(AgentId::ConstraintIdentifier, true));

        assert!(state.result(AgentId::RequirementsAnalyst).is_some());
        assert!(state.result(AgentId::ScopeMapper).is_none());
    }

    #[test]
    fn test_completed_agents_only_successes_in_canonical_order() {
        let mut state = ExecutionState::new("p1");
        state.record_result(result(AgentId::ScopeMapper, true));
        state.record_result(result(AgentId::RequirementsAnalyst, true));
        state.record_result(result(AgentId::ConstraintIdentifier, false));

        assert_eq!(
            state.completed_agents(),
            vec![AgentId::RequirementsAnalyst, AgentId::ScopeMapper]
        );
    }

    #[test]
    fn test_retain_results() {
        let mut state = ExecutionState::new("p1");
        state.record_result(result(AgentId::RequirementsAnalyst, true));
        state.record_result(result(AgentId::ScopeMapper, true));

        let keep: HashSet<AgentId> = [AgentId::RequirementsAnalyst].into_iter().collect();
        state.retain_results(&keep);

        assert_eq!(state.result_count(), 1);
        assert!(state.result(AgentId::ScopeMapper).is_none());
    }

    #[test]
    fn test_latest_checkpoint_by_timestamp() {
        let mut state = ExecutionState::new("p1");
        let earlier = Checkpoint {
            phase: Phase::Understanding,
            timestamp: Utc::now() - chrono::Duration::seconds(60),
            memory_snapshot: Vec::new(),
            completed_agents: Vec::new(),
            total_xp: 0,
        };
        let later = Checkpoint {
            phase: Phase::Exploration,
            timestamp: Utc::now(),
            memory_snapshot: Vec::new(),
            completed_agents: Vec::new(),
            total_xp: 275,
        };
        state.put_checkpoint(earlier);
        state.put_checkpoint(later);

        assert_eq!(state.latest_checkpoint().unwrap().phase, Phase::Exploration);
    }
}
