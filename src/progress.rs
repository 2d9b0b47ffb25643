//! Live agent lifecycle tracking and advisory file claims.
//!
//! Both stores are per-run and shared by every agent in a batch; all
//! mutation goes through an async mutex so concurrent `mark_*` and claim
//! calls interleave safely. Claims are advisory only: they inform peers
//! (through situational awareness) but never block anyone.

use crate::agent::AgentId;
use crate::executor::OutputSummary;
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One agent's progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub agent: AgentId,
    pub phase: Phase,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<OutputSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tracks every registered agent's lifecycle for the run.
#[derive(Default)]
pub struct ProgressStore {
    entries: Mutex<HashMap<AgentId, ProgressEntry>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a phase's agents as pending.
    pub async fn register(&self, phase: Phase, agents: &[AgentId]) {
        let mut entries = self.entries.lock().await;
        for agent in agents {
            entries.insert(
                *agent,
                ProgressEntry {
                    agent: *agent,
                    phase,
                    status: AgentStatus::Pending,
                    started_at: None,
                    completed_at: None,
                    output_summary: None,
                    error: None,
                },
            );
        }
    }

    pub async fn mark_active(&self, agent: AgentId) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&agent) {
            entry.status = AgentStatus::Active;
            entry.started_at = Some(Utc::now());
        }
    }

    pub async fn mark_completed(&self, agent: AgentId, summary: OutputSummary) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&agent) {
            entry.status = AgentStatus::Completed;
            entry.completed_at = Some(Utc::now());
            entry.output_summary = Some(summary);
        }
    }

    pub async fn mark_failed(&self, agent: AgentId, error: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&agent) {
            entry.status = AgentStatus::Failed;
            entry.completed_at = Some(Utc::now());
            entry.error = Some(error.to_string());
        }
    }

    /// Snapshot of every entry.
    pub async fn snapshot(&self) -> Vec<ProgressEntry> {
        let entries = self.entries.lock().await;
        let mut out: Vec<ProgressEntry> = entries.values().cloned().collect();
        out.sort_by_key(|e| e.agent.canonical_order());
        out
    }

    /// Entries of one phase.
    pub async fn phase_entries(&self, phase: Phase) -> Vec<ProgressEntry> {
        let entries = self.entries.lock().await;
        let mut out: Vec<ProgressEntry> = entries
            .values()
            .filter(|e| e.phase == phase)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.agent.canonical_order());
        out
    }

    /// Peers of `agent` within `phase` holding the given status.
    pub async fn peers_with_status(
        &self,
        phase: Phase,
        agent: AgentId,
        status: AgentStatus,
    ) -> Vec<AgentId> {
        self.phase_entries(phase)
            .await
            .into_iter()
            .filter(|e| e.agent != agent && e.status == status)
            .map(|e| e.agent)
            .collect()
    }
}

/// Read or write intent of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimOperation {
    Read,
    Write,
}

/// One advisory claim on a file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileClaim {
    pub file_path: PathBuf,
    pub claimed_by: AgentId,
    pub claimed_at: DateTime<Utc>,
    pub operation: ClaimOperation,
}

/// Advisory file-claim registry: many readers, one writer per path.
#[derive(Default)]
pub struct FileClaims {
    claims: Mutex<Vec<FileClaim>>,
}

impl FileClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a path for writing. Fails only when another agent already
    /// holds a write claim on the same path; re-claiming by the holder
    /// renews the claim.
    pub async fn claim_for_write(&self, agent: AgentId, path: &Path) -> bool {
        let mut claims = self.claims.lock().await;
        let holder = claims
            .iter()
            .find(|c| c.file_path == path && c.operation == ClaimOperation::Write);
        match holder {
            Some(existing) if existing.claimed_by != agent => false,
            Some(_) => {
                // Renewal: refresh the timestamp.
                for claim in claims.iter_mut() {
                    if claim.file_path == path
                        && claim.operation == ClaimOperation::Write
                        && claim.claimed_by == agent
                    {
                        claim.claimed_at = Utc::now();
                    }
                }
                true
            }
            None => {
                claims.push(FileClaim {
                    file_path: path.to_path_buf(),
                    claimed_by: agent,
                    claimed_at: Utc::now(),
                    operation: ClaimOperation::Write,
                });
                true
            }
        }
    }

    /// Claim a path for reading. Always succeeds.
    pub async fn claim_for_read(&self, agent: AgentId, path: &Path) -> bool {
        let mut claims = self.claims.lock().await;
        claims.push(FileClaim {
            file_path: path.to_path_buf(),
            claimed_by: agent,
            claimed_at: Utc::now(),
            operation: ClaimOperation::Read,
        });
        true
    }

    /// Release every claim held by the agent. Idempotent.
    pub async fn release_all(&self, agent: AgentId) {
        let mut claims = self.claims.lock().await;
        claims.retain(|c| c.claimed_by != agent);
    }

    /// Write claims currently held by *other* agents; what situational
    /// awareness shows a running agent.
    pub async fn conflicts_for(&self, agent: AgentId) -> Vec<FileClaim> {
        let claims = self.claims.lock().await;
        claims
            .iter()
            .filter(|c| c.claimed_by != agent && c.operation == ClaimOperation::Write)
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<FileClaim> {
        self.claims.lock().await.clone()
    }
}
