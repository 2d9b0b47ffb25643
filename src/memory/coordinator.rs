//! The memory coordinator: sole gateway to hand-off storage.
//!
//! Agents never touch the backend directly. The coordinator owns entry-id
//! generation (a per-process monotonic counter breaks timestamp ties so
//! concurrent stores always get distinct ids), the step-output envelope,
//! pipeline-scoped queries, and the fixed `coding/...` namespaces
//! including the forensic keys.

use crate::catalog::AgentMapping;
use crate::errors::MemoryError;
use crate::memory::{MemoryBackend, MemoryEntry};
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex as StdMutex};

/// Fixed keys of the forensic namespace. These strings are part of the
/// storage contract and must be produced verbatim.
pub mod forensics {
    pub const ALL_VERDICTS: &str = "coding/forensics/pipeline/all-verdicts";
    pub const PATTERN_LIBRARY: &str = "coding/forensics/pipeline/pattern-library";

    pub fn case_file(stage: u8) -> String {
        format!("coding/forensics/phase-{stage}/case-file")
    }

    pub fn verdict(stage: u8) -> String {
        format!("coding/forensics/phase-{stage}/verdict")
    }

    pub fn evidence_summary(stage: u8) -> String {
        format!("coding/forensics/phase-{stage}/evidence-summary")
    }

    pub fn remediation(stage: u8) -> String {
        format!("coding/forensics/phase-{stage}/remediation")
    }
}

/// Outcome of a successful store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub id: String,
    pub domain: String,
    pub seq: u64,
}

/// A previous step's output as retrieved for hand-off.
///
/// The envelope fields are `None` when an entry's content was not written
/// by [`MemoryCoordinator::store_step_output`]; the raw content is then
/// carried in `output` unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousOutput {
    pub step_index: Option<usize>,
    pub agent_key: Option<String>,
    pub output: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Internal step-output envelope.
#[derive(Debug, Serialize, Deserialize)]
struct StepEnvelope {
    step_index: usize,
    agent_key: String,
    output: Value,
    timestamp: DateTime<Utc>,
}

/// Sole gateway to persistent hand-off storage.
pub struct MemoryCoordinator {
    backend: Arc<dyn MemoryBackend>,
    /// Write clock: `(next_seq, last_stamp_micros)`. Sequence numbers and
    /// timestamps are issued together so `created_at` is monotonic in
    /// sequence order even when concurrent batch members store together.
    clock: StdMutex<(u64, i64)>,
}

impl MemoryCoordinator {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            backend,
            clock: StdMutex::new((1, 0)),
        }
    }

    /// Allocate the next `(seq, created_at)` pair. The timestamp is the
    /// wall clock, nudged forward when it would repeat or regress.
    fn allocate_stamp(&self) -> (u64, DateTime<Utc>) {
        let mut clock = self.clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (seq, last) = *clock;
        let stamp = Utc::now().timestamp_micros().max(last + 1);
        *clock = (seq + 1, stamp);
        (
            seq,
            DateTime::from_timestamp_micros(stamp).unwrap_or_else(Utc::now),
        )
    }

    /// Store an arbitrary immutable entry in a domain.
    pub async fn store_in_domain(
        &self,
        domain: &str,
        tags: Vec<String>,
        content: Value,
    ) -> Result<StoreReceipt, MemoryError> {
        let (seq, now) = self.allocate_stamp();
        let entry = MemoryEntry {
            id: format!("mem-{}-{}", now.timestamp_millis(), seq),
            content,
            domain: domain.to_string(),
            tags,
            created_at: now,
            seq,
        };
        let receipt = StoreReceipt {
            id: entry.id.clone(),
            domain: entry.domain.clone(),
            seq,
        };
        self.backend.put(entry).await?;
        Ok(receipt)
    }

    /// Store one agent's step output under its first declared write domain,
    /// tagged with the pipeline id and the step index.
    pub async fn store_step_output(
        &self,
        step: &AgentMapping,
        step_index: usize,
        pipeline_id: &str,
        output: Value,
    ) -> Result<StoreReceipt, MemoryError> {
        let domain = step.output_domain().ok_or_else(|| MemoryError::StoreFailed {
            domain: format!("coding/{}", step.phase.key()),
            reason: format!("agent '{}' declares no write domain", step.id),
        })?;

        let (seq, now) = self.allocate_stamp();
        let envelope = StepEnvelope {
            step_index,
            agent_key: step.id.key().to_string(),
            output,
            timestamp: now,
        };

        let mut tags = step.output_tags.clone();
        tags.push(pipeline_id.to_string());
        tags.push(format!("step-{step_index}"));

        let entry = MemoryEntry {
            id: format!(
                "pipeline-{pipeline_id}-step-{step_index}-{}-{seq}",
                now.timestamp_millis()
            ),
            content: serde_json::to_value(&envelope).map_err(|e| MemoryError::StoreFailed {
                domain: domain.to_string(),
                reason: e.to_string(),
            })?,
            domain: domain.to_string(),
            tags,
            created_at: now,
            seq,
        };

        let receipt = StoreReceipt {
            id: entry.id.clone(),
            domain: entry.domain.clone(),
            seq,
        };
        self.backend.put(entry).await?;
        Ok(receipt)
    }

    /// Retrieve the chronologically newest previous output for a step.
    ///
    /// Returns `None` when the step declares no input domain or nothing
    /// matches. Entries are filtered to the pipeline id, optionally to any
    /// of the step's input tags, and the newest match is unwrapped from the
    /// step envelope; content that does not parse as an envelope comes back
    /// raw.
    pub async fn retrieve_previous_output(
        &self,
        step: &AgentMapping,
        pipeline_id: &str,
    ) -> Result<Option<PreviousOutput>, MemoryError> {
        let Some(domain) = step.input_domain() else {
            return Ok(None);
        };

        let mut entries: Vec<MemoryEntry> = self
            .backend
            .list(domain)
            .await?
            .into_iter()
            .filter(|e| e.has_tag(pipeline_id))
            .filter(|e| {
                step.input_tags.is_empty() || step.input_tags.iter().any(|t| e.has_tag(t))
            })
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(entries.first().map(|e| unwrap_envelope(&e.content)))
    }

    /// Retrieve the output stored for a specific step index in a domain.
    pub async fn retrieve_step_output(
        &self,
        pipeline_id: &str,
        step_index: usize,
        domain: &str,
    ) -> Result<Option<PreviousOutput>, MemoryError> {
        let step_tag = format!("step-{step_index}");
        let mut entries: Vec<MemoryEntry> = self
            .backend
            .list(domain)
            .await?
            .into_iter()
            .filter(|e| e.has_tag(pipeline_id) && e.has_tag(&step_tag))
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(entries.first().map(|e| unwrap_envelope(&e.content)))
    }

    /// Whether any previous output exists for the step.
    pub async fn has_previous_output(
        &self,
        step: &AgentMapping,
        pipeline_id: &str,
    ) -> Result<bool, MemoryError> {
        Ok(self.retrieve_previous_output(step, pipeline_id).await?.is_some())
    }

    /// Latest entries for each read domain, most recent first, scoped to
    /// the pipeline.
    pub async fn gather_context(
        &self,
        reads: &[String],
        pipeline_id: &str,
        per_domain_limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut context = Vec::new();
        for domain in reads {
            let mut entries: Vec<MemoryEntry> = self
                .backend
                .list(domain)
                .await?
                .into_iter()
                .filter(|e| e.has_tag(pipeline_id))
                .collect();
            entries.sort_by(|a, b| b.seq.cmp(&a.seq));
            entries.truncate(per_domain_limit);
            context.extend(entries);
        }
        Ok(context)
    }

    /// Snapshot every entry of this pipeline's namespace.
    pub async fn snapshot_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        Ok(self
            .backend
            .list_prefix("coding/")
            .await?
            .into_iter()
            .filter(|e| e.has_tag(pipeline_id))
            .collect())
    }

    /// Replace this pipeline's namespace with a snapshot. Restored entries
    /// keep their original ids and sequence numbers.
    pub async fn restore_snapshot(
        &self,
        pipeline_id: &str,
        snapshot: &[MemoryEntry],
    ) -> Result<(), MemoryError> {
        self.backend.purge_prefix("coding/", pipeline_id).await?;
        for entry in snapshot {
            self.backend.put(entry.clone()).await?;
        }
        Ok(())
    }

    // Typed helpers under the fixed sub-namespaces.

    pub async fn store_pipeline_state(
        &self,
        pipeline_id: &str,
        state: Value,
    ) -> Result<StoreReceipt, MemoryError> {
        self.store_in_domain("coding/pipeline/state", vec![pipeline_id.to_string()], state)
            .await
    }

    pub async fn store_dag_summary(
        &self,
        pipeline_id: &str,
        summary: Value,
    ) -> Result<StoreReceipt, MemoryError> {
        self.store_in_domain("coding/pipeline/dag", vec![pipeline_id.to_string()], summary)
            .await
    }

    pub async fn store_checkpoint_record(
        &self,
        pipeline_id: &str,
        phase: Phase,
        checkpoint: Value,
    ) -> Result<StoreReceipt, MemoryError> {
        self.store_in_domain(
            &format!("coding/pipeline/checkpoints/{}", phase.key()),
            vec![pipeline_id.to_string()],
            checkpoint,
        )
        .await
    }

    pub async fn store_xp_total(
        &self,
        pipeline_id: &str,
        total: u64,
    ) -> Result<StoreReceipt, MemoryError> {
        self.store_in_domain(
            "coding/xp/total",
            vec![pipeline_id.to_string()],
            json!({ "total": total }),
        )
        .await
    }

    pub async fn store_phase_xp(
        &self,
        pipeline_id: &str,
        phase: Phase,
        xp: u64,
    ) -> Result<StoreReceipt, MemoryError> {
        self.store_in_domain(
            &format!("coding/xp/phase-{}", phase.key()),
            vec![pipeline_id.to_string()],
            json!({ "xp": xp }),
        )
        .await
    }

    pub async fn store_context(
        &self,
        pipeline_id: &str,
        label: &str,
        content: Value,
    ) -> Result<StoreReceipt, MemoryError> {
        self.store_in_domain(
            &format!("coding/context/{label}"),
            vec![pipeline_id.to_string()],
            content,
        )
        .await
    }

    /// Raw domain listing, for evidence collection.
    pub async fn list_domain(&self, domain: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.backend.list(domain).await
    }
}

fn unwrap_envelope(content: &Value) -> PreviousOutput {
    match serde_json::from_value::<StepEnvelope>(content.clone()) {
        Ok(envelope) => PreviousOutput {
            step_index: Some(envelope.step_index),
            agent_key: Some(envelope.agent_key),
            output: envelope.output,
            timestamp: Some(envelope.timestamp),
        },
        Err(_) => PreviousOutput {
            step_index: None,
            agent_key: None,
            output: content.clone(),
            timestamp: None,
        },
    }
}
