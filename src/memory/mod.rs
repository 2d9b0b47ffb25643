//! Namespaced, immutable hand-off storage.
//!
//! Entries are write-once records in a string-keyed domain. The backend is
//! an async trait so the coordinator can sit on any keyed-record store with
//! per-domain enumeration; the in-process implementation backs tests and
//! single-machine runs.

mod coordinator;

pub use coordinator::{MemoryCoordinator, PreviousOutput, StoreReceipt, forensics};

use crate::errors::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One immutable hand-off record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique id; embeds the pipeline, step and a monotonic counter.
    pub id: String,
    /// Opaque payload. The coordinator interprets only its own envelope.
    pub content: serde_json::Value,
    /// Namespace key, e.g. `coding/understanding/requirements`.
    pub domain: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Per-process write sequence; breaks `created_at` ties.
    pub seq: u64,
}

impl MemoryEntry {
    /// Whether the entry carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Keyed-record store with per-domain enumeration.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Append an entry. Entries are immutable once stored.
    async fn put(&self, entry: MemoryEntry) -> Result<(), MemoryError>;

    /// All entries of one domain, in insertion order.
    async fn list(&self, domain: &str) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// All entries whose domain starts with `prefix`.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Remove every entry whose domain starts with `prefix` and which
    /// carries `tag`. Returns the number removed.
    async fn purge_prefix(&self, prefix: &str, tag: &str) -> Result<usize, MemoryError>;
}

/// In-process backend over a `tokio::sync::RwLock` map.
#[derive(Default)]
pub struct InMemoryBackend {
    domains: RwLock<HashMap<String, Vec<MemoryEntry>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn put(&self, entry: MemoryEntry) -> Result<(), MemoryError> {
        let mut domains = self.domains.write().await;
        domains.entry(entry.domain.clone()).or_default().push(entry);
        Ok(())
    }

    async fn list(&self, domain: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let domains = self.domains.read().await;
        Ok(domains.get(domain).cloned().unwrap_or_default())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let domains = self.domains.read().await;
        let mut out: Vec<MemoryEntry> = domains
            .iter()
            .filter(|(domain, _)| domain.starts_with(prefix))
            .flat_map(|(_, entries)| entries.iter().cloned())
            .collect();
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    async fn purge_prefix(&self, prefix: &str, tag: &str) -> Result<usize, MemoryError> {
        let mut domains = self.domains.write().await;
        let mut removed = 0;
        for (domain, entries) in domains.iter_mut() {
            if !domain.starts_with(prefix) {
                continue;
            }
            let before = entries.len();
            entries.retain(|e| !e.has_tag(tag));
            removed += before - entries.len();
        }
        domains.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }
}
