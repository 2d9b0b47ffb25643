//! Output-summary extraction from raw agent text.
//!
//! Recognized markers are case-insensitive and line-leading:
//! `Created:` / `File created:`, `Modified:` / `File modified:`,
//! `Decision:`, `Finding:` / `Key finding:`. When no marker matches, the
//! first three non-empty lines stand in as key findings so downstream
//! consumers always see something.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CREATED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:file\s+)?created:\s*(.+)$").unwrap());

static MODIFIED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:file\s+)?modified:\s*(.+)$").unwrap());

static DECISION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^decision:\s*(.+)$").unwrap());

static FINDING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:key\s+)?finding:\s*(.+)$").unwrap());

/// Structured digest of one agent's raw output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub decisions: Vec<String>,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub key_findings: Vec<String>,
    pub output_length: usize,
}

/// Extract a summary from raw output. Deterministic and idempotent.
pub fn extract_output_summary(raw: &str) -> OutputSummary {
    let mut summary = OutputSummary {
        output_length: raw.len(),
        ..Default::default()
    };

    for line in raw.lines() {
        let line = line.trim();
        if let Some(cap) = CREATED_REGEX.captures(line) {
            summary.files_created.push(cap[1].trim().to_string());
        } else if let Some(cap) = MODIFIED_REGEX.captures(line) {
            summary.files_modified.push(cap[1].trim().to_string());
        } else if let Some(cap) = DECISION_REGEX.captures(line) {
            summary.decisions.push(cap[1].trim().to_string());
        } else if let Some(cap) = FINDING_REGEX.captures(line) {
            summary.key_findings.push(cap[1].trim().to_string());
        }
    }

    let no_markers = summary.files_created.is_empty()
        && summary.files_modified.is_empty()
        && summary.decisions.is_empty()
        && summary.key_findings.is_empty();
    if no_markers {
        summary.key_findings = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(3)
            .map(str::to_string)
            .collect();
    }

    summary
}
