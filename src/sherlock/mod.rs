//! Phase-gated forensic review.
//!
//! After each phase an adversarial reviewer examines the phase's outputs
//! under a guilty-until-proven-innocent stance and renders one of three
//! verdicts: INNOCENT (advance), GUILTY (re-run or escalate) or
//! INSUFFICIENT_EVIDENCE (re-gather). The verdict function is fully
//! deterministic over the check results and persona findings.

mod gate;
mod protocol;

pub use gate::{MAX_PATTERNS_SIZE, ReviewInput, SherlockConfig, SherlockGate};
pub use protocol::SherlockProtocol;

use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The three possible review outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Innocent,
    Guilty,
    InsufficientEvidence,
}

impl Verdict {
    /// Base quality delivered as learning feedback for this verdict.
    pub fn quality_base(&self) -> f64 {
        match self {
            Verdict::Innocent => 0.9,
            Verdict::Guilty => 0.3,
            Verdict::InsufficientEvidence => 0.5,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Innocent => "INNOCENT",
            Verdict::Guilty => "GUILTY",
            Verdict::InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
        };
        write!(f, "{s}")
    }
}

/// Confidence attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Multiplier applied to the verdict's base quality.
    pub fn multiplier(&self) -> f64 {
        match self {
            Confidence::High => 1.0,
            Confidence::Medium => 0.85,
            Confidence::Low => 0.7,
        }
    }
}

/// How deep the investigation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationTier {
    Glance,
    #[default]
    Scan,
    Investigation,
    DeepDive,
}

impl InvestigationTier {
    /// Nominal time budget of the tier.
    pub fn time_budget(&self) -> Duration {
        match self {
            InvestigationTier::Glance => Duration::from_secs(5),
            InvestigationTier::Scan => Duration::from_secs(30),
            InvestigationTier::Investigation => Duration::from_secs(300),
            InvestigationTier::DeepDive => Duration::from_secs(1800),
        }
    }
}

impl fmt::Display for InvestigationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestigationTier::Glance => "GLANCE",
            InvestigationTier::Scan => "SCAN",
            InvestigationTier::Investigation => "INVESTIGATION",
            InvestigationTier::DeepDive => "DEEP_DIVE",
        };
        write!(f, "{s}")
    }
}

/// The closed set of adversarial reviewer personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    TheBug,
    TheAttacker,
    TheTiredDeveloper,
    TheFutureArchaeologist,
    TheConfusedDeveloper,
    TheFutureMaintainer,
    ThePerformanceTester,
    TheNewHire,
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Persona::TheBug => "THE_BUG",
            Persona::TheAttacker => "THE_ATTACKER",
            Persona::TheTiredDeveloper => "THE_TIRED_DEVELOPER",
            Persona::TheFutureArchaeologist => "THE_FUTURE_ARCHAEOLOGIST",
            Persona::TheConfusedDeveloper => "THE_CONFUSED_DEVELOPER",
            Persona::TheFutureMaintainer => "THE_FUTURE_MAINTAINER",
            Persona::ThePerformanceTester => "THE_PERFORMANCE_TESTER",
            Persona::TheNewHire => "THE_NEW_HIRE",
        };
        write!(f, "{s}")
    }
}

/// Classification of one evidence source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStatus {
    Verified,
    Missing,
    Suspect,
}

/// Evidence retrieval outcome for one source domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub source: String,
    pub status: EvidenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A named check in the verification matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub method: String,
    pub threshold: f64,
}

/// Outcome of one verification check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub method: String,
    pub expected: f64,
    pub actual: f64,
    pub passed: bool,
}

/// Severity of an adversarial finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// One persona's findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialFinding {
    pub persona: Persona,
    pub findings: Vec<String>,
    pub severity: Severity,
    /// Suggested fixes, folded into remediations on GUILTY.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixes: Vec<String>,
}

/// The full record of one phase review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFile {
    pub case_id: String,
    pub phase: Phase,
    pub tier: InvestigationTier,
    pub verdict: Verdict,
    pub confidence: Confidence,
    pub evidence_summary: String,
    pub verification_results: Vec<CheckResult>,
    pub adversarial_findings: Vec<AdversarialFinding>,
    pub chain_of_custody: Vec<String>,
    pub remediations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// What the phase executor consumes from a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReview {
    pub case_id: String,
    pub tier: InvestigationTier,
    pub verdict: Verdict,
    pub confidence: Confidence,
    pub can_proceed: bool,
    pub remediations: Vec<String>,
}

/// Deterministic verdict over checks and findings.
///
/// INNOCENT iff no failed checks and no critical findings (HIGH confidence
/// without warnings, MEDIUM with). GUILTY iff any critical finding exists
/// or more than half the checks failed (always HIGH confidence;
/// remediations from failed checks and critical fixes). Everything else is
/// INSUFFICIENT_EVIDENCE at LOW confidence with an `Investigate:` entry
/// per failed check.
pub fn render_verdict(
    checks: &[CheckResult],
    findings: &[AdversarialFinding],
) -> (Verdict, Confidence, Vec<String>) {
    let failed: Vec<&CheckResult> = checks.iter().filter(|c| !c.passed).collect();
    let criticals: Vec<&AdversarialFinding> = findings
        .iter()
        .filter(|f| f.severity == Severity::Critical)
        .collect();
    let has_warnings = findings.iter().any(|f| f.severity == Severity::Warning);

    if failed.is_empty() && criticals.is_empty() {
        let confidence = if has_warnings {
            Confidence::Medium
        } else {
            Confidence::High
        };
        return (Verdict::Innocent, confidence, Vec::new());
    }

    let guilty = !criticals.is_empty() || (!checks.is_empty() && failed.len() * 2 > checks.len());
    if guilty {
        let mut remediations: Vec<String> = failed
            .iter()
            .map(|c| format!("Fix failed check '{}' ({})", c.check, c.method))
            .collect();
        for finding in &criticals {
            remediations.extend(finding.fixes.iter().cloned());
        }
        return (Verdict::Guilty, Confidence::High, remediations);
    }

    let remediations = failed
        .iter()
        .map(|c| format!("Investigate: {}", c.check))
        .collect();
    (Verdict::InsufficientEvidence, Confidence::Low, remediations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, passed: bool) -> CheckResult {
        CheckResult {
            check: name.to_string(),
            method: "ratio".to_string(),
            expected: 0.8,
            actual: if passed { 1.0 } else { 0.1 },
            passed,
        }
    }

    fn finding(severity: Severity) -> AdversarialFinding {
        AdversarialFinding {
            persona: Persona::TheBug,
            findings: vec!["something".to_string()],
            severity,
            fixes: vec!["fix it".to_string()],
        }
    }

    #[test]
    fn test_clean_review_is_innocent_high() {
        let (verdict, confidence, remediations) =
            render_verdict(&[check("a", true), check("b", true)], &[]);
        assert_eq!(verdict, Verdict::Innocent);
        assert_eq!(confidence, Confidence::High);
        assert!(remediations.is_empty());
    }

    #[test]
    fn test_warnings_demote_innocent_to_medium() {
        let (verdict, confidence, _) =
            render_verdict(&[check("a", true)], &[finding(Severity::Warning)]);
        assert_eq!(verdict, Verdict::Innocent);
        assert_eq!(confidence, Confidence::Medium);
    }

    #[test]
    fn test_one_critical_finding_flips_to_guilty() {
        let (verdict, confidence, remediations) =
            render_verdict(&[check("a", true)], &[finding(Severity::Critical)]);
        assert_eq!(verdict, Verdict::Guilty);
        assert_eq!(confidence, Confidence::High);
        assert_eq!(remediations, vec!["fix it"]);
    }

    #[test]
    fn test_majority_failed_checks_is_guilty() {
        let (verdict, _, remediations) = render_verdict(
            &[check("a", false), check("b", false), check("c", true)],
            &[],
        );
        assert_eq!(verdict, Verdict::Guilty);
        assert_eq!(remediations.len(), 2);
        assert!(remediations[0].contains("'a'"));
    }

    #[test]
    fn test_minority_failed_checks_is_insufficient_evidence() {
        let (verdict, confidence, remediations) = render_verdict(
            &[check("a", false), check("b", true), check("c", true)],
            &[],
        );
        assert_eq!(verdict, Verdict::InsufficientEvidence);
        assert_eq!(confidence, Confidence::Low);
        assert_eq!(remediations, vec!["Investigate: a"]);
    }

    #[test]
    fn test_exactly_half_failed_is_not_guilty() {
        let (verdict, _, _) = render_verdict(&[check("a", false), check("b", true)], &[]);
        assert_eq!(verdict, Verdict::InsufficientEvidence);
    }

    #[test]
    fn test_verdict_quality_mapping() {
        assert!((Verdict::Innocent.quality_base() - 0.9).abs() < 1e-9);
        assert!((Verdict::Guilty.quality_base() - 0.3).abs() < 1e-9);
        assert!((Verdict::InsufficientEvidence.quality_base() - 0.5).abs() < 1e-9);
        assert!((Confidence::High.multiplier() - 1.0).abs() < 1e-9);
        assert!((Confidence::Medium.multiplier() - 0.85).abs() < 1e-9);
        assert!((Confidence::Low.multiplier() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_tier_time_budgets() {
        assert_eq!(InvestigationTier::Glance.time_budget(), Duration::from_secs(5));
        assert_eq!(InvestigationTier::Scan.time_budget(), Duration::from_secs(30));
        assert_eq!(
            InvestigationTier::Investigation.time_budget(),
            Duration::from_secs(300)
        );
        assert_eq!(
            InvestigationTier::DeepDive.time_budget(),
            Duration::from_secs(1800)
        );
    }
}
