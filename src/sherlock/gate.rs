//! The forensic gate engine.
//!
//! One `review` call collects evidence for the phase, runs the
//! verification matrix at the selected investigation tier, consults the
//! phase's adversarial personas, renders the deterministic verdict, files
//! the case under the forensic namespace and feeds the verdict back to the
//! learning subsystem (promoting high-quality verdicts into the bounded
//! pattern library).

use crate::catalog::AgentMapping;
use crate::executor::{OutputSummary, extract_output_summary};
use crate::gates::{GateResult, PhaseValidation};
use crate::learning::{FeedbackOptions, LearningEngine};
use crate::memory::{MemoryCoordinator, forensics};
use crate::phase::Phase;
use crate::sherlock::protocol::SherlockProtocol;
use crate::sherlock::{
    AdversarialFinding, CaseFile, CheckResult, Confidence, EvidenceRecord, EvidenceStatus,
    GateReview, InvestigationTier, Persona, Severity, Verdict, render_verdict,
};
use crate::state::AgentExecutionResult;
use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hard cap on the promoted-pattern store (FIFO eviction).
pub const MAX_PATTERNS_SIZE: usize = 500;

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct SherlockConfig {
    pub default_tier: InvestigationTier,
    /// Verdict quality at or above which a pattern is promoted.
    pub pattern_threshold: f64,
    pub enable_learning: bool,
    /// Step duration past which THE_PERFORMANCE_TESTER raises a warning.
    pub slow_step_threshold: Duration,
}

impl Default for SherlockConfig {
    fn default() -> Self {
        Self {
            default_tier: InvestigationTier::Scan,
            pattern_threshold: 0.75,
            enable_learning: true,
            slow_step_threshold: Duration::from_secs(300),
        }
    }
}

/// Everything one review needs to see.
pub struct ReviewInput<'a> {
    pub phase: Phase,
    pub pipeline_id: &'a str,
    /// Mappings of the reviewed phase's agents.
    pub phase_mappings: &'a [AgentMapping],
    pub results: &'a [AgentExecutionResult],
    pub retry_count: u32,
    pub validation: Option<&'a PhaseValidation>,
}

/// The forensic reviewer.
pub struct SherlockGate {
    coordinator: Arc<MemoryCoordinator>,
    learning: Option<Arc<dyn LearningEngine>>,
    config: SherlockConfig,
    history: Mutex<Vec<CaseFile>>,
    patterns: Mutex<VecDeque<serde_json::Value>>,
}

impl SherlockGate {
    pub fn new(
        coordinator: Arc<MemoryCoordinator>,
        learning: Option<Arc<dyn LearningEngine>>,
        config: SherlockConfig,
    ) -> Self {
        Self {
            coordinator,
            learning,
            config,
            history: Mutex::new(Vec::new()),
            patterns: Mutex::new(VecDeque::new()),
        }
    }

    /// Pick the investigation tier for this attempt.
    ///
    /// Retries escalate unconditionally; otherwise the L-Score gate result
    /// refines the choice, and without a gate result the configured
    /// default applies.
    pub fn select_tier(&self, retry_count: u32, gate_result: Option<GateResult>) -> InvestigationTier {
        if retry_count >= 2 {
            return InvestigationTier::DeepDive;
        }
        if retry_count >= 1 {
            return InvestigationTier::Investigation;
        }
        match gate_result {
            Some(GateResult::HardReject) => InvestigationTier::DeepDive,
            Some(GateResult::SoftReject) => InvestigationTier::Investigation,
            Some(GateResult::ConditionalPass) => InvestigationTier::Scan,
            Some(_) => InvestigationTier::Glance,
            None => self.config.default_tier,
        }
    }

    /// Review one phase attempt and file the case.
    pub async fn review(&self, input: ReviewInput<'_>) -> GateReview {
        let tier = self.select_tier(input.retry_count, input.validation.map(|v| v.gate_result));
        let protocol = SherlockProtocol::for_phase(input.phase, input.phase_mappings);

        let mut custody = vec![format!(
            "{} case opened for phase {} at tier {tier} (budget {}s, retry {})",
            Utc::now().to_rfc3339(),
            input.phase,
            tier.time_budget().as_secs(),
            input.retry_count
        )];
        for criterion in &protocol.verdict_criteria {
            custody.push(format!("{} criterion: {criterion}", Utc::now().to_rfc3339()));
        }

        let evidence = self.collect_evidence(&protocol, input.pipeline_id, &mut custody).await;
        let checks = self.run_verification_matrix(&protocol, tier, &evidence, &input);
        custody.push(format!(
            "{} verification matrix complete: {}/{} checks passed",
            Utc::now().to_rfc3339(),
            checks.iter().filter(|c| c.passed).count(),
            checks.len()
        ));

        let summaries: Vec<(AgentExecutionResult, OutputSummary)> = input
            .results
            .iter()
            .map(|r| {
                let raw = r.output.as_str().unwrap_or_default();
                (r.clone(), extract_output_summary(raw))
            })
            .collect();
        let findings: Vec<AdversarialFinding> = protocol
            .personas
            .iter()
            .filter_map(|p| self.consult_persona(*p, &input, &evidence, &summaries))
            .collect();
        custody.push(format!(
            "{} adversarial analysis complete: {} findings from {} personas",
            Utc::now().to_rfc3339(),
            findings.len(),
            protocol.personas.len()
        ));

        let (verdict, confidence, remediations) = render_verdict(&checks, &findings);
        custody.push(format!(
            "{} verdict rendered: {verdict} ({confidence:?})",
            Utc::now().to_rfc3339()
        ));

        let verified = evidence
            .iter()
            .filter(|e| e.status == EvidenceStatus::Verified)
            .count();
        let missing = evidence
            .iter()
            .filter(|e| e.status == EvidenceStatus::Missing)
            .count();
        let suspect = evidence.len() - verified - missing;
        let evidence_summary = format!(
            "{verified}/{} evidence sources verified; {missing} missing; {suspect} suspect",
            evidence.len()
        );

        let case = CaseFile {
            case_id: format!("case-{}-{}", input.phase.key(), Uuid::new_v4().simple()),
            phase: input.phase,
            tier,
            verdict,
            confidence,
            evidence_summary,
            verification_results: checks,
            adversarial_findings: findings,
            chain_of_custody: custody,
            remediations: remediations.clone(),
            timestamp: Utc::now(),
        };

        info!(
            phase = %input.phase,
            tier = %tier,
            verdict = %verdict,
            remediations = remediations.len(),
            "sherlock verdict"
        );

        self.file_case(&case, input.pipeline_id).await;
        self.feed_learning(&case, input.pipeline_id, input.validation).await;
        self.history.lock().await.push(case.clone());

        GateReview {
            case_id: case.case_id,
            tier,
            verdict,
            confidence,
            can_proceed: verdict == Verdict::Innocent,
            remediations,
        }
    }

    /// Review history accumulated this run.
    pub async fn history(&self) -> Vec<CaseFile> {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Current promoted-pattern count (bounded by [`MAX_PATTERNS_SIZE`]).
    pub async fn pattern_count(&self) -> usize {
        self.patterns.lock().await.len()
    }

    async fn collect_evidence(
        &self,
        protocol: &SherlockProtocol,
        pipeline_id: &str,
        custody: &mut Vec<String>,
    ) -> Vec<EvidenceRecord> {
        let mut evidence = Vec::with_capacity(protocol.evidence_sources.len());
        for source in &protocol.evidence_sources {
            let record = match self.coordinator.list_domain(source).await {
                Ok(entries) => {
                    let matching = entries.iter().filter(|e| e.has_tag(pipeline_id)).count();
                    if matching > 0 {
                        EvidenceRecord {
                            source: source.clone(),
                            status: EvidenceStatus::Verified,
                            detail: Some(format!("{matching} entries")),
                        }
                    } else {
                        EvidenceRecord {
                            source: source.clone(),
                            status: EvidenceStatus::Missing,
                            detail: None,
                        }
                    }
                }
                Err(err) => EvidenceRecord {
                    source: source.clone(),
                    status: EvidenceStatus::Suspect,
                    detail: Some(err.to_string()),
                },
            };
            custody.push(format!(
                "{} evidence {}: {:?}",
                Utc::now().to_rfc3339(),
                record.source,
                record.status
            ));
            evidence.push(record);
        }
        evidence
    }

    fn run_verification_matrix(
        &self,
        protocol: &SherlockProtocol,
        tier: InvestigationTier,
        evidence: &[EvidenceRecord],
        input: &ReviewInput<'_>,
    ) -> Vec<CheckResult> {
        let results = input.results;
        let components = input.validation.map(|v| v.l_score.components);

        protocol
            .verification_matrix(tier)
            .into_iter()
            .filter_map(|check| {
                let actual = match check.name.as_str() {
                    "evidence-completeness" => {
                        if evidence.is_empty() {
                            1.0
                        } else {
                            evidence
                                .iter()
                                .filter(|e| e.status == EvidenceStatus::Verified)
                                .count() as f64
                                / evidence.len() as f64
                        }
                    }
                    "agent-success-rate" => {
                        if results.is_empty() {
                            1.0
                        } else {
                            results.iter().filter(|r| r.success).count() as f64
                                / results.len() as f64
                        }
                    }
                    "output-quality" => {
                        if results.is_empty() {
                            1.0
                        } else {
                            results.iter().map(|r| r.quality).sum::<f64>() / results.len() as f64
                        }
                    }
                    "critical-agent-integrity" => {
                        let critical: Vec<_> = results
                            .iter()
                            .filter(|r| {
                                input
                                    .phase_mappings
                                    .iter()
                                    .any(|m| m.id == r.agent && m.critical)
                            })
                            .collect();
                        if critical.is_empty() {
                            1.0
                        } else {
                            critical.iter().filter(|r| r.success).count() as f64
                                / critical.len() as f64
                        }
                    }
                    "lscore-accuracy" => components?.accuracy,
                    "lscore-completeness" => components?.completeness,
                    "lscore-security" => components?.security,
                    "output-substance" => {
                        let successes: Vec<_> = results.iter().filter(|r| r.success).collect();
                        if successes.is_empty() {
                            1.0
                        } else {
                            successes
                                .iter()
                                .filter(|r| {
                                    !r.output.as_str().unwrap_or_default().trim().is_empty()
                                })
                                .count() as f64
                                / successes.len() as f64
                        }
                    }
                    other => {
                        debug!(check = other, "unknown verification check skipped");
                        return None;
                    }
                };

                Some(CheckResult {
                    passed: actual >= check.threshold,
                    check: check.name,
                    method: check.method,
                    expected: check.threshold,
                    actual,
                })
            })
            .collect()
    }

    fn consult_persona(
        &self,
        persona: Persona,
        input: &ReviewInput<'_>,
        evidence: &[EvidenceRecord],
        summaries: &[(AgentExecutionResult, OutputSummary)],
    ) -> Option<AdversarialFinding> {
        let results = input.results;
        match persona {
            Persona::TheBug => {
                let failed: Vec<&AgentExecutionResult> =
                    results.iter().filter(|r| !r.success).collect();
                if !failed.is_empty() {
                    return Some(AdversarialFinding {
                        persona,
                        findings: failed
                            .iter()
                            .map(|r| {
                                format!(
                                    "{} failed: {}",
                                    r.agent,
                                    r.error.as_deref().unwrap_or("unknown error")
                                )
                            })
                            .collect(),
                        severity: Severity::Critical,
                        fixes: failed
                            .iter()
                            .map(|r| format!("Re-run agent '{}'", r.agent))
                            .collect(),
                    });
                }
                let empty: Vec<&AgentExecutionResult> = results
                    .iter()
                    .filter(|r| {
                        r.success && r.output.as_str().unwrap_or_default().trim().is_empty()
                    })
                    .collect();
                (!empty.is_empty()).then(|| AdversarialFinding {
                    persona,
                    findings: empty
                        .iter()
                        .map(|r| format!("{} completed but produced no output", r.agent))
                        .collect(),
                    severity: Severity::Warning,
                    fixes: Vec::new(),
                })
            }
            Persona::TheAttacker => {
                let unverifiable: Vec<&EvidenceRecord> = evidence
                    .iter()
                    .filter(|e| e.status != EvidenceStatus::Verified)
                    .collect();
                (!unverifiable.is_empty()).then(|| {
                    let severity = if unverifiable
                        .iter()
                        .any(|e| e.source.contains("security"))
                    {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    AdversarialFinding {
                        persona,
                        findings: unverifiable
                            .iter()
                            .map(|e| format!("Unverifiable surface: {}", e.source))
                            .collect(),
                        severity,
                        fixes: unverifiable
                            .iter()
                            .map(|e| format!("Re-collect evidence for {}", e.source))
                            .collect(),
                    }
                })
            }
            Persona::TheTiredDeveloper => {
                let undigested: Vec<&(AgentExecutionResult, OutputSummary)> = summaries
                    .iter()
                    .filter(|(r, s)| {
                        r.success && s.output_length > 20_000 && s.decisions.is_empty()
                    })
                    .collect();
                (!undigested.is_empty()).then(|| AdversarialFinding {
                    persona,
                    findings: undigested
                        .iter()
                        .map(|(r, s)| {
                            format!(
                                "{} emitted {} chars without a recorded decision",
                                r.agent, s.output_length
                            )
                        })
                        .collect(),
                    severity: Severity::Warning,
                    fixes: Vec::new(),
                })
            }
            Persona::TheFutureArchaeologist => {
                let unrecorded: Vec<&AgentExecutionResult> = results
                    .iter()
                    .filter(|r| r.success && r.memory_writes.is_empty())
                    .collect();
                (!unrecorded.is_empty()).then(|| AdversarialFinding {
                    persona,
                    findings: unrecorded
                        .iter()
                        .map(|r| format!("{} left no hand-off record", r.agent))
                        .collect(),
                    severity: Severity::Warning,
                    fixes: Vec::new(),
                })
            }
            Persona::TheConfusedDeveloper => {
                let decisions: usize = summaries.iter().map(|(_, s)| s.decisions.len()).sum();
                (decisions == 0 && !summaries.is_empty()).then(|| AdversarialFinding {
                    persona,
                    findings: vec!["No decisions recorded anywhere in this phase".to_string()],
                    severity: Severity::Info,
                    fixes: Vec::new(),
                })
            }
            Persona::TheFutureMaintainer => {
                let undocumented: Vec<&(AgentExecutionResult, OutputSummary)> = summaries
                    .iter()
                    .filter(|(r, s)| {
                        r.success && !s.files_created.is_empty() && s.decisions.is_empty()
                    })
                    .collect();
                (!undocumented.is_empty()).then(|| AdversarialFinding {
                    persona,
                    findings: undocumented
                        .iter()
                        .map(|(r, _)| {
                            format!("{} created files without stating the rationale", r.agent)
                        })
                        .collect(),
                    severity: Severity::Info,
                    fixes: Vec::new(),
                })
            }
            Persona::ThePerformanceTester => {
                let slow: Vec<&AgentExecutionResult> = results
                    .iter()
                    .filter(|r| r.execution_time > self.config.slow_step_threshold)
                    .collect();
                (!slow.is_empty()).then(|| AdversarialFinding {
                    persona,
                    findings: slow
                        .iter()
                        .map(|r| {
                            format!(
                                "{} took {}s",
                                r.agent,
                                r.execution_time.as_secs()
                            )
                        })
                        .collect(),
                    severity: Severity::Warning,
                    fixes: Vec::new(),
                })
            }
            Persona::TheNewHire => {
                let findings_total: usize =
                    summaries.iter().map(|(_, s)| s.key_findings.len()).sum();
                (!summaries.is_empty() && findings_total * 2 < summaries.len()).then(|| {
                    AdversarialFinding {
                        persona,
                        findings: vec![format!(
                            "Only {findings_total} key findings across {} agents; hard to follow",
                            summaries.len()
                        )],
                        severity: Severity::Info,
                        fixes: Vec::new(),
                    }
                })
            }
        }
    }

    /// Persist the case under the verbatim forensic keys.
    async fn file_case(&self, case: &CaseFile, pipeline_id: &str) {
        let stage = case.phase.stage();
        let tags = vec![pipeline_id.to_string()];
        let stores = [
            (
                forensics::case_file(stage),
                serde_json::to_value(case).unwrap_or_default(),
            ),
            (forensics::verdict(stage), json!(case.verdict.to_string())),
            (
                forensics::evidence_summary(stage),
                json!(case.evidence_summary),
            ),
            (forensics::remediation(stage), json!(case.remediations)),
            (
                forensics::ALL_VERDICTS.to_string(),
                json!({
                    "phase": case.phase.key(),
                    "verdict": case.verdict.to_string(),
                    "case_id": case.case_id,
                }),
            ),
        ];
        for (domain, content) in stores {
            if let Err(err) = self
                .coordinator
                .store_in_domain(&domain, tags.clone(), content)
                .await
            {
                warn!(%domain, error = %err, "failed to file forensic record");
            }
        }
    }

    /// Verdict quality feedback and pattern promotion. Never fatal.
    async fn feed_learning(
        &self,
        case: &CaseFile,
        pipeline_id: &str,
        validation: Option<&PhaseValidation>,
    ) {
        let quality =
            (case.verdict.quality_base() * case.confidence.multiplier()).min(1.0);

        if self.config.enable_learning {
            if let Some(learning) = self.learning.as_ref() {
                let trajectory_id =
                    format!("trajectory_coding_{pipeline_id}_sherlock-{}", case.phase.key());
                let context = json!({
                    "case_id": case.case_id,
                    "tier": case.tier.to_string(),
                    "verdict": case.verdict.to_string(),
                });
                if let Err(err) = learning
                    .create_trajectory_with_id(&trajectory_id, "forensic-review", &[], &context)
                    .await
                {
                    warn!(error = %err, "sherlock trajectory creation failed");
                }
                let options = FeedbackOptions {
                    skip_auto_save: false,
                    rlm_context: None,
                    l_score: validation.map(|v| v.l_score.composite),
                };
                if let Err(err) = learning
                    .provide_feedback(&trajectory_id, quality, options)
                    .await
                {
                    warn!(error = %err, "sherlock feedback failed");
                }
            }
        }

        if quality >= self.config.pattern_threshold {
            let pattern = json!({
                "phase": case.phase.key(),
                "verdict": case.verdict.to_string(),
                "quality": quality,
                "case_id": case.case_id,
            });
            {
                let mut patterns = self.patterns.lock().await;
                patterns.push_back(pattern.clone());
                while patterns.len() > MAX_PATTERNS_SIZE {
                    patterns.pop_front();
                }
            }
            if let Err(err) = self
                .coordinator
                .store_in_domain(
                    forensics::PATTERN_LIBRARY,
                    vec![pipeline_id.to_string()],
                    pattern,
                )
                .await
            {
                warn!(error = %err, "pattern promotion store failed");
            }
        }
    }
}
