//! Per-phase review protocols.
//!
//! A protocol fixes what the reviewer looks at for a phase: the evidence
//! source domains (the phase agents' write domains), the verification
//! matrix for each investigation tier, the adversarial personas assigned
//! to the phase, and the phase's verdict criteria strings.

use crate::catalog::AgentMapping;
use crate::phase::Phase;
use crate::sherlock::{InvestigationTier, Persona, VerificationCheck};

/// The review protocol for one phase.
#[derive(Debug, Clone)]
pub struct SherlockProtocol {
    pub phase: Phase,
    pub evidence_sources: Vec<String>,
    pub personas: Vec<Persona>,
    pub verdict_criteria: Vec<String>,
}

impl SherlockProtocol {
    /// Build the protocol for a phase from its agent mappings.
    pub fn for_phase(phase: Phase, mappings: &[AgentMapping]) -> Self {
        let evidence_sources = mappings
            .iter()
            .filter(|m| m.phase == phase)
            .filter_map(|m| m.output_domain().map(str::to_string))
            .collect();

        Self {
            phase,
            evidence_sources,
            personas: personas_for(phase),
            verdict_criteria: criteria_for(phase),
        }
    }

    /// The verification matrix at a given tier. Deeper tiers run strictly
    /// more checks; L-Score component checks only apply from
    /// INVESTIGATION up and are skipped when no score is available.
    pub fn verification_matrix(&self, tier: InvestigationTier) -> Vec<VerificationCheck> {
        let mut matrix = vec![
            VerificationCheck {
                name: "evidence-completeness".to_string(),
                method: "verified evidence sources / total sources".to_string(),
                threshold: 0.8,
            },
            VerificationCheck {
                name: "agent-success-rate".to_string(),
                method: "successful agents / phase agents".to_string(),
                threshold: 0.9,
            },
        ];

        if tier >= InvestigationTier::Scan {
            matrix.push(VerificationCheck {
                name: "output-quality".to_string(),
                method: "mean step quality".to_string(),
                threshold: 0.6,
            });
            matrix.push(VerificationCheck {
                name: "critical-agent-integrity".to_string(),
                method: "critical agents completed / critical agents".to_string(),
                threshold: 1.0,
            });
        }

        if tier >= InvestigationTier::Investigation {
            matrix.push(VerificationCheck {
                name: "lscore-accuracy".to_string(),
                method: "L-Score accuracy component".to_string(),
                threshold: 0.7,
            });
            matrix.push(VerificationCheck {
                name: "lscore-completeness".to_string(),
                method: "L-Score completeness component".to_string(),
                threshold: 0.7,
            });
        }

        if tier >= InvestigationTier::DeepDive {
            matrix.push(VerificationCheck {
                name: "lscore-security".to_string(),
                method: "L-Score security component".to_string(),
                threshold: 0.7,
            });
            matrix.push(VerificationCheck {
                name: "output-substance".to_string(),
                method: "non-empty outputs / successful agents".to_string(),
                threshold: 1.0,
            });
        }

        matrix
    }
}

/// THE_BUG reviews every phase (failures are never out of scope); the
/// rest of the panel varies with what the phase produces.
fn personas_for(phase: Phase) -> Vec<Persona> {
    match phase {
        Phase::Understanding => vec![
            Persona::TheBug,
            Persona::TheConfusedDeveloper,
            Persona::TheNewHire,
        ],
        Phase::Exploration => vec![
            Persona::TheBug,
            Persona::TheFutureArchaeologist,
            Persona::TheNewHire,
        ],
        Phase::Architecture => vec![
            Persona::TheBug,
            Persona::TheFutureMaintainer,
            Persona::TheConfusedDeveloper,
        ],
        Phase::Implementation => vec![
            Persona::TheBug,
            Persona::TheAttacker,
            Persona::TheTiredDeveloper,
        ],
        Phase::Testing => vec![Persona::TheBug, Persona::TheTiredDeveloper],
        Phase::Optimization => vec![Persona::TheBug, Persona::ThePerformanceTester],
        Phase::Delivery => vec![
            Persona::TheBug,
            Persona::TheAttacker,
            Persona::TheFutureMaintainer,
            Persona::TheNewHire,
        ],
    }
}

fn criteria_for(phase: Phase) -> Vec<String> {
    let mut criteria = vec![
        "All phase agents completed with stored evidence".to_string(),
        "No critical adversarial findings".to_string(),
    ];
    match phase {
        Phase::Understanding => {
            criteria.push("Requirements and acceptance criteria are on record".to_string());
        }
        Phase::Exploration => {
            criteria.push("Solution candidates trace back to the codebase map".to_string());
        }
        Phase::Architecture => {
            criteria.push("Interfaces and data model are mutually consistent".to_string());
        }
        Phase::Implementation => {
            criteria.push("Generated code integrates without critical failures".to_string());
        }
        Phase::Testing => {
            criteria.push("The regression suite covers the test plan".to_string());
        }
        Phase::Optimization => {
            criteria.push("Optimizations are justified by the recorded profile".to_string());
        }
        Phase::Delivery => {
            criteria.push("Quality bar and security screen both signed off".to_string());
        }
    }
    criteria
}
