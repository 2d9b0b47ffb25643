//! The closed roster of 47 specialist agent identifiers.
//!
//! Agent identity is a closed enum rather than an open string: every map
//! keyed by agent and every scheduling decision ranges over exactly these
//! 47 variants. The canonical execution order (1..=47) both fixes the
//! roster and derives each agent's phase via [`Phase::for_order`].

use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares the roster in canonical execution order. Order values must be
/// 1..=47 with no gaps; [`AgentId::ALL`] preserves this order.
macro_rules! agent_roster {
    ($( $variant:ident => ($key:literal, $order:literal) ),+ $(,)?) => {
        /// One of the 47 specialist agents.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum AgentId {
            $( $variant, )+
        }

        impl AgentId {
            /// All agents in canonical execution order.
            pub const ALL: [AgentId; 47] = [ $( AgentId::$variant, )+ ];

            /// Stable kebab-case key (also the definition file stem).
            pub fn key(&self) -> &'static str {
                match self {
                    $( AgentId::$variant => $key, )+
                }
            }

            /// Canonical execution order slot, 1..=47.
            pub fn canonical_order(&self) -> usize {
                match self {
                    $( AgentId::$variant => $order, )+
                }
            }

            /// Parse an agent from its key.
            pub fn from_key(key: &str) -> Option<AgentId> {
                match key {
                    $( $key => Some(AgentId::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

agent_roster! {
    // Understanding (1..=6)
    RequirementsAnalyst => ("requirements-analyst", 1),
    ScopeMapper => ("scope-mapper", 2),
    ConstraintIdentifier => ("constraint-identifier", 3),
    SuccessCriteriaDefiner => ("success-criteria-definer", 4),
    ContextGatherer => ("context-gatherer", 5),
    TaskDecomposer => ("task-decomposer", 6),
    // Exploration (7..=10)
    CodebaseExplorer => ("codebase-explorer", 7),
    PatternResearcher => ("pattern-researcher", 8),
    DependencyAuditor => ("dependency-auditor", 9),
    SolutionProspector => ("solution-prospector", 10),
    // Architecture (11..=15)
    SystemDesigner => ("system-designer", 11),
    InterfaceDesigner => ("interface-designer", 12),
    DataModeler => ("data-modeler", 13),
    ConsistencyChecker => ("consistency-checker", 14),
    RiskAssessor => ("risk-assessor", 15),
    // Implementation (16..=27)
    CodeGenerator => ("code-generator", 16),
    TypeImplementer => ("type-implementer", 17),
    UnitImplementer => ("unit-implementer", 18),
    ServiceImplementer => ("service-implementer", 19),
    ApiImplementer => ("api-implementer", 20),
    IntegrationWeaver => ("integration-weaver", 21),
    ErrorHandlerImplementer => ("error-handler-implementer", 22),
    ConfigImplementer => ("config-implementer", 23),
    MigrationWriter => ("migration-writer", 24),
    RefactoringSurgeon => ("refactoring-surgeon", 25),
    DocWriter => ("doc-writer", 26),
    BuildEngineer => ("build-engineer", 27),
    // Testing (28..=34)
    TestPlanner => ("test-planner", 28),
    UnitTester => ("unit-tester", 29),
    IntegrationTester => ("integration-tester", 30),
    EdgeCaseHunter => ("edge-case-hunter", 31),
    RegressionGuard => ("regression-guard", 32),
    CoverageAuditor => ("coverage-auditor", 33),
    TestRefactorer => ("test-refactorer", 34),
    // Optimization (35..=39)
    Profiler => ("profiler", 35),
    AlgorithmOptimizer => ("algorithm-optimizer", 36),
    MemoryOptimizer => ("memory-optimizer", 37),
    QueryOptimizer => ("query-optimizer", 38),
    CacheStrategist => ("cache-strategist", 39),
    // Delivery (40..=47)
    QualityGate => ("quality-gate", 40),
    SecurityScreener => ("security-screener", 41),
    ReleaseNotesWriter => ("release-notes-writer", 42),
    ChangelogCurator => ("changelog-curator", 43),
    PackagingEngineer => ("packaging-engineer", 44),
    DeploymentPreparer => ("deployment-preparer", 45),
    SignOffApprover => ("sign-off-approver", 46),
    DeliveryCoordinator => ("delivery-coordinator", 47),
}

/// Canonical critical set: failure of any of these terminates its phase.
pub const CRITICAL_AGENTS: [AgentId; 6] = [
    AgentId::RequirementsAnalyst,
    AgentId::SystemDesigner,
    AgentId::InterfaceDesigner,
    AgentId::CodeGenerator,
    AgentId::UnitTester,
    AgentId::QualityGate,
];

impl AgentId {
    /// Phase owning this agent, derived from the canonical order.
    pub fn phase(&self) -> Phase {
        // Order slots are 1..=47, always covered by a phase range.
        Phase::for_order(self.canonical_order()).expect("canonical order within 1..=47")
    }

    /// Whether this agent is in the canonical critical set.
    pub fn in_critical_set(&self) -> bool {
        CRITICAL_AGENTS.contains(self)
    }

    /// Agents belonging to a phase, in canonical order.
    pub fn phase_roster(phase: Phase) -> Vec<AgentId> {
        AgentId::ALL
            .iter()
            .copied()
            .filter(|a| a.phase() == phase)
            .collect()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
