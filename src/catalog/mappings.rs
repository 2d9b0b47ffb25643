//! The canonical mapping table for all 47 agents.
//!
//! Each record fixes an agent's intra-phase priority, dependencies, memory
//! read/write domains, XP reward, algorithm, parallelizability and
//! criticality. The table is the source of truth when no definition files
//! are present; the loader only overlays it.

use crate::agent::AgentId;
use crate::phase::{Algorithm, Phase};
use serde::{Deserialize, Serialize};

/// Static description of one agent's place in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMapping {
    pub id: AgentId,
    pub phase: Phase,
    /// Intra-phase ordering hint; lower runs earlier.
    pub priority: u32,
    /// Agents whose outputs this one consumes. May span phases; only
    /// intra-phase edges constrain scheduling.
    pub depends_on: Vec<AgentId>,
    /// Memory domains read when gathering context.
    pub memory_reads: Vec<String>,
    /// Memory domains written; the first is the step-output domain.
    pub memory_writes: Vec<String>,
    /// Extra tags attached to stored step outputs.
    pub output_tags: Vec<String>,
    /// Tags any of which must match when retrieving previous output.
    pub input_tags: Vec<String>,
    pub xp_reward: u32,
    pub algorithm: Algorithm,
    pub parallelizable: bool,
    pub critical: bool,
    pub description: String,
}

impl AgentMapping {
    /// The domain this agent's step output is stored under.
    pub fn output_domain(&self) -> Option<&str> {
        self.memory_writes.first().map(|s| s.as_str())
    }

    /// Deterministic fallback used when the primary algorithm stalls.
    pub fn fallback_algorithm(&self) -> Algorithm {
        self.algorithm.fallback()
    }

    /// The primary domain previous output is retrieved from.
    pub fn input_domain(&self) -> Option<&str> {
        self.memory_reads.first().map(|s| s.as_str())
    }

    /// Dependencies restricted to this agent's own phase.
    pub fn intra_phase_deps(&self) -> Vec<AgentId> {
        self.depends_on
            .iter()
            .copied()
            .filter(|d| d.phase() == self.phase)
            .collect()
    }
}

/// Write domain for an agent output slug within a phase.
fn domain(phase: Phase, slug: &str) -> String {
    format!("coding/{}/{}", phase.key(), slug)
}

fn entry(
    id: AgentId,
    priority: u32,
    depends_on: &[AgentId],
    reads: &[&str],
    write_slug: &str,
    xp_reward: u32,
    parallelizable: bool,
    description: &str,
) -> AgentMapping {
    let phase = id.phase();
    AgentMapping {
        id,
        phase,
        priority,
        depends_on: depends_on.to_vec(),
        memory_reads: reads.iter().map(|s| s.to_string()).collect(),
        memory_writes: vec![domain(phase, write_slug)],
        output_tags: vec![id.key().to_string()],
        input_tags: Vec::new(),
        xp_reward,
        algorithm: phase.default_algorithm(),
        parallelizable,
        critical: id.in_critical_set(),
        description: description.to_string(),
    }
}

/// Build the full canonical table, in canonical order.
pub fn builtin_mappings() -> Vec<AgentMapping> {
    use AgentId::*;

    let understanding = |s: &str| domain(Phase::Understanding, s);
    let exploration = |s: &str| domain(Phase::Exploration, s);
    let architecture = |s: &str| domain(Phase::Architecture, s);
    let implementation = |s: &str| domain(Phase::Implementation, s);
    let testing = |s: &str| domain(Phase::Testing, s);
    let optimization = |s: &str| domain(Phase::Optimization, s);
    let delivery = |s: &str| domain(Phase::Delivery, s);

    vec![
        // Understanding
        entry(
            RequirementsAnalyst,
            1,
            &[],
            &[],
            "requirements",
            50,
            false,
            "Extract explicit and implicit requirements from the task description",
        ),
        entry(
            ScopeMapper,
            2,
            &[RequirementsAnalyst],
            &[&understanding("requirements")],
            "scope",
            45,
            true,
            "Map the in/out-of-scope boundary of the requested change",
        ),
        entry(
            ConstraintIdentifier,
            3,
            &[RequirementsAnalyst],
            &[&understanding("requirements")],
            "constraints",
            40,
            true,
            "Identify technical and organizational constraints on the solution",
        ),
        entry(
            SuccessCriteriaDefiner,
            4,
            &[RequirementsAnalyst, ScopeMapper],
            &[&understanding("requirements"), &understanding("scope")],
            "success-criteria",
            45,
            true,
            "Define measurable acceptance criteria for the task",
        ),
        entry(
            ContextGatherer,
            5,
            &[RequirementsAnalyst],
            &[&understanding("requirements")],
            "context",
            45,
            true,
            "Collect surrounding project context relevant to the task",
        ),
        entry(
            TaskDecomposer,
            6,
            &[ScopeMapper, ConstraintIdentifier, SuccessCriteriaDefiner],
            &[
                &understanding("scope"),
                &understanding("constraints"),
                &understanding("success-criteria"),
            ],
            "task-breakdown",
            50,
            false,
            "Decompose the task into ordered, independently checkable units",
        ),
        // Exploration
        entry(
            CodebaseExplorer,
            1,
            &[],
            &[&understanding("task-breakdown")],
            "codebase-map",
            55,
            true,
            "Survey the codebase regions the task will touch",
        ),
        entry(
            PatternResearcher,
            2,
            &[],
            &[&understanding("task-breakdown")],
            "patterns",
            50,
            true,
            "Research applicable design patterns and prior art",
        ),
        entry(
            DependencyAuditor,
            3,
            &[],
            &[&understanding("constraints")],
            "dependencies",
            45,
            true,
            "Audit third-party dependencies for fit, licensing and risk",
        ),
        entry(
            SolutionProspector,
            4,
            &[CodebaseExplorer, PatternResearcher],
            &[&exploration("codebase-map"), &exploration("patterns")],
            "solution-candidates",
            60,
            false,
            "Shortlist candidate solution approaches with trade-offs",
        ),
        // Architecture
        entry(
            SystemDesigner,
            1,
            &[],
            &[
                &exploration("solution-candidates"),
                &exploration("codebase-map"),
            ],
            "system-design",
            70,
            false,
            "Produce the high-level system design for the chosen approach",
        ),
        entry(
            InterfaceDesigner,
            2,
            &[SystemDesigner],
            &[&architecture("system-design")],
            "interfaces",
            60,
            true,
            "Design module interfaces and public contracts",
        ),
        entry(
            DataModeler,
            3,
            &[SystemDesigner],
            &[&architecture("system-design")],
            "data-model",
            60,
            true,
            "Model the data structures and their ownership",
        ),
        entry(
            ConsistencyChecker,
            4,
            &[InterfaceDesigner, DataModeler],
            &[&architecture("interfaces"), &architecture("data-model")],
            "consistency-report",
            50,
            true,
            "Cross-check interfaces and data model for contradictions",
        ),
        entry(
            RiskAssessor,
            5,
            &[SystemDesigner],
            &[&architecture("system-design")],
            "risk-register",
            45,
            true,
            "Assess delivery and correctness risks in the design",
        ),
        // Implementation
        entry(
            CodeGenerator,
            1,
            &[],
            &[&architecture("system-design"), &architecture("interfaces")],
            "core-code",
            80,
            false,
            "Generate the core implementation skeleton from the design",
        ),
        entry(
            TypeImplementer,
            2,
            &[CodeGenerator],
            &[&implementation("core-code"), &architecture("data-model")],
            "types",
            60,
            true,
            "Implement the domain types and their invariants",
        ),
        entry(
            UnitImplementer,
            3,
            &[TypeImplementer],
            &[&implementation("types")],
            "units",
            60,
            true,
            "Implement the pure units of business logic",
        ),
        entry(
            ServiceImplementer,
            4,
            &[TypeImplementer],
            &[&implementation("types")],
            "services",
            65,
            true,
            "Implement stateful services over the domain types",
        ),
        entry(
            ApiImplementer,
            5,
            &[ServiceImplementer],
            &[&implementation("services"), &architecture("interfaces")],
            "api",
            60,
            true,
            "Implement the public API surface",
        ),
        entry(
            IntegrationWeaver,
            6,
            &[UnitImplementer, ServiceImplementer],
            &[&implementation("units"), &implementation("services")],
            "integration",
            55,
            true,
            "Wire units and services into the existing codebase",
        ),
        entry(
            ErrorHandlerImplementer,
            7,
            &[CodeGenerator],
            &[&implementation("core-code")],
            "error-handling",
            50,
            true,
            "Implement the error taxonomy and propagation paths",
        ),
        entry(
            ConfigImplementer,
            8,
            &[CodeGenerator],
            &[&implementation("core-code")],
            "config",
            45,
            true,
            "Implement configuration surfaces and defaults",
        ),
        entry(
            MigrationWriter,
            9,
            &[ServiceImplementer],
            &[&implementation("services"), &architecture("data-model")],
            "migrations",
            45,
            true,
            "Write data and interface migrations required by the change",
        ),
        entry(
            RefactoringSurgeon,
            10,
            &[IntegrationWeaver],
            &[&implementation("integration")],
            "refactors",
            50,
            true,
            "Clean up seams exposed while integrating the change",
        ),
        entry(
            DocWriter,
            11,
            &[ApiImplementer],
            &[&implementation("api")],
            "docs",
            40,
            true,
            "Document the new public surface",
        ),
        entry(
            BuildEngineer,
            12,
            &[IntegrationWeaver],
            &[&implementation("integration")],
            "build",
            55,
            false,
            "Keep the build green: manifests, feature flags, CI wiring",
        ),
        // Testing
        entry(
            TestPlanner,
            1,
            &[],
            &[
                &understanding("success-criteria"),
                &implementation("integration"),
            ],
            "test-plan",
            50,
            false,
            "Plan the test matrix against the acceptance criteria",
        ),
        entry(
            UnitTester,
            2,
            &[TestPlanner],
            &[&testing("test-plan"), &implementation("units")],
            "unit-tests",
            60,
            true,
            "Write unit tests for the implemented logic",
        ),
        entry(
            IntegrationTester,
            3,
            &[TestPlanner],
            &[&testing("test-plan"), &implementation("integration")],
            "integration-tests",
            60,
            true,
            "Write integration tests across module seams",
        ),
        entry(
            EdgeCaseHunter,
            4,
            &[TestPlanner],
            &[&testing("test-plan")],
            "edge-cases",
            55,
            true,
            "Hunt boundary conditions and adversarial inputs",
        ),
        entry(
            RegressionGuard,
            5,
            &[UnitTester, IntegrationTester],
            &[&testing("unit-tests"), &testing("integration-tests")],
            "regression-suite",
            50,
            true,
            "Assemble the regression suite from new and existing tests",
        ),
        entry(
            CoverageAuditor,
            6,
            &[UnitTester, IntegrationTester],
            &[&testing("unit-tests"), &testing("integration-tests")],
            "coverage-report",
            45,
            true,
            "Audit coverage against the test plan",
        ),
        entry(
            TestRefactorer,
            7,
            &[RegressionGuard, CoverageAuditor],
            &[&testing("regression-suite"), &testing("coverage-report")],
            "test-cleanup",
            40,
            true,
            "Deduplicate and stabilize the test suite",
        ),
        // Optimization
        entry(
            Profiler,
            1,
            &[],
            &[&implementation("integration"), &testing("regression-suite")],
            "profile",
            55,
            false,
            "Profile hot paths under representative load",
        ),
        entry(
            AlgorithmOptimizer,
            2,
            &[Profiler],
            &[&optimization("profile")],
            "algorithms",
            65,
            true,
            "Replace hot algorithms with better-complexity equivalents",
        ),
        entry(
            MemoryOptimizer,
            3,
            &[Profiler],
            &[&optimization("profile")],
            "memory",
            60,
            true,
            "Reduce allocations and peak memory on hot paths",
        ),
        entry(
            QueryOptimizer,
            4,
            &[Profiler],
            &[&optimization("profile")],
            "queries",
            55,
            true,
            "Optimize storage access patterns surfaced by the profile",
        ),
        entry(
            CacheStrategist,
            5,
            &[AlgorithmOptimizer],
            &[&optimization("algorithms")],
            "caching",
            50,
            true,
            "Introduce caching where the profile justifies it",
        ),
        // Delivery
        entry(
            QualityGate,
            1,
            &[],
            &[&testing("coverage-report"), &optimization("profile")],
            "quality-report",
            60,
            false,
            "Run the final quality bar across all phase outputs",
        ),
        entry(
            SecurityScreener,
            2,
            &[],
            &[&implementation("integration")],
            "security-screen",
            60,
            true,
            "Screen the delivered change for security regressions",
        ),
        entry(
            ReleaseNotesWriter,
            3,
            &[QualityGate],
            &[&delivery("quality-report")],
            "release-notes",
            40,
            true,
            "Draft release notes for the change",
        ),
        entry(
            ChangelogCurator,
            4,
            &[QualityGate],
            &[&delivery("quality-report")],
            "changelog",
            35,
            true,
            "Curate the changelog entries",
        ),
        entry(
            PackagingEngineer,
            5,
            &[QualityGate, SecurityScreener],
            &[&delivery("quality-report"), &delivery("security-screen")],
            "package",
            50,
            true,
            "Produce the distributable artifacts",
        ),
        entry(
            DeploymentPreparer,
            6,
            &[PackagingEngineer],
            &[&delivery("package")],
            "deployment-plan",
            50,
            true,
            "Prepare the rollout and rollback plan",
        ),
        entry(
            SignOffApprover,
            7,
            &[QualityGate, SecurityScreener],
            &[&delivery("quality-report"), &delivery("security-screen")],
            "sign-off",
            45,
            true,
            "Record the final sign-off decision",
        ),
        entry(
            DeliveryCoordinator,
            8,
            &[SignOffApprover, DeploymentPreparer],
            &[&delivery("sign-off"), &delivery("deployment-plan")],
            "handoff",
            55,
            false,
            "Hand the reviewed change back to the requester",
        ),
    ]
}

/// The canonical mappings for one phase, in priority order.
pub fn mappings_for_phase(phase: Phase) -> Vec<AgentMapping> {
    builtin_mappings()
        .into_iter()
        .filter(|m| m.phase == phase)
        .collect()
}
