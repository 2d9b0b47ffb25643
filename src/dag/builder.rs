//! DAG construction from agent mappings.
//!
//! Nodes live in a contiguous arena indexed by position; both adjacency
//! directions are `Vec<Vec<usize>>` so neither side owns the other. The
//! global topological order comes from Kahn's algorithm with ties broken by
//! `(priority ascending, key ascending)` for run-to-run determinism.

use crate::agent::AgentId;
use crate::catalog::AgentMapping;
use crate::errors::DagError;
use crate::phase::Phase;
use std::collections::{BTreeMap, HashMap};

/// The number of agents a full-catalog DAG must cover.
pub const EXPECTED_AGENT_COUNT: usize = 47;

/// Read-only dependency graph over the agent roster.
#[derive(Debug)]
pub struct PipelineDag {
    mappings: Vec<AgentMapping>,
    index: HashMap<AgentId, usize>,
    /// For each node, indices of the agents it depends on.
    depends_on: Vec<Vec<usize>>,
    /// For each node, indices of the agents depending on it.
    dependents: Vec<Vec<usize>>,
    topo_order: Vec<AgentId>,
    by_phase: BTreeMap<Phase, Vec<AgentId>>,
}

impl PipelineDag {
    /// Build from the full catalog, enforcing the 47-agent invariant.
    pub fn from_catalog(mappings: Vec<AgentMapping>) -> Result<Self, DagError> {
        let dag = DagBuilder::new(mappings).build()?;
        if dag.len() != EXPECTED_AGENT_COUNT {
            return Err(DagError::IncompleteCatalog {
                expected: EXPECTED_AGENT_COUNT,
                actual: dag.len(),
            });
        }
        Ok(dag)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn mappings(&self) -> &[AgentMapping] {
        &self.mappings
    }

    /// Mapping for an agent, if present in this graph.
    pub fn mapping(&self, agent: AgentId) -> Option<&AgentMapping> {
        self.index.get(&agent).map(|&i| &self.mappings[i])
    }

    /// Global topological order (deterministic).
    pub fn topological_order(&self) -> &[AgentId] {
        &self.topo_order
    }

    /// Agents of a phase ordered by `(priority, key)`.
    pub fn agents_by_phase(&self, phase: Phase) -> &[AgentId] {
        self.by_phase.get(&phase).map_or(&[], |v| v.as_slice())
    }

    /// All critical agents in the graph.
    pub fn critical_agents(&self) -> Vec<AgentId> {
        self.mappings
            .iter()
            .filter(|m| m.critical)
            .map(|m| m.id)
            .collect()
    }

    /// Parallelizable agents of a phase.
    pub fn parallelizable_agents_by_phase(&self, phase: Phase) -> Vec<AgentId> {
        self.agents_by_phase(phase)
            .iter()
            .copied()
            .filter(|a| self.mapping(*a).is_some_and(|m| m.parallelizable))
            .collect()
    }

    /// The dependency-respecting execution order for a phase.
    pub fn phase_execution_order(&self, phase: Phase) -> Vec<AgentId> {
        super::resolver::resolve_execution_order(self, self.agents_by_phase(phase))
    }

    /// Agents this agent depends on.
    pub fn dependencies(&self, agent: AgentId) -> Vec<AgentId> {
        self.index
            .get(&agent)
            .map(|&i| {
                self.depends_on[i]
                    .iter()
                    .map(|&d| self.mappings[d].id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Agents depending on this agent.
    pub fn dependents_of(&self, agent: AgentId) -> Vec<AgentId> {
        self.index
            .get(&agent)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&d| self.mappings[d].id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builder validating structure before handing out a [`PipelineDag`].
pub struct DagBuilder {
    mappings: Vec<AgentMapping>,
}

impl DagBuilder {
    pub fn new(mappings: Vec<AgentMapping>) -> Self {
        Self { mappings }
    }

    /// Build and validate: every dependency must name a mapped agent and
    /// the graph must be acyclic.
    pub fn build(self) -> Result<PipelineDag, DagError> {
        let mut index = HashMap::new();
        for (i, mapping) in self.mappings.iter().enumerate() {
            if index.insert(mapping.id, i).is_some() {
                return Err(DagError::DuplicateAgent {
                    agent: mapping.id.key().to_string(),
                });
            }
        }

        let n = self.mappings.len();
        let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (to, mapping) in self.mappings.iter().enumerate() {
            for dep in &mapping.depends_on {
                let from = *index.get(dep).ok_or_else(|| DagError::UnknownDependency {
                    agent: mapping.id.key().to_string(),
                    dependency: dep.key().to_string(),
                })?;
                depends_on[to].push(from);
                dependents[from].push(to);
            }
        }

        let topo_order = kahn_order(&self.mappings, &depends_on, &dependents)?;

        let mut by_phase: BTreeMap<Phase, Vec<AgentId>> = BTreeMap::new();
        let mut phase_sorted: Vec<&AgentMapping> = self.mappings.iter().collect();
        phase_sorted.sort_by(|a, b| {
            a.phase
                .cmp(&b.phase)
                .then(a.priority.cmp(&b.priority))
                .then(a.id.key().cmp(b.id.key()))
        });
        for mapping in phase_sorted {
            by_phase.entry(mapping.phase).or_default().push(mapping.id);
        }

        Ok(PipelineDag {
            mappings: self.mappings,
            index,
            depends_on,
            dependents,
            topo_order,
            by_phase,
        })
    }
}

/// Kahn's algorithm; the ready set is drained in `(priority, key)` order.
/// A shortfall in the processed count means a cycle and is a hard error
/// naming the agents still blocked.
fn kahn_order(
    mappings: &[AgentMapping],
    depends_on: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<AgentId>, DagError> {
    let n = mappings.len();
    let mut in_degree: Vec<usize> = depends_on.iter().map(|d| d.len()).collect();
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !ready.is_empty() {
        // Deterministic pop: lowest (priority, key) first.
        let pos = ready
            .iter()
            .enumerate()
            .min_by_key(|&(_, &i)| (mappings[i].priority, mappings[i].id.key()))
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let node = ready.swap_remove(pos);
        order.push(mappings[node].id);

        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != n {
        let blocked: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg > 0)
            .map(|(i, _)| mappings[i].id.key().to_string())
            .collect();
        return Err(DagError::CycleDetected { agents: blocked });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Algorithm;

    fn mapping(id: AgentId, priority: u32, deps: Vec<AgentId>) -> AgentMapping {
        AgentMapping {
            id,
            phase: id.phase(),
            priority,
            depends_on: deps,
            memory_reads: Vec::new(),
            memory_writes: vec![format!("coding/{}/{}", id.phase().key(), id.key())],
            output_tags: Vec::new(),
            input_tags: Vec::new(),
            xp_reward: 10,
            algorithm: Algorithm::ReAct,
            parallelizable: true,
            critical: false,
            description: String::new(),
        }
    }

    #[test]
    fn test_build_simple_graph() {
        let dag = DagBuilder::new(vec![
            mapping(AgentId::RequirementsAnalyst, 1, vec![]),
            mapping(AgentId::ScopeMapper, 2, vec![AgentId::RequirementsAnalyst]),
            mapping(
                AgentId::ConstraintIdentifier,
                3,
                vec![AgentId::RequirementsAnalyst],
            ),
        ])
        .build()
        .unwrap();

        assert_eq!(dag.len(), 3);
        assert_eq!(dag.topological_order()[0], AgentId::RequirementsAnalyst);
        assert_eq!(
            dag.dependencies(AgentId::ScopeMapper),
            vec![AgentId::RequirementsAnalyst]
        );
        let dependents = dag.dependents_of(AgentId::RequirementsAnalyst);
        assert!(dependents.contains(&AgentId::ScopeMapper));
        assert!(dependents.contains(&AgentId::ConstraintIdentifier));
    }

    #[test]
    fn test_tie_break_by_priority_then_key() {
        // Same priority: key order decides; different priorities: lower first.
        let dag = DagBuilder::new(vec![
            mapping(AgentId::ScopeMapper, 2, vec![]),
            mapping(AgentId::ContextGatherer, 1, vec![]),
            mapping(AgentId::ConstraintIdentifier, 1, vec![]),
        ])
        .build()
        .unwrap();

        // "constraint-identifier" < "context-gatherer" lexically.
        assert_eq!(
            dag.topological_order(),
            &[
                AgentId::ConstraintIdentifier,
                AgentId::ContextGatherer,
                AgentId::ScopeMapper
            ]
        );
    }

    #[test]
    fn test_cycle_is_hard_error_naming_agents() {
        let err = DagBuilder::new(vec![
            mapping(AgentId::ScopeMapper, 1, vec![AgentId::ContextGatherer]),
            mapping(AgentId::ContextGatherer, 2, vec![AgentId::ScopeMapper]),
        ])
        .build()
        .unwrap_err();

        match err {
            DagError::CycleDetected { agents } => {
                assert!(agents.contains(&"scope-mapper".to_string()));
                assert!(agents.contains(&"context-gatherer".to_string()));
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = DagBuilder::new(vec![mapping(
            AgentId::ScopeMapper,
            1,
            vec![AgentId::RequirementsAnalyst],
        )])
        .build()
        .unwrap_err();
        assert!(matches!(err, DagError::UnknownDependency { .. }));
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let err = DagBuilder::new(vec![
            mapping(AgentId::ScopeMapper, 1, vec![]),
            mapping(AgentId::ScopeMapper, 2, vec![]),
        ])
        .build()
        .unwrap_err();
        assert!(matches!(err, DagError::DuplicateAgent { .. }));
    }

    #[test]
    fn test_from_catalog_rejects_partial_roster() {
        let err = PipelineDag::from_catalog(vec![mapping(AgentId::ScopeMapper, 1, vec![])])
            .unwrap_err();
        assert!(matches!(
            err,
            DagError::IncompleteCatalog {
                expected: 47,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_empty_graph_builds() {
        let dag = DagBuilder::new(vec![]).build().unwrap();
        assert!(dag.is_empty());
        assert!(dag.topological_order().is_empty());
    }
}
