//! Intra-phase ordering and parallel batching.
//!
//! Cross-phase dependencies are presumed satisfied (earlier phases have
//! already completed), so only edges between agents of the same phase
//! constrain the order and the batches.

use crate::agent::AgentId;
use crate::dag::PipelineDag;
use std::collections::HashSet;

/// Produce a dependency-respecting order for a phase's agents.
///
/// DFS-based topological sort where visitation is driven by the agents
/// sorted ascending by `(priority, key)`; each agent's intra-phase
/// dependencies are emitted before it.
pub fn resolve_execution_order(dag: &PipelineDag, agents: &[AgentId]) -> Vec<AgentId> {
    let in_phase: HashSet<AgentId> = agents.iter().copied().collect();

    let mut roots: Vec<AgentId> = agents.to_vec();
    roots.sort_by_key(|a| {
        (
            dag.mapping(*a).map(|m| m.priority).unwrap_or(u32::MAX),
            a.key(),
        )
    });

    let mut visited: HashSet<AgentId> = HashSet::new();
    let mut order = Vec::with_capacity(agents.len());

    fn visit(
        agent: AgentId,
        dag: &PipelineDag,
        in_phase: &HashSet<AgentId>,
        visited: &mut HashSet<AgentId>,
        order: &mut Vec<AgentId>,
    ) {
        if !visited.insert(agent) {
            return;
        }
        if let Some(mapping) = dag.mapping(agent) {
            let mut deps: Vec<AgentId> = mapping
                .depends_on
                .iter()
                .copied()
                .filter(|d| in_phase.contains(d))
                .collect();
            deps.sort_by_key(|d| {
                (
                    dag.mapping(*d).map(|m| m.priority).unwrap_or(u32::MAX),
                    d.key(),
                )
            });
            for dep in deps {
                visit(dep, dag, in_phase, visited, order);
            }
        }
        order.push(agent);
    }

    for agent in roots {
        visit(agent, dag, &in_phase, &mut visited, &mut order);
    }

    order
}

/// Pack an ordered phase roster into execution batches.
///
/// Sequential mode (`enable_parallel = false`) puts one agent per batch.
/// Parallel mode scans the remaining agents in order and admits an agent
/// to the current batch when all of its intra-phase dependencies have
/// already executed (in a *prior* batch), it is parallelizable, and the
/// batch is below `max_parallel`. A non-parallelizable agent with
/// satisfied dependencies is admitted only to an empty batch, which then
/// closes immediately. If a scan admits nothing, the first remaining agent
/// runs alone so the phase always makes progress.
pub fn batch_agents_for_execution(
    dag: &PipelineDag,
    ordered: &[AgentId],
    enable_parallel: bool,
    max_parallel: usize,
) -> Vec<Vec<AgentId>> {
    if !enable_parallel {
        return ordered.iter().map(|a| vec![*a]).collect();
    }

    let max_parallel = max_parallel.max(1);
    let in_phase: HashSet<AgentId> = ordered.iter().copied().collect();
    let mut remaining: Vec<AgentId> = ordered.to_vec();
    let mut executed: HashSet<AgentId> = HashSet::new();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let mut batch: Vec<AgentId> = Vec::new();

        for agent in remaining.iter().copied() {
            let Some(mapping) = dag.mapping(agent) else {
                continue;
            };
            let deps_satisfied = mapping
                .depends_on
                .iter()
                .filter(|d| in_phase.contains(d))
                .all(|d| executed.contains(d));
            if !deps_satisfied {
                continue;
            }

            if mapping.parallelizable {
                if batch.len() < max_parallel {
                    batch.push(agent);
                }
            } else if batch.is_empty() {
                // Exclusive batch: close right away.
                batch.push(agent);
                break;
            }

            if batch.len() == max_parallel {
                break;
            }
        }

        if batch.is_empty() {
            // Progress guarantee: run the head alone.
            batch.push(remaining[0]);
        }

        remaining.retain(|a| !batch.contains(a));
        executed.extend(batch.iter().copied());
        batches.push(batch);
    }

    batches
}
