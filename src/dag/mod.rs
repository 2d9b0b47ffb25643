//! The agent dependency graph and intra-phase scheduling.
//!
//! Two components:
//!
//! 1. **Builder** — constructs the read-only [`PipelineDag`] from agent
//!    mappings: arena nodes with index adjacency both ways, a Kahn
//!    topological order with deterministic tie-breaking, and cycle
//!    detection as a hard startup error.
//! 2. **Resolver** — orders a phase's agents by their intra-phase
//!    dependencies and packs them into parallel batches under the
//!    concurrency cap.
//!
//! The DAG is built once per run and never mutated afterwards.

mod builder;
mod resolver;

pub use builder::{DagBuilder, PipelineDag};
pub use resolver::{batch_agents_for_execution, resolve_execution_order};
