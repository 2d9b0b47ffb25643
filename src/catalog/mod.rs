//! The agent catalog: the static 47-agent mapping table and the
//! file-driven loader that overlays agent definition files onto it.
//!
//! The canonical roster lives in code ([`mappings::builtin_mappings`]); the
//! loader ([`loader::CatalogLoader`]) reads a directory of markdown
//! definitions with YAML front matter, merges header overrides (algorithm,
//! criticality, description), captures instruction bodies, and reports the
//! validation deficit set without aborting on individual bad files.

mod loader;
mod mappings;

pub use loader::{AgentHeader, CatalogIssue, CatalogLoader, CatalogResult};
pub use mappings::{AgentMapping, builtin_mappings, mappings_for_phase};
