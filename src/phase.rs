//! The seven-stage phase model for the coding pipeline.
//!
//! Every coding task moves through the same fixed sequence:
//! understanding → exploration → architecture → implementation → testing →
//! optimization → delivery. The sequence is immutable at runtime; the
//! canonical execution order (1..=47) of the agent roster determines which
//! phase an agent belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// One of the seven fixed pipeline stages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Understanding,
    Exploration,
    Architecture,
    Implementation,
    Testing,
    Optimization,
    Delivery,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 7] = [
        Phase::Understanding,
        Phase::Exploration,
        Phase::Architecture,
        Phase::Implementation,
        Phase::Testing,
        Phase::Optimization,
        Phase::Delivery,
    ];

    /// Stage number, 1-based.
    pub fn stage(&self) -> u8 {
        match self {
            Phase::Understanding => 1,
            Phase::Exploration => 2,
            Phase::Architecture => 3,
            Phase::Implementation => 4,
            Phase::Testing => 5,
            Phase::Optimization => 6,
            Phase::Delivery => 7,
        }
    }

    /// Stable lowercase key used in memory domains and config files.
    pub fn key(&self) -> &'static str {
        match self {
            Phase::Understanding => "understanding",
            Phase::Exploration => "exploration",
            Phase::Architecture => "architecture",
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
            Phase::Optimization => "optimization",
            Phase::Delivery => "delivery",
        }
    }

    /// Parse a phase from its lowercase key.
    pub fn from_key(key: &str) -> Option<Phase> {
        Phase::ALL.iter().copied().find(|p| p.key() == key)
    }

    /// The slice of the canonical 1..=47 execution order owned by this phase.
    ///
    /// Boundaries are fixed: 1..6 understanding; 7..10 exploration; 11..15
    /// architecture; 16..27 implementation; 28..34 testing; 35..39
    /// optimization; 40..47 delivery.
    pub fn order_range(&self) -> RangeInclusive<usize> {
        match self {
            Phase::Understanding => 1..=6,
            Phase::Exploration => 7..=10,
            Phase::Architecture => 11..=15,
            Phase::Implementation => 16..=27,
            Phase::Testing => 28..=34,
            Phase::Optimization => 35..=39,
            Phase::Delivery => 40..=47,
        }
    }

    /// Derive the phase owning a canonical execution order slot.
    pub fn for_order(order: usize) -> Option<Phase> {
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.order_range().contains(&order))
    }

    /// The phase following this one, if any.
    pub fn next(&self) -> Option<Phase> {
        let idx = Phase::ALL.iter().position(|p| p == self)?;
        Phase::ALL.get(idx + 1).copied()
    }

    /// Reasoning algorithm agents in this phase use unless their definition
    /// overrides it.
    pub fn default_algorithm(&self) -> Algorithm {
        match self {
            Phase::Understanding => Algorithm::Lats,
            Phase::Exploration => Algorithm::ReAct,
            Phase::Architecture => Algorithm::TreeOfThoughts,
            Phase::Implementation => Algorithm::SelfDebug,
            Phase::Testing => Algorithm::ProgramOfThoughts,
            Phase::Optimization => Algorithm::Reflexion,
            Phase::Delivery => Algorithm::ReAct,
        }
    }

    /// Task-type label used when matching learned patterns.
    pub fn task_type(&self) -> &'static str {
        match self {
            Phase::Understanding => "analysis",
            Phase::Exploration => "research",
            Phase::Architecture => "design",
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
            Phase::Optimization => "optimization",
            Phase::Delivery => "release",
        }
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Understanding => "Understanding",
            Phase::Exploration => "Exploration",
            Phase::Architecture => "Architecture",
            Phase::Implementation => "Implementation",
            Phase::Testing => "Testing",
            Phase::Optimization => "Optimization",
            Phase::Delivery => "Delivery",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Closed set of reasoning algorithms an agent can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    Lats,
    ReAct,
    SelfDebug,
    Reflexion,
    ProgramOfThoughts,
    TreeOfThoughts,
}

impl Algorithm {
    /// Stable key as written in agent definition headers.
    pub fn key(&self) -> &'static str {
        match self {
            Algorithm::Lats => "LATS",
            Algorithm::ReAct => "ReAct",
            Algorithm::SelfDebug => "Self-Debug",
            Algorithm::Reflexion => "Reflexion",
            Algorithm::ProgramOfThoughts => "PoT",
            Algorithm::TreeOfThoughts => "ToT",
        }
    }

    /// Parse from the header spelling.
    pub fn from_key(key: &str) -> Option<Algorithm> {
        match key {
            "LATS" => Some(Algorithm::Lats),
            "ReAct" => Some(Algorithm::ReAct),
            "Self-Debug" => Some(Algorithm::SelfDebug),
            "Reflexion" => Some(Algorithm::Reflexion),
            "PoT" => Some(Algorithm::ProgramOfThoughts),
            "ToT" => Some(Algorithm::TreeOfThoughts),
            _ => None,
        }
    }

    /// Deterministic fallback used when the primary algorithm is unavailable
    /// for a step.
    pub fn fallback(&self) -> Algorithm {
        match self {
            Algorithm::Lats => Algorithm::TreeOfThoughts,
            Algorithm::ReAct => Algorithm::Reflexion,
            Algorithm::SelfDebug => Algorithm::ReAct,
            Algorithm::Reflexion => Algorithm::ReAct,
            Algorithm::ProgramOfThoughts => Algorithm::ReAct,
            Algorithm::TreeOfThoughts => Algorithm::ReAct,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_fixed() {
        let stages: Vec<u8> = Phase::ALL.iter().map(|p| p.stage()).collect();
        assert_eq!(stages, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_order_ranges_cover_47_slots() {
        let total: usize = Phase::ALL.iter().map(|p| p.order_range().count()).sum();
        assert_eq!(total, 47);

        // Ranges are contiguous and non-overlapping.
        let mut next_expected = 1;
        for phase in Phase::ALL {
            assert_eq!(*phase.order_range().start(), next_expected);
            next_expected = phase.order_range().end() + 1;
        }
        assert_eq!(next_expected, 48);
    }

    #[test]
    fn test_for_order_boundaries() {
        assert_eq!(Phase::for_order(1), Some(Phase::Understanding));
        assert_eq!(Phase::for_order(6), Some(Phase::Understanding));
        assert_eq!(Phase::for_order(7), Some(Phase::Exploration));
        assert_eq!(Phase::for_order(16), Some(Phase::Implementation));
        assert_eq!(Phase::for_order(27), Some(Phase::Implementation));
        assert_eq!(Phase::for_order(47), Some(Phase::Delivery));
        assert_eq!(Phase::for_order(48), None);
        assert_eq!(Phase::for_order(0), None);
    }

    #[test]
    fn test_next_phase_chain() {
        assert_eq!(Phase::Understanding.next(), Some(Phase::Exploration));
        assert_eq!(Phase::Delivery.next(), None);
    }

    #[test]
    fn test_phase_key_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_key(phase.key()), Some(phase));
        }
        assert_eq!(Phase::from_key("deployment"), None);
    }

    #[test]
    fn test_algorithm_fallback_map() {
        assert_eq!(Algorithm::Lats.fallback(), Algorithm::TreeOfThoughts);
        assert_eq!(Algorithm::ReAct.fallback(), Algorithm::Reflexion);
        assert_eq!(Algorithm::SelfDebug.fallback(), Algorithm::ReAct);
        assert_eq!(Algorithm::Reflexion.fallback(), Algorithm::ReAct);
        assert_eq!(Algorithm::ProgramOfThoughts.fallback(), Algorithm::ReAct);
        assert_eq!(Algorithm::TreeOfThoughts.fallback(), Algorithm::ReAct);
    }

    #[test]
    fn test_algorithm_key_round_trip() {
        for alg in [
            Algorithm::Lats,
            Algorithm::ReAct,
            Algorithm::SelfDebug,
            Algorithm::Reflexion,
            Algorithm::ProgramOfThoughts,
            Algorithm::TreeOfThoughts,
        ] {
            assert_eq!(Algorithm::from_key(alg.key()), Some(alg));
        }
    }
}
