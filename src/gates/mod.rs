//! The L-Score quality gate.
//!
//! A composite weighted score over six components in [0, 1] with
//! phase-specific weights and monotonically rising thresholds (0.75 for
//! understanding up to 0.95 for delivery). Gate results are ordinary
//! outputs, never errors; the Sherlock gate refines its investigation tier
//! from them.

use crate::phase::Phase;
use crate::state::AgentExecutionResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cap on retained validation records.
pub const VALIDATION_HISTORY_LIMIT: usize = 100;

/// The six scored components.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LScoreComponents {
    pub accuracy: f64,
    pub completeness: f64,
    pub maintainability: f64,
    pub security: f64,
    pub performance: f64,
    pub test_coverage: f64,
}

impl LScoreComponents {
    fn as_array(&self) -> [f64; 6] {
        [
            self.accuracy,
            self.completeness,
            self.maintainability,
            self.security,
            self.performance,
            self.test_coverage,
        ]
    }
}

/// Composite score for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LScore {
    pub phase: Phase,
    pub components: LScoreComponents,
    pub composite: f64,
}

/// Gate outcome for a phase's L-Score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateResult {
    Passed,
    ConditionalPass,
    SoftReject,
    HardReject,
    EmergencyBypass,
}

impl GateResult {
    /// Whether the phase may advance on this gate result alone.
    pub fn allows_progression(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::ConditionalPass | Self::EmergencyBypass
        )
    }
}

impl fmt::Display for GateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "PASSED",
            Self::ConditionalPass => "CONDITIONAL_PASS",
            Self::SoftReject => "SOFT_REJECT",
            Self::HardReject => "HARD_REJECT",
            Self::EmergencyBypass => "EMERGENCY_BYPASS",
        };
        write!(f, "{s}")
    }
}

/// Phase-specific weights and thresholds.
pub struct QualityGate;

impl QualityGate {
    /// Weights in component order (accuracy, completeness, maintainability,
    /// security, performance, test_coverage); each row sums to 1.
    pub fn weights_for(phase: Phase) -> [f64; 6] {
        match phase {
            Phase::Understanding => [0.25, 0.25, 0.15, 0.10, 0.10, 0.15],
            Phase::Exploration => [0.25, 0.30, 0.15, 0.10, 0.10, 0.10],
            Phase::Architecture => [0.25, 0.20, 0.25, 0.15, 0.10, 0.05],
            Phase::Implementation => [0.30, 0.20, 0.20, 0.15, 0.10, 0.05],
            Phase::Testing => [0.20, 0.15, 0.10, 0.10, 0.10, 0.35],
            Phase::Optimization => [0.15, 0.10, 0.15, 0.10, 0.35, 0.15],
            Phase::Delivery => [0.20, 0.20, 0.15, 0.20, 0.10, 0.15],
        }
    }

    /// Near-uniform weights for whole-pipeline scoring.
    pub fn pipeline_weights() -> [f64; 6] {
        [1.0 / 6.0; 6]
    }

    /// Minimum composite for a clean pass; rises monotonically by phase.
    pub fn threshold_for(phase: Phase) -> f64 {
        match phase {
            Phase::Understanding => 0.75,
            Phase::Exploration => 0.78,
            Phase::Architecture => 0.82,
            Phase::Implementation => 0.85,
            Phase::Testing => 0.88,
            Phase::Optimization => 0.92,
            Phase::Delivery => 0.95,
        }
    }

    /// Weighted mean of the components under the phase's weights.
    pub fn composite(phase: Phase, components: &LScoreComponents) -> f64 {
        let weights = Self::weights_for(phase);
        components
            .as_array()
            .iter()
            .zip(weights.iter())
            .map(|(c, w)| c * w)
            .sum()
    }

    /// Score and gate a set of components for a phase.
    pub fn evaluate(
        phase: Phase,
        components: LScoreComponents,
        emergency_bypass: bool,
    ) -> (LScore, GateResult) {
        let composite = Self::composite(phase, &components);
        let score = LScore {
            phase,
            components,
            composite,
        };

        if emergency_bypass {
            return (score, GateResult::EmergencyBypass);
        }

        let threshold = Self::threshold_for(phase);
        let result = if composite >= threshold {
            GateResult::Passed
        } else if composite >= threshold - 0.05 {
            GateResult::ConditionalPass
        } else if composite >= threshold - 0.15 {
            GateResult::SoftReject
        } else {
            GateResult::HardReject
        };
        (score, result)
    }
}

/// One validation outcome retained in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub phase: Phase,
    pub composite: f64,
    pub gate_result: GateResult,
}

/// Phase validation produced for the Sherlock gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseValidation {
    pub l_score: LScore,
    pub gate_result: GateResult,
}

/// Derives components from phase results and keeps a bounded history.
pub struct IntegratedValidator {
    history: Vec<ValidationRecord>,
    agent_timeout: Duration,
    emergency_bypass: bool,
}

impl IntegratedValidator {
    pub fn new(agent_timeout: Duration, emergency_bypass: bool) -> Self {
        Self {
            history: Vec::new(),
            agent_timeout,
            emergency_bypass,
        }
    }

    /// Score one phase from its agent results.
    pub fn validate_phase(
        &mut self,
        phase: Phase,
        results: &[AgentExecutionResult],
    ) -> PhaseValidation {
        let components = self.derive_components(phase, results);
        let (l_score, gate_result) = QualityGate::evaluate(phase, components, self.emergency_bypass);

        self.history.push(ValidationRecord {
            phase,
            composite: l_score.composite,
            gate_result,
        });
        if self.history.len() > VALIDATION_HISTORY_LIMIT {
            let excess = self.history.len() - VALIDATION_HISTORY_LIMIT;
            self.history.drain(0..excess);
        }

        PhaseValidation {
            l_score,
            gate_result,
        }
    }

    pub fn history(&self) -> &[ValidationRecord] {
        &self.history
    }

    /// Component derivation from observed results:
    /// accuracy = mean quality; completeness = success ratio;
    /// maintainability = mean of those two; security = 1 − failed-critical
    /// weight; performance = share finishing under half the agent timeout;
    /// test_coverage = mean quality in the testing phase, else completeness.
    fn derive_components(
        &self,
        phase: Phase,
        results: &[AgentExecutionResult],
    ) -> LScoreComponents {
        if results.is_empty() {
            return LScoreComponents::default();
        }

        let n = results.len() as f64;
        let accuracy = results.iter().map(|r| r.quality).sum::<f64>() / n;
        let completeness = results.iter().filter(|r| r.success).count() as f64 / n;
        let maintainability = (accuracy + completeness) / 2.0;
        let failed = results.iter().filter(|r| !r.success).count() as f64;
        let security = (1.0 - failed / n * 0.5).clamp(0.0, 1.0);
        let fast_budget = self.agent_timeout / 2;
        let performance = results
            .iter()
            .filter(|r| r.execution_time <= fast_budget)
            .count() as f64
            / n;
        let test_coverage = if phase == Phase::Testing {
            accuracy
        } else {
            completeness
        };

        LScoreComponents {
            accuracy,
            completeness,
            maintainability,
            security,
            performance,
            test_coverage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use serde_json::json;

    fn result(agent: AgentId, success: bool, quality: f64) -> AgentExecutionResult {
        AgentExecutionResult {
            agent,
            success,
            output: json!("out"),
            quality,
            xp_earned: 0,
            memory_writes: Vec::new(),
            execution_time: Duration::from_millis(10),
            error: None,
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        for phase in Phase::ALL {
            let sum: f64 = QualityGate::weights_for(phase).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{phase} weights sum to {sum}");
        }
    }

    #[test]
    fn test_thresholds_rise_monotonically() {
        let thresholds: Vec<f64> = Phase::ALL
            .iter()
            .map(|p| QualityGate::threshold_for(*p))
            .collect();
        assert_eq!(thresholds[0], 0.75);
        assert_eq!(thresholds[6], 0.95);
        for pair in thresholds.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_gate_banding() {
        let components = LScoreComponents {
            accuracy: 0.9,
            completeness: 1.0,
            maintainability: 0.95,
            security: 1.0,
            performance: 1.0,
            test_coverage: 1.0,
        };
        let (score, result) = QualityGate::evaluate(Phase::Understanding, components, false);
        assert!(score.composite > 0.9);
        assert_eq!(result, GateResult::Passed);

        let weak = LScoreComponents {
            accuracy: 0.3,
            completeness: 0.3,
            maintainability: 0.3,
            security: 0.3,
            performance: 0.3,
            test_coverage: 0.3,
        };
        let (_, result) = QualityGate::evaluate(Phase::Delivery, weak, false);
        assert_eq!(result, GateResult::HardReject);
    }

    #[test]
    fn test_emergency_bypass_short_circuits() {
        let (_, result) =
            QualityGate::evaluate(Phase::Delivery, LScoreComponents::default(), true);
        assert_eq!(result, GateResult::EmergencyBypass);
    }

    #[test]
    fn test_validator_derives_clean_components_on_happy_path() {
        let mut validator = IntegratedValidator::new(Duration::from_secs(600), false);
        let results: Vec<AgentExecutionResult> = AgentId::phase_roster(Phase::Understanding)
            .into_iter()
            .map(|a| result(a, true, 0.9))
            .collect();

        let validation = validator.validate_phase(Phase::Understanding, &results);
        assert!(validation.l_score.composite >= 0.9);
        assert_eq!(validation.gate_result, GateResult::Passed);
        assert_eq!(validator.history().len(), 1);
    }

    #[test]
    fn test_failures_drag_the_score_down() {
        let mut validator = IntegratedValidator::new(Duration::from_secs(600), false);
        let results = vec![
            result(AgentId::CodeGenerator, false, 0.0),
            result(AgentId::TypeImplementer, false, 0.0),
            result(AgentId::UnitImplementer, true, 0.5),
        ];

        let validation = validator.validate_phase(Phase::Implementation, &results);
        assert!(validation.l_score.composite < 0.7);
        assert!(!validation.gate_result.allows_progression());
    }

    #[test]
    fn test_history_is_capped() {
        let mut validator = IntegratedValidator::new(Duration::from_secs(600), false);
        let results = vec![result(AgentId::Profiler, true, 0.9)];
        for _ in 0..(VALIDATION_HISTORY_LIMIT + 20) {
            validator.validate_phase(Phase::Optimization, &results);
        }
        assert_eq!(validator.history().len(), VALIDATION_HISTORY_LIMIT);
    }

    #[test]
    fn test_empty_results_score_zero() {
        let mut validator = IntegratedValidator::new(Duration::from_secs(600), false);
        let validation = validator.validate_phase(Phase::Understanding, &[]);
        assert_eq!(validation.l_score.composite, 0.0);
    }
}
