//! Pipeline run configuration.
//!
//! Defaults match the documented resource model: three parallel agents,
//! a 600 s agent timeout, a 3600 s phase timeout, three gate retries, and
//! checkpoints at every phase. A `god-code.toml` file can override the
//! defaults; CLI flags override the file.

use crate::errors::PipelineError;
use crate::phase::Phase;
use crate::sherlock::InvestigationTier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum gate-driven re-runs of a failed phase.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The user's task description, threaded into every agent prompt.
    pub task_description: String,
    /// Phases to execute, in order. Defaults to all seven.
    pub phases: Vec<Phase>,
    /// Run parallelizable agents of a phase concurrently.
    pub enable_parallel_execution: bool,
    /// Concurrency cap within a batch.
    pub max_parallel_agents: usize,
    /// Take phase-boundary checkpoints.
    pub enable_checkpoints: bool,
    /// Phases that snapshot state when they begin.
    pub checkpoint_phases: Vec<Phase>,
    /// Keep at most this many checkpoints (FIFO trim).
    pub max_checkpoints: usize,
    /// Feed trajectories and quality feedback to the learning subsystem.
    pub enable_learning: bool,
    /// Per-agent step timeout.
    #[serde(with = "duration_millis")]
    pub agent_timeout: Duration,
    /// Whole-phase timeout.
    #[serde(with = "duration_millis")]
    pub phase_timeout: Duration,
    /// Gate retries before escalation.
    pub max_retry_count: u32,
    /// Default Sherlock investigation tier when no gate refinement applies.
    pub default_tier: InvestigationTier,
    /// Verdict quality at or above which a verdict is promoted to a pattern.
    pub pattern_threshold: f64,
    /// Skip the quality gate entirely (emergency bypass).
    pub emergency_bypass: bool,
    /// Verbose progress output.
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            task_description: String::new(),
            phases: Phase::ALL.to_vec(),
            enable_parallel_execution: true,
            max_parallel_agents: 3,
            enable_checkpoints: true,
            checkpoint_phases: Phase::ALL.to_vec(),
            max_checkpoints: 5,
            enable_learning: true,
            agent_timeout: Duration::from_secs(600),
            phase_timeout: Duration::from_secs(3600),
            max_retry_count: MAX_RETRY_COUNT,
            default_tier: InvestigationTier::Scan,
            pattern_threshold: 0.75,
            emergency_bypass: false,
            verbose: false,
        }
    }
}

impl PipelineConfig {
    /// Create a config for the given task with defaults.
    pub fn new(task_description: &str) -> Self {
        Self {
            task_description: task_description.to_string(),
            ..Default::default()
        }
    }

    /// Restrict the run to a contiguous phase range.
    pub fn with_phase_range(
        mut self,
        start: Option<Phase>,
        end: Option<Phase>,
    ) -> Result<Self, PipelineError> {
        let start = start.unwrap_or(Phase::Understanding);
        let end = end.unwrap_or(Phase::Delivery);
        if start > end {
            return Err(PipelineError::InvalidPhaseRange {
                start: start.key().to_string(),
                end: end.key().to_string(),
            });
        }
        self.phases = Phase::ALL
            .iter()
            .copied()
            .filter(|p| *p >= start && *p <= end)
            .collect();
        Ok(self)
    }

    /// Set the parallelism switch.
    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.enable_parallel_execution = enabled;
        self
    }

    /// Set the concurrency cap.
    pub fn with_max_parallel_agents(mut self, max: usize) -> Self {
        self.max_parallel_agents = max.max(1);
        self
    }

    /// Enable or disable checkpoints.
    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.enable_checkpoints = enabled;
        self
    }

    /// Enable or disable learning feedback.
    pub fn with_learning(mut self, enabled: bool) -> Self {
        self.enable_learning = enabled;
        self
    }

    /// Set the per-agent timeout.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Set the per-phase timeout.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Set verbose output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Merge overrides from a `god-code.toml` file if it exists.
    pub fn merge_toml_file(mut self, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(self);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let overrides: ConfigOverrides = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(v) = overrides.enable_parallel_execution {
            self.enable_parallel_execution = v;
        }
        if let Some(v) = overrides.max_parallel_agents {
            self.max_parallel_agents = v.max(1);
        }
        if let Some(v) = overrides.enable_checkpoints {
            self.enable_checkpoints = v;
        }
        if let Some(v) = overrides.enable_learning {
            self.enable_learning = v;
        }
        if let Some(ms) = overrides.agent_timeout_ms {
            self.agent_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.phase_timeout_ms {
            self.phase_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = overrides.max_retry_count {
            self.max_retry_count = v;
        }
        if let Some(v) = overrides.pattern_threshold {
            self.pattern_threshold = v.clamp(0.0, 1.0);
        }
        Ok(self)
    }
}

/// Optional overrides accepted in `god-code.toml`.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    enable_parallel_execution: Option<bool>,
    max_parallel_agents: Option<usize>,
    enable_checkpoints: Option<bool>,
    enable_learning: Option<bool>,
    agent_timeout_ms: Option<u64>,
    phase_timeout_ms: Option<u64>,
    max_retry_count: Option<u32>,
    pattern_threshold: Option<f64>,
}

/// Serde helpers for Duration as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
