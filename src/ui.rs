//! Terminal progress view for `god-code run`.
//!
//! Consumes observability events and renders a phase-level progress bar
//! with per-agent status lines. Suppressed in verbose mode, where tracing
//! output takes over.

use crate::observability::{EventStatus, ObservabilityEvent};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Live run view over an indicatif progress bar.
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total_phases: usize) -> Self {
        let bar = ProgressBar::new(total_phases as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30.cyan/blue}] {pos}/{len} phases {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }

    /// A view that renders nothing (tests, verbose mode).
    pub fn hidden(total_phases: usize) -> Self {
        let bar = ProgressBar::with_draw_target(
            Some(total_phases as u64),
            ProgressDrawTarget::hidden(),
        );
        Self { bar }
    }

    /// Update the view from one event.
    pub fn handle_event(&self, event: &ObservabilityEvent) {
        match (event.component.as_str(), event.operation.as_str()) {
            ("phase-executor", "phase_started") => {
                if let Some(phase) = event.metadata.get("phase").and_then(|v| v.as_str()) {
                    self.bar.set_message(format!("running {phase}"));
                }
            }
            ("phase-executor", "phase_completed") => {
                self.bar.inc(1);
                if let Some(verdict) = event.metadata.get("verdict").and_then(|v| v.as_str()) {
                    let styled = match event.status {
                        EventStatus::Success => style(verdict).green(),
                        _ => style(verdict).red(),
                    };
                    self.bar.println(format!(
                        "  {} phase {} -> {}",
                        style("sherlock").dim(),
                        event
                            .metadata
                            .get("phase")
                            .and_then(|v| v.as_str())
                            .unwrap_or("?"),
                        styled
                    ));
                }
            }
            ("phase-executor", "phase_failed") => {
                self.bar.inc(1);
                self.bar.println(format!(
                    "  {} phase {} terminated",
                    style("!").red(),
                    event
                        .metadata
                        .get("phase")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?")
                ));
            }
            ("agent-executor", "agent_completed") => {
                if let Some(agent) = event.metadata.get("agent").and_then(|v| v.as_str()) {
                    self.bar
                        .set_message(format!("{} {}", style("✓").green(), agent));
                }
            }
            ("agent-executor", "agent_failed") => {
                if let Some(agent) = event.metadata.get("agent").and_then(|v| v.as_str()) {
                    self.bar.println(format!(
                        "  {} agent {} failed",
                        style("✗").red(),
                        agent
                    ));
                }
            }
            _ => {}
        }
    }

    /// Finish the view with a closing message.
    pub fn finish(&self, success: bool, total_xp: u64) {
        if success {
            self.bar
                .finish_with_message(format!("{} ({} XP)", style("delivered").green(), total_xp));
        } else {
            self.bar
                .finish_with_message(format!("{}", style("failed").red()));
        }
    }
}
