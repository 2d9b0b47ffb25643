//! Subprocess-backed step executor.
//!
//! Spawns a configured external command per step, writes the prompt to its
//! stdin, and captures stdout as the agent output. A trailing
//! `QUALITY: <0..1>` marker in the output is parsed as the step's
//! self-assessed quality; absent a marker the quality defaults to 0.75.
//! The timeout is enforced here as well as in the agent executor so the
//! child process is reaped rather than orphaned.

use crate::agent::AgentId;
use crate::executor::{StepExecutor, StepOutcome};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

static QUALITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^quality:\s*([01](?:\.\d+)?)\s*$").unwrap());

/// Default quality when the command reports none.
const DEFAULT_QUALITY: f64 = 0.75;

/// Runs each step as `command [args...] <prompt-on-stdin>`.
pub struct CommandStepExecutor {
    command: String,
    args: Vec<String>,
}

impl CommandStepExecutor {
    pub fn new(command: &str, args: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            args,
        }
    }

    /// Build from the `GOD_CODE_CMD` environment variable (whitespace-split
    /// into command and arguments).
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var("GOD_CODE_CMD").ok()?;
        let mut parts = raw.split_whitespace().map(str::to_string);
        let command = parts.next()?;
        Some(Self {
            command,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl StepExecutor for CommandStepExecutor {
    async fn execute(
        &self,
        agent: AgentId,
        prompt: &str,
        timeout: Duration,
    ) -> Result<StepOutcome> {
        let start = Instant::now();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("GOD_CODE_AGENT", agent.key())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn step command '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to step command stdin")?;
            stdin
                .shutdown()
                .await
                .context("Failed to close step command stdin")?;
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to collect step command output")?,
            Err(_) => {
                bail!(
                    "Step command for agent '{}' exceeded timeout of {}s",
                    agent,
                    timeout.as_secs()
                );
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Step command for agent '{}' exited with {}: {}",
                agent,
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let quality = QUALITY_REGEX
            .captures_iter(&stdout)
            .last()
            .and_then(|cap| cap[1].parse::<f64>().ok())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_QUALITY);

        debug!(agent = %agent, quality, bytes = stdout.len(), "step command finished");

        Ok(StepOutcome {
            output: stdout,
            quality,
            duration: start.elapsed(),
        })
    }
}
