use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use god_code::agent::AgentId;
use god_code::catalog::{CatalogLoader, builtin_mappings};
use god_code::config::PipelineConfig;
use god_code::executor::CommandStepExecutor;
use god_code::observability::ObservabilityBus;
use god_code::orchestrator::PipelineOrchestrator;
use god_code::phase::Phase;
use god_code::ui::RunProgress;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "god-code")]
#[command(version, about = "DAG-driven coding pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory of agent definition files (markdown with front matter).
    #[arg(long, global = true)]
    pub agents_dir: Option<PathBuf>,

    /// Pipeline config file merged beneath the CLI flags.
    #[arg(long, global = true, default_value = "god-code.toml")]
    pub config_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coding pipeline for a task description.
    Run {
        /// Free-form description of the coding task.
        task: String,

        /// Command invoked per agent step (prompt on stdin). Defaults to
        /// the GOD_CODE_CMD environment variable.
        #[arg(long)]
        step_cmd: Option<String>,

        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        parallel: bool,

        #[arg(long, default_value_t = 3)]
        max_parallel_agents: usize,

        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        checkpoints: bool,

        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        learning: bool,

        #[arg(long, default_value_t = 600_000)]
        agent_timeout_ms: u64,

        #[arg(long, default_value_t = 3_600_000)]
        phase_timeout_ms: u64,

        /// First phase to run (key, e.g. "architecture").
        #[arg(long)]
        start_phase: Option<String>,

        /// Last phase to run.
        #[arg(long)]
        end_phase: Option<String>,
    },
    /// Print the canonical 47-agent roster.
    Agents,
    /// Validate the agent definition files and print the deficit set.
    Validate,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "god_code=debug" } else { "god_code=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_phase(raw: &str) -> Result<Phase> {
    Phase::from_key(raw).with_context(|| {
        format!(
            "unknown phase '{raw}' (expected one of: {})",
            Phase::ALL.map(|p| p.key()).join(", ")
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            task,
            step_cmd,
            parallel,
            max_parallel_agents,
            checkpoints,
            learning,
            agent_timeout_ms,
            phase_timeout_ms,
            start_phase,
            end_phase,
        } => {
            let step_executor = match step_cmd {
                Some(raw) => {
                    let mut parts = raw.split_whitespace().map(str::to_string);
                    let command = parts
                        .next()
                        .context("--step-cmd must name a command")?;
                    CommandStepExecutor::new(&command, parts.collect())
                }
                None => CommandStepExecutor::from_env().context(
                    "no step executor configured: pass --step-cmd or set GOD_CODE_CMD \
                     (the pipeline refuses to run with fabricated agent output)",
                )?,
            };

            let start = start_phase.as_deref().map(parse_phase).transpose()?;
            let end = end_phase.as_deref().map(parse_phase).transpose()?;

            let config = PipelineConfig::new(&task)
                .merge_toml_file(&cli.config_file)?
                .with_phase_range(start, end)?
                .with_parallel_execution(parallel)
                .with_max_parallel_agents(max_parallel_agents)
                .with_checkpoints(checkpoints)
                .with_learning(learning)
                .with_agent_timeout(Duration::from_millis(agent_timeout_ms))
                .with_phase_timeout(Duration::from_millis(phase_timeout_ms))
                .with_verbose(cli.verbose);

            let (mappings, instructions) = match &cli.agents_dir {
                Some(dir) => {
                    let result = CatalogLoader::new(dir).load_catalog()?;
                    for issue in &result.issues {
                        tracing::warn!(%issue, "catalog issue");
                    }
                    (result.mappings, result.instructions)
                }
                None => (builtin_mappings(), HashMap::new()),
            };

            let (bus, mut events) = ObservabilityBus::channel();
            let orchestrator = PipelineOrchestrator::builder()
                .step_executor(Arc::new(step_executor))
                .catalog(mappings, instructions)
                .observability(bus)
                .build();

            let view = if cli.verbose {
                RunProgress::hidden(config.phases.len())
            } else {
                RunProgress::new(config.phases.len())
            };
            let view_task = tokio::spawn(async move {
                let mut last = (false, 0u64);
                while let Some(event) = events.recv().await {
                    if event.operation == "pipeline_completed" {
                        last = (
                            event.metadata["success"].as_bool().unwrap_or(false),
                            event.metadata["total_xp"].as_u64().unwrap_or(0),
                        );
                    }
                    view.handle_event(&event);
                }
                (view, last)
            });

            let result = orchestrator.execute(config).await?;
            // Close the event channel so the view task drains and exits.
            drop(orchestrator);

            if let Ok((view, (success, xp))) = view_task.await {
                view.finish(success, xp);
            }

            println!();
            println!(
                "Pipeline {}: {} phases completed, {} XP",
                if result.success { "succeeded" } else { "failed" },
                result.completed_phases.len(),
                result.total_xp
            );
            if let Some(phase) = result.failed_phase {
                println!(
                    "Failed phase: {phase} (rollback {})",
                    if result.rollback_applied { "applied" } else { "not applied" }
                );
                for remediation in result.remediations() {
                    println!("  - {remediation}");
                }
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Agents => {
            println!("{:<4} {:<26} {:<15} {:<11} {:<9} {}", "#", "agent", "phase", "algorithm", "critical", "xp");
            for mapping in builtin_mappings() {
                println!(
                    "{:<4} {:<26} {:<15} {:<11} {:<9} {}",
                    mapping.id.canonical_order(),
                    mapping.id.key(),
                    mapping.phase.key(),
                    mapping.algorithm.key(),
                    if mapping.critical { "yes" } else { "" },
                    mapping.xp_reward,
                );
            }
            Ok(())
        }
        Commands::Validate => {
            let Some(dir) = cli.agents_dir else {
                bail!("--agents-dir is required for validate");
            };
            let issues = CatalogLoader::new(&dir).validate_agent_files()?;
            if issues.is_empty() {
                println!("Catalog at {} is clean: all 47 agents present.", dir.display());
                return Ok(());
            }
            println!("{} issues:", issues.len());
            for issue in &issues {
                println!("  - {issue}");
            }
            let missing = issues
                .iter()
                .filter(|i| {
                    matches!(i, god_code::catalog::CatalogIssue::MissingAgentFile { .. })
                })
                .count();
            // An entirely file-less catalog still runs from the canonical
            // table; anything else is a real deficit.
            let file_less = missing == AgentId::ALL.len() && issues.len() == missing;
            if !file_less {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
