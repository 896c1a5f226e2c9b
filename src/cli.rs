//! Command-line surface of `coco-orchestrator`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::agent::CommandExecutor;
use crate::config::OrchestratorConfig;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::monitor::SystemResourceMonitor;
use crate::sprint::{BacklogSpec, CommandTestRunner, SprintResultStore, SprintRunner};
use crate::swarm::{create_board, get_next_task, BoardDriver, BoardStore, SwarmSpec};
use crate::validate::Validate;

/// Top-level CLI parser.
#[derive(Debug, Parser)]
#[command(
    name = "coco-orchestrator",
    version,
    about = "Run coding-agent sprints and swarm boards"
)]
pub struct Cli {
    /// Configuration file (default: <project-dir>/.coco/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project directory agents and tests run in (default: current directory).
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a sprint backlog through the test and quality gates.
    Sprints {
        /// Backlog file (YAML or JSON).
        backlog: PathBuf,
    },
    /// Build a task board from a swarm spec and run it.
    Swarm {
        /// Swarm spec file (YAML or JSON).
        spec: PathBuf,
        /// Continue the persisted board instead of building a new one.
        #[arg(long)]
        resume: bool,
    },
    /// Show the persisted board and sprint results.
    Status,
}

impl Cli {
    fn project_dir(&self) -> Result<PathBuf> {
        match &self.project_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn config_path(&self, project_dir: &Path) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| project_dir.join(".coco").join("config.toml"))
    }
}

/// Runs the parsed command. Returns `true` when the run succeeded.
pub async fn run(cli: Cli) -> Result<bool> {
    let project_dir = cli.project_dir()?;
    let config_path = cli.config_path(&project_dir);
    let config = OrchestratorConfig::load(&config_path)?;
    config.validate().ensure_valid(&config_path.display().to_string())?;

    match cli.command {
        Command::Sprints { backlog } => run_sprints(&config, &project_dir, &backlog).await,
        Command::Swarm { spec, resume } => run_swarm(&config, &project_dir, &spec, resume).await,
        Command::Status => show_status(&config, &project_dir),
    }
}

fn executor(config: &OrchestratorConfig, working_dir: &Path) -> CommandExecutor {
    CommandExecutor::new(working_dir)
        .with_command(
            &config.execution.agent_command,
            config.execution.agent_args.clone(),
        )
        .with_timeout(config.execution.agent_timeout())
}

/// Loads and checks a backlog; gate settings it leaves out come from `[quality]`.
fn load_backlog(
    config: &OrchestratorConfig,
    project_dir: &Path,
    backlog_path: &Path,
) -> Result<BacklogSpec> {
    let mut backlog = BacklogSpec::load_with_defaults(
        backlog_path,
        config.quality.max_iterations_per_sprint,
        config.quality.threshold,
    )?;
    backlog
        .validate()
        .ensure_valid(&backlog_path.display().to_string())?;
    if backlog.output_path.is_relative() {
        backlog.output_path = project_dir.join(&backlog.output_path);
    }
    Ok(backlog)
}

async fn run_sprints(
    config: &OrchestratorConfig,
    project_dir: &Path,
    backlog_path: &Path,
) -> Result<bool> {
    let backlog = load_backlog(config, project_dir, backlog_path)?;

    let coordinator = Coordinator::new(Arc::new(executor(config, &backlog.output_path)));
    let test_runner = CommandTestRunner::new(&config.tests.command, config.tests.args.clone());
    let runner = SprintRunner::new(coordinator, Arc::new(test_runner))
        .with_monitor(Arc::new(SystemResourceMonitor::new(
            config.execution.max_parallel_agents,
        )))
        .with_result_store(SprintResultStore::new(&config.state_dir(project_dir)));

    let build = runner.run_sprints(&backlog).await;
    println!("{}", serde_json::to_string_pretty(&build)?);
    Ok(build.success)
}

async fn run_swarm(
    config: &OrchestratorConfig,
    project_dir: &Path,
    spec_path: &Path,
    resume: bool,
) -> Result<bool> {
    let store = BoardStore::new(&config.state_dir(project_dir));
    let driver = BoardDriver::new(store, Arc::new(executor(config, project_dir)));

    let board = if resume && driver.store().exists() {
        tracing::info!(path = %driver.store().path().display(), "resuming board");
        driver.resume().await?
    } else {
        let spec = SwarmSpec::load(spec_path)?;
        spec.validate().ensure_valid(&spec_path.display().to_string())?;
        driver.run(create_board(&spec)?).await?
    };

    println!("{}", serde_json::to_string_pretty(&board.stats)?);
    Ok(board.stats.failed == 0 && board.stats.blocked == 0 && board.stats.pending() == 0)
}

fn show_status(config: &OrchestratorConfig, project_dir: &Path) -> Result<bool> {
    let state_dir = config.state_dir(project_dir);
    let store = BoardStore::new(&state_dir);

    if store.exists() {
        let board = store.load()?;
        let stats = &board.stats;
        println!("Project: {}", board.project_name);
        println!(
            "Tasks: {} total, {} done, {} failed, {} in progress, {} blocked, {} pending",
            stats.total,
            stats.done,
            stats.failed,
            stats.in_progress,
            stats.blocked,
            stats.pending()
        );
        match get_next_task(&board) {
            Some(task) => println!("Next: {} ({})", task.id, task.task_type.slug()),
            None => println!("Next: none"),
        }
    } else {
        println!("No board at {}", store.path().display());
    }

    let results = SprintResultStore::new(&state_dir).load_all()?;
    if !results.is_empty() {
        println!();
        println!("Sprints:");
        for result in &results {
            println!(
                "  {:<20} {:<4} tests {}/{} quality {} iterations {}",
                result.sprint_id,
                if result.success { "ok" } else { "FAIL" },
                result.tests_passing,
                result.tests_total,
                result.quality_score,
                result.iterations
            );
        }
    }
    Ok(true)
}
