use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use forge::cleanup::CleanupManager;
use forge::config::{CliOverrides, Config};
use forge::executor::PhaseExecutor;
use forge::gateway::{ForgeGateway, GhGateway};
use forge::labels::LabelStateMachine;
use forge::phase::PhaseCommand;
use forge::resources::{WindowManager, WorkspaceManager};
use forge::scheduler::{Scheduler, SchedulerConfig};

#[derive(Parser)]
#[command(name = "osoba-forge")]
#[command(version, about = "Issue-driven development orchestrator")]
pub struct Cli {
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub owner: Option<String>,

    #[arg(long, global = true)]
    pub repo: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the polling loop and drive issues through plan/implement/review.
    Run {
        /// Run a single poll tick instead of looping.
        #[arg(long)]
        once: bool,
    },
    /// Reclaim all resources (windows, workspace) bound to one issue.
    Cleanup { issue_number: u64 },
    /// Read-only diagnostics over session/window state.
    Diagnose {
        #[command(subcommand)]
        command: DiagnoseCommands,
    },
    /// Print the resolved configuration.
    Config,
    /// Run the `gh`/git/tmux preflight checks and exit.
    Preflight,
}

#[derive(Subcommand)]
pub enum DiagnoseCommands {
    Session { name: String },
    Window { session: String, name: String },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to get current directory")?,
    };
    Config::load(
        &project_dir,
        CliOverrides {
            owner: cli.owner.clone(),
            repo: cli.repo.clone(),
            ..Default::default()
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    forge::logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            std::process::exit(1)
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Preflight => {
            let config = load_config(&cli)?;
            let gateway = GhGateway::new(config.gh_bin.clone());
            let ctx = CancellationToken::new();
            match gateway.preflight(&ctx).await {
                Ok(()) => Ok(0),
                Err(err) => {
                    tracing::error!(error = %err, "preflight failed");
                    Ok(2)
                }
            }
        }
        Commands::Config => {
            let config = load_config(&cli)?;
            println!("{config:#?}");
            Ok(0)
        }
        Commands::Cleanup { issue_number } => {
            let config = load_config(&cli)?;
            let windows = Arc::new(WindowManager::new(config.tmux_bin.clone(), config.session_name.clone()));
            let workspaces = Arc::new(WorkspaceManager::new(
                config.git_bin.clone(),
                load_project_dir(&cli)?,
                config.workspace_root.clone(),
            ));
            let manager = CleanupManager::new(windows, workspaces);
            manager.cleanup_issue_resources(*issue_number).await?;
            Ok(0)
        }
        Commands::Diagnose { command } => {
            let config = load_config(&cli)?;
            let windows = Arc::new(WindowManager::new(config.tmux_bin.clone(), config.session_name.clone()));
            let diagnostics = forge::diagnostics::Diagnostics::new(windows);
            match command {
                DiagnoseCommands::Session { name } => {
                    let diag = diagnostics.diagnose_session(name).await;
                    println!("{diag:#?}");
                }
                DiagnoseCommands::Window { session, name } => {
                    let diag = diagnostics.diagnose_window(session, name).await;
                    println!("{diag:#?}");
                }
            }
            Ok(0)
        }
        Commands::Run { once } => run_scheduler(&cli, *once).await,
    }
}

fn load_project_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.project_dir {
        Some(dir) => dir.canonicalize().context("failed to resolve project directory"),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

async fn run_scheduler(cli: &Cli, once: bool) -> Result<i32> {
    let config = load_config(cli)?;
    let project_dir = load_project_dir(cli)?;

    let gh_gateway = GhGateway::new(config.gh_bin.clone());
    let ctx = CancellationToken::new();

    if std::env::var("OSOBA_FORGE_SKIP_PREFLIGHT").is_err() && gh_gateway.preflight(&ctx).await.is_err() {
        tracing::error!("preflight check failed; install/authenticate gh before running");
        return Ok(2);
    }

    let gateway: Arc<dyn ForgeGateway> = Arc::new(gh_gateway);
    let state_machine = Arc::new(LabelStateMachine::new(gateway.clone()));
    state_machine.ensure_labels_exist(&ctx, &config.owner, &config.repo).await.ok();

    let workspaces = Arc::new(WorkspaceManager::new(
        config.git_bin.clone(),
        project_dir,
        config.workspace_root.clone(),
    ));
    let windows = Arc::new(WindowManager::new(config.tmux_bin.clone(), config.session_name.clone()));
    let executor = Arc::new(PhaseExecutor {
        state_machine,
        workspaces,
        windows,
        command: PhaseCommand::new(config.phase_command_template()),
        base_branch: config.base_branch.clone(),
    });

    let mut scheduler_config = SchedulerConfig::new(config.owner.clone(), config.repo.clone());
    scheduler_config.poll_interval = config.poll_interval;
    scheduler_config.worker_count = config.worker_count;
    scheduler_config.rate_limit_check_every = config.rate_limit_check_every;

    let scheduler = Scheduler::new(scheduler_config, gateway, executor);

    if once {
        scheduler.tick(&ctx).await;
        return Ok(0);
    }

    let cancel_on_signal = ctx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_on_signal.cancel();
    });

    scheduler.run(&ctx).await;
    Ok(130)
}
