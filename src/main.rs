use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use patchwright::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "patchwright")]
#[command(
    version,
    about = "Turn a change request into a verified patch: generate, validate, apply and preflight in a disposable sandbox"
)]
pub struct Cli {
    /// Debug-level logging for patchwright
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Config file (defaults to ./patchwright.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the repository lives and how the Job is identified.
#[derive(Args, Clone, Debug)]
pub struct TargetArgs {
    /// Local working tree to change (updated in place on success)
    #[arg(long, conflicts_with = "repo_url", required_unless_present = "repo_url")]
    pub local_path: Option<PathBuf>,

    /// Repository to clone (owner/repo, GitHub URL or any git URL)
    #[arg(long)]
    pub repo_url: Option<String>,

    /// Upstream owner/repo for the pull request
    #[arg(long)]
    pub github_repo: Option<String>,

    /// Branch to clone and open the pull request against
    #[arg(long)]
    pub base_branch: Option<String>,

    /// Job id (a UUID is generated when omitted)
    #[arg(long)]
    pub id: Option<String>,
}

/// Flags shared by every command that runs Jobs.
#[derive(Args, Clone, Debug)]
pub struct RunFlags {
    /// Keep verified changes in the sandbox; do not push or copy back
    #[arg(long)]
    pub no_publish: bool,

    /// Print the full Job report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Override limits.max_iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one change request
    Run {
        /// The change request
        #[arg(short, long)]
        prompt: String,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        flags: RunFlags,
    },
    /// Run the fixed repair pipeline (fix-build, normalize-ui, loading-empty-states, readme)
    Repair {
        /// Overall request handed to every stage
        #[arg(short, long, default_value = "Make this repository shippable")]
        prompt: String,

        /// Free-form notes about the project for every stage
        #[arg(long)]
        notes: Option<String>,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        flags: RunFlags,
    },
    /// Run a JSON array of job submissions on the worker pool
    Batch {
        /// File with one submission or an array of submissions
        #[arg(short, long)]
        file: PathBuf,

        /// Run every job in repair mode
        #[arg(long)]
        repair: bool,

        #[command(flatten)]
        flags: RunFlags,
    },
    /// Run one JSON job submission (`-` reads stdin)
    Submit {
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        flags: RunFlags,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default patchwright.toml
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "patchwright=debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = Config::load(cli.config.as_deref())?;

    let succeeded = match &cli.command {
        Commands::Run {
            prompt,
            target,
            flags,
        } => {
            let job = cmd::job_from_target(prompt, target)?;
            cmd::cmd_run(config, job, flags, cmd::RunMode::Change).await?
        }
        Commands::Repair {
            prompt,
            notes,
            target,
            flags,
        } => {
            let job = cmd::job_from_target(prompt, target)?;
            let mode = cmd::RunMode::Repair {
                notes: notes.clone(),
            };
            cmd::cmd_run(config, job, flags, mode).await?
        }
        Commands::Batch {
            file,
            repair,
            flags,
        } => cmd::cmd_batch(config, file, *repair, flags).await?,
        Commands::Submit { file, flags } => cmd::cmd_submit(config, file, flags).await?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?;
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
