// ABOUTME: Entry point for the ecorun command-line runner
// ABOUTME: Parses arguments, installs logging and dispatches to the run and prune commands

use clap::{Parser, Subcommand};
use colored::*;
use ecorun_config::constants::RUST_LOG;
use ecorun_sandbox::StatsMode;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "ecorun")]
#[command(about = "Run untrusted code in a sandbox and estimate its energy use")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a job description and print the result as JSON
    Run {
        /// Path to the job description JSON file
        #[arg(long, short)]
        job: PathBuf,

        /// Stats backend: `cli` (docker stats polling) or `stream` (Docker API)
        #[arg(long)]
        stats: Option<StatsMode>,

        /// Print the result on a single line
        #[arg(long)]
        compact: bool,
    },
    /// Remove sandboxes left behind by interrupted runs
    Prune,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match handle_command(cli.command).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Run {
            job,
            stats,
            compact,
        } => cli::run::run_command(&job, stats, compact).await,
        Commands::Prune => cli::prune::prune_command().await.map(|_| true),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(RUST_LOG).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
