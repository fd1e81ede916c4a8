use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cmd::{
    self, abandon::AbandonArgs, hash::HashArgs, run::RunArgs, status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "provision-wizard",
    about = "Resumable provisioning questionnaires with deferred side effects",
    version,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Log debug output to stderr (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start or resume a session and answer its questions
    Run(RunArgs),
    /// Show the answers recorded for a stored session
    Status(StatusArgs),
    /// Roll back a stored session and delete it
    Abandon(AbandonArgs),
    /// Print the version hash of a workflow definition
    Hash(HashArgs),
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run(args) => cmd::run::run(args),
        Commands::Status(args) => cmd::status::run(args),
        Commands::Abandon(args) => cmd::abandon::run(args),
        Commands::Hash(args) => cmd::hash::run(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .try_init();
}
