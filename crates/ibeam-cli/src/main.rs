use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{inspect, run};

/// Iterative beam-search image-generation orchestrator.
#[derive(Parser)]
#[command(name = "ibeam")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Beam-search orchestrator for iterative image generation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session end-to-end.
    Run(run::RunArgs),
    /// Load an existing session's metadata.json and print a summary.
    Inspect(inspect::InspectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Inspect(args) => inspect::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["ibeam", "run", "--prompt", "a cat"]).expect("parse run");
        assert!(matches!(cli.command, Commands::Run(_)));

        let cli = Cli::try_parse_from(["ibeam", "inspect", "--session-dir", "/tmp/s"]).expect("parse inspect");
        assert!(matches!(cli.command, Commands::Inspect(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["ibeam", "run"]).is_err());
        assert!(Cli::try_parse_from(["ibeam", "inspect"]).is_err());
    }
}
