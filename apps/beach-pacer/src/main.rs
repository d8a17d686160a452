mod cli;
mod telemetry;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    if let Err(err) = telemetry::init_tracing() {
        eprintln!("{err:#}");
    }

    let cli = Cli::parse();
    let outcome = tokio::select! {
        outcome = run(cli.command) => outcome,
        _ = signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Simulate {
            participants,
            countdown,
            state_file,
        } => cli::run_simulation(participants, countdown, state_file).await,
        Commands::Inspect { state_file } => cli::run_inspect(state_file).await,
    }
}
