//! `caduceus` command-line interface.

use clap::Parser;

mod cli;
mod commands;
mod corpus;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("caduceus error: {error:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Ask {
            request,
            user,
            multi_backend,
            json,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::ask(config, &request, user, multi_backend, json).await?;
            Ok(0)
        }
        Commands::Verify {
            draft,
            bundle,
            aggressive,
        } => {
            let passed = commands::verify(&draft, &bundle, aggressive)?;
            Ok(if passed { 0 } else { 2 })
        }
        Commands::CheckConfig { file } => {
            commands::check_config(&file)?;
            Ok(0)
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
