use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level parser for the `caduceus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "caduceus",
    version,
    about = "Grounded answers to clinical-operations policy questions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Runtime configuration file (YAML)
    #[arg(short, long, global = true, env = "CADUCEUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one request through the pipeline against the built-in corpus
    Ask {
        /// The question to answer
        request: String,

        /// Caller identifier recorded on the run
        #[arg(short, long)]
        user: Option<String>,

        /// Query every backend and merge, instead of the default backend only
        #[arg(short, long)]
        multi_backend: bool,

        /// Print the run view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a draft answer against an evidence bundle, offline
    Verify {
        /// Draft answer (JSON)
        draft: PathBuf,

        /// Evidence bundle (JSON)
        bundle: PathBuf,

        /// Apply the aggressive PHI pattern set
        #[arg(long)]
        aggressive: bool,
    },

    /// Validate a runtime configuration file and print the effective config
    CheckConfig {
        file: PathBuf,
    },
}
