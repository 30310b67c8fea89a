//! Hotswap offline CLI
//!
//! Works on class binaries outside a running process: print their shape, run
//! the structural verifier, and dry-run a manipulation plan through the same
//! dispatcher the agent installs.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "HOTSWAP_LOG";

#[derive(Parser)]
#[command(name = "hotswap")]
#[command(about = "Inspect, verify and rewrite hotswap class binaries", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (overridden by HOTSWAP_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    color: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a class summary
    Inspect {
        /// Class binary
        file: PathBuf,
    },

    /// Run the structural verifier
    Verify {
        /// Class binaries
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Apply a manipulation plan and write the rewritten binaries
    Rewrite {
        /// Manipulation plan (TOML)
        #[arg(short, long)]
        plan: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = "rewritten")]
        out: PathBuf,
        /// Agent configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Class binaries
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let failed = match cli.command {
        Commands::Inspect { file } => commands::inspect::execute(&file, &cli.color)?,
        Commands::Verify { files } => commands::verify::execute(&files, &cli.color)?,
        Commands::Rewrite {
            plan,
            out,
            config,
            files,
        } => commands::rewrite::execute(
            commands::rewrite::RewriteArgs {
                plan,
                out,
                config,
                files,
            },
            &cli.color,
        )?,
    };

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
