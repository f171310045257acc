use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moas_detector::lens::moas::LOG_FILE;
use moas_detector::MoasConfig;
use tracing::{debug, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod commands;

use commands::classify::ClassifyArgs;
use commands::detect::DetectCmdArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.moas-detector.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect MOAS prefixes in a directory of MRT routing table dumps
    Detect(DetectCmdArgs),

    /// Check whether prefixes or AS numbers are bogons
    Classify(ClassifyArgs),
}

/// Log to stderr, and to `log_file` when given.
fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let level = match debug {
        true => Level::TRACE,
        false => Level::INFO,
    };

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Arc::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = MoasConfig::new(&cli.config)?;

    let log_file = match &cli.command {
        Commands::Detect(args) => Some(args.output_dir(&config).join(LOG_FILE)),
        Commands::Classify(_) => None,
    };
    init_tracing(cli.debug, log_file.as_deref())?;
    debug!("configuration:\n{}", config.summary());

    match cli.command {
        Commands::Detect(args) => commands::detect::run(&config, args),
        Commands::Classify(args) => commands::classify::run(args),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
