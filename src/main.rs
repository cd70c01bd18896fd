// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jhbuild_bootstrap::process::CancellationState;
use jhbuild_bootstrap::{Bootstrap, BootstrapConfig, Outcome};
use nix::sys::signal::{SigSet, Signal};
use std::fs::File;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "jhbuild-bootstrap")]
#[command(author, version, about = "Bootstrap jhbuild and its prerequisites, then build a module", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Installation prefix
    #[arg(short, long)]
    prefix: Option<PathBuf>,

    /// Directory for downloads, extracted sources and the jhbuild checkout
    #[arg(short, long)]
    download_dir: Option<PathBuf>,

    /// Number of parallel make jobs
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Reuse existing downloads without verifying their checksum
    #[arg(long)]
    skip_checksum: bool,

    /// Capture build output and only show it when a step fails
    #[arg(short, long)]
    quiet_builds: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install missing prerequisites and jhbuild, then build a module
    Build {
        /// Module to build
        module: String,

        /// Moduleset file to use instead of jhbuild's default
        #[arg(short, long)]
        moduleset: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Block before any thread exists so every thread inherits the mask
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("Failed to block termination signals")?;

    let config = load_config(&cli)?;
    let mut bootstrap = Bootstrap::new(config)?;
    spawn_signal_handler(signals, bootstrap.cancellation())?;

    let outcome = match cli.command {
        Commands::Build { module, moduleset } => match moduleset {
            Some(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("Failed to open moduleset {}", path.display()))?;
                bootstrap.install_module_with_moduleset(file, &module)?
            }
            None => bootstrap.install_module(&module)?,
        },
    };

    for line in bootstrap.report().summary() {
        info!("{}", line);
    }

    match outcome {
        Outcome::Completed(()) => {
            info!("Bootstrap complete");
            Ok(())
        }
        Outcome::Cancelled => {
            warn!("Bootstrap cancelled");
            std::process::exit(130);
        }
    }
}

fn load_config(cli: &Cli) -> Result<BootstrapConfig> {
    let mut config = match &cli.config {
        Some(path) => BootstrapConfig::load(path)?,
        None => BootstrapConfig::default(),
    };
    if let Some(prefix) = &cli.prefix {
        config = config.with_prefix(prefix);
    }
    if let Some(dir) = &cli.download_dir {
        config = config.with_download_dir(dir);
    }
    if let Some(jobs) = cli.jobs {
        config = config.with_jobs(jobs);
    }
    if cli.skip_checksum {
        config = config.with_skip_checksum(true);
    }
    if cli.quiet_builds {
        config = config.with_capture(true);
    } else if cli.config.is_none() {
        config = config.with_capture(false);
    }
    config = config.with_progress(std::io::stderr().is_terminal());
    config.validate()?;
    Ok(config)
}

/// Turn SIGINT/SIGTERM into a cancellation of the running bootstrap
fn spawn_signal_handler(signals: SigSet, cancellation: Arc<CancellationState>) -> Result<()> {
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            loop {
                match signals.wait() {
                    Ok(signal) => {
                        warn!("Received {:?}, cancelling", signal);
                        cancellation.cancel();
                    }
                    Err(e) => {
                        warn!("Waiting for signals failed: {}", e);
                        return;
                    }
                }
            }
        })
        .context("Failed to start signal thread")?;
    Ok(())
}
