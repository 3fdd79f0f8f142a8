//! CLI entry point for rust-daq
//!
//! Runs a scan against the simulated readout board:
//! ```bash
//! rust-daq scan --config config/scan.toml
//! rust-daq scan --channels 4 --analysis-channels 0,1,2,3
//! ```
//!
//! Print the effective configuration (file + `RUST_DAQ_*` environment):
//! ```bash
//! rust-daq check-config --config config/scan.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_daq::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use rust_daq::logging::{self, OutputFormat};
use rust_daq::runner::{render_report, run_scan};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust-daq")]
#[command(about = "Staged multi-channel readout and scan orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan on the mock readout board
    Scan {
        /// Scan configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Number of per-channel event queues
        #[arg(long)]
        channels: Option<usize>,

        /// Channels to histogram and analyze (comma separated)
        #[arg(long, value_delimiter = ',')]
        analysis_channels: Option<Vec<u32>>,

        /// Log output format
        #[arg(long, value_enum)]
        log_format: Option<OutputFormat>,
    },

    /// Validate a configuration and print the effective values
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            config,
            channels,
            analysis_channels,
            log_format,
        } => {
            let mut config = load_config(&config)?;
            if let Some(channels) = channels {
                config.pipeline.channel_count = channels;
            }
            if let Some(analysis_channels) = analysis_channels {
                config.pipeline.analysis_channels = analysis_channels;
            }
            if let Some(format) = log_format {
                config.application.log_format = format;
            }
            logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
            run(config).await
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<ScanConfig> {
    ScanConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run(config: ScanConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let scan_cancel = cancel.clone();
    let mut scan = tokio::task::spawn_blocking(move || run_scan(&config, scan_cancel));

    let report = tokio::select! {
        joined = &mut scan => joined??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling scan");
            cancel.cancel();
            // The orchestrator still disables the hardware before returning
            scan.await??
        }
    };

    info!(scan = report.scan, "Scan finished");
    print!("{}", render_report(&report));
    Ok(())
}
