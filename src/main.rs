//! CLI Entry Point for stage-scan
//!
//! Provides command-line interface for:
//! - Running the interactive scan shell against real or simulated devices
//! - Checking a configuration file
//!
//! # Usage
//!
//! ```bash
//! stage-scan shell --config config/stage_scan.toml
//! stage-scan shell --simulate
//! stage-scan check-config
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scan_core::{Position, PulseGenerator, StageControl};
use scan_driver_asi::Ms2000Driver;
use scan_driver_mock::{MockGenerator, MockStage};
use scan_driver_rigol::Dg800Driver;
use stage_scan::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use stage_scan::{logging, shell, ScanController};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser)]
#[command(name = "stage-scan")]
#[command(about = "Tiled serpentine stage scan controller", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive scan shell
    Shell {
        /// Use simulated devices instead of the configured hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScanConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Shell { simulate } => run_shell(config, simulate).await,
        Commands::CheckConfig => {
            println!("{:#?}", config);
            println!("Configuration OK");
            Ok(())
        }
    }
}

async fn run_shell(config: ScanConfig, simulate: bool) -> Result<()> {
    let (stage, generator) = if simulate {
        simulated_devices()
    } else {
        open_devices(&config).await?
    };

    let controller = ScanController::new(stage, generator, config.controller_options());
    let printer = shell::spawn_event_printer(controller.subscribe());

    let stdin = BufReader::new(tokio::io::stdin());
    shell::run_shell(&controller, &config.scan.to_input(), stdin, tokio::io::stdout()).await?;

    // Dropping the controller closes the event channel and ends the printer
    drop(controller);
    let _ = printer.await;
    info!("Shell closed");
    Ok(())
}

type Devices = (Arc<dyn StageControl>, Arc<dyn PulseGenerator>);

fn simulated_devices() -> Devices {
    info!("Using simulated stage and generator");
    let stage = MockStage::at(Position::new(0.0, 0.0, 0.0)).with_latency(Duration::from_millis(20));
    (Arc::new(stage), Arc::new(MockGenerator::new()))
}

async fn open_devices(config: &ScanConfig) -> Result<Devices> {
    let capacity = config.timing.queue_capacity;

    let stage = Ms2000Driver::open(&config.stage, capacity)
        .await
        .with_context(|| format!("Failed to open stage on {}", config.stage.port))?;
    let generator = Dg800Driver::open(&config.generator.device_config(), capacity)
        .await
        .context("Failed to connect to trigger generator")?;

    Ok((Arc::new(stage), Arc::new(generator)))
}
