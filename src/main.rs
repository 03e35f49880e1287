//! spectra-opc server binary.
//!
//! Loads configuration, starts the publishing server against the simulated
//! spectrometer and runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use spectra_opc::config::{ServerConfig, DEFAULT_CONFIG_PATH};
use spectra_opc::instrument::{DeviceInfo, MockSpectrometer};
use spectra_opc::server::ProtocolServer;
use spectra_opc::shutdown::ShutdownController;
use spectra_opc::{logging, SpectraServer};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Spectrometer OPC UA server
#[derive(Parser, Debug)]
#[command(name = "spectra-opc", version)]
#[command(about = "Publish spectrometer readings as OPC UA variables")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of simulated spectrometers attached at start-up
    #[arg(long, default_value_t = 1)]
    simulated_devices: usize,

    /// Override the configured log level
    #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,
}

fn simulated_driver(devices: usize) -> MockSpectrometer {
    (1..=devices)
        .fold(MockSpectrometer::builder(), |builder, index| {
            builder.device(DeviceInfo::new(format!("MOCK{index:04}"), "MockSpec2000"))
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load_from(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.application.log_level = level;
    }

    logging::init(&config.application);
    info!(
        name = %config.application.name,
        config = %args.config.display(),
        "Starting spectra-opc"
    );

    let app = SpectraServer::new(config).context("Failed to build address space")?;
    info!(
        endpoint = app.server().endpoint(),
        namespace_index = app.registry().namespace_index(),
        variables = app.registry().len(),
        "Address space built"
    );
    let driver = Arc::new(simulated_driver(args.simulated_devices));

    let controller = ShutdownController::new();
    let signal = controller.signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        controller.request();
    });

    app.run(driver, signal).await.context("Server terminated with an error")?;
    info!("spectra-opc stopped");
    Ok(())
}
