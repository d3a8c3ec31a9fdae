// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use kinect_session::{DeviceSession, Driver, SessionConfig, SimulatedDriver};
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

#[derive(Parser)]
#[command(name = "kinect-session")]
#[command(about = "Stream RGB and depth frames from a structured-light depth camera")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/kinect-session/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the built-in simulated sensor instead of hardware
    #[arg(short, long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached devices
    List,

    /// Open a session and report frame statistics
    Probe {
        /// How long to stream
        #[arg(long, default_value = "5")]
        seconds: u64,
    },

    /// Show the camera in the terminal
    View,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=kinect_session=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::load_or_default(cli.config.as_deref());
    let driver = select_driver(cli.simulate);

    match cli.command {
        Commands::List => cli::list_devices(driver.as_ref()),
        Commands::Probe { seconds } => cli::probe(driver, config, seconds),
        Commands::View => {
            let mut session = DeviceSession::new(driver, config);
            kinect_session::terminal::run(&mut session)
        }
    }
}

#[cfg(all(target_arch = "x86_64", feature = "freedepth"))]
fn select_driver(simulate: bool) -> Arc<dyn Driver> {
    if simulate {
        Arc::new(SimulatedDriver::default())
    } else {
        Arc::new(kinect_session::backends::driver::FreedepthDriver::new())
    }
}

#[cfg(not(all(target_arch = "x86_64", feature = "freedepth")))]
fn select_driver(simulate: bool) -> Arc<dyn Driver> {
    if !simulate {
        tracing::warn!("Built without the freedepth feature, using the simulated sensor");
    }
    Arc::new(SimulatedDriver::default())
}
