//! nia-sensor
//!
//! Headless host for the NIA biosensor. Binds the sensor over libusb, then
//! logs the EEG value and the detector classification on every tick until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use common::{EventBridge, HidBackend, create_event_bridge, setup_logging};
use sensor::config::SensorConfig;
use sensor::{DetectorMode, DeviceCatalog, RusbBackend, SensorHost};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nia-sensor")]
#[command(author, version, about = "NIA biosensor host")]
#[command(long_about = "
Reads the NIA biosensor over USB HID and reports the averaged EEG value
together with a blink (REM) or motion classification.

EXAMPLES:
    # Run with default config
    nia-sensor

    # Run with custom config
    nia-sensor --config /path/to/sensor.toml

    # List HID devices without binding one
    nia-sensor --list-devices

    # Use the motion detector with debug logging
    nia-sensor --algorithm motion-detection --log-level debug

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/nia-sensor/sensor.toml
    3. /etc/nia-sensor/sensor.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List devices on the configured interface class and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Detector algorithm, overrides the config file
    #[arg(short, long, value_enum)]
    algorithm: Option<DetectorMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = SensorConfig::default();
        let path = SensorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Logging depends on the config, so report how it was loaded afterwards
    let (mut config, origin) = match SensorConfig::load(args.config.clone()) {
        Ok((config, path)) => (config, Ok(path)),
        Err(e) if args.config.is_some() => {
            return Err(e.context("Failed to load configuration"));
        }
        Err(e) => (SensorConfig::default(), Err(e)),
    };

    if let Some(algorithm) = args.algorithm {
        config.detector.algorithm = algorithm;
    }

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.host.log_level.clone());
    setup_logging(&log_level).context("Failed to setup logging")?;

    info!("nia-sensor v{}", env!("CARGO_PKG_VERSION"));
    match origin {
        Ok(path) => info!("Loaded configuration from: {}", path.display()),
        Err(e) => warn!("Failed to load config: {:#}, using defaults", e),
    }
    info!("Log level: {}", log_level);

    let backend: Arc<dyn HidBackend> = Arc::new(
        RusbBackend::new(config.device.interface_class)
            .context("Failed to initialize libusb")?,
    );

    if args.list_devices {
        return list_devices_mode(backend, &config);
    }

    let (bridge, source) = create_event_bridge();
    let mut host = SensorHost::new(backend, config.clone(), source);

    if !host.initialize() {
        warn!(
            "Sensor {} not present, waiting for it to be plugged in",
            config.device.signature
        );
    }

    let result = run(&mut host, &bridge, &config).await;

    info!("Shutting down sensor host...");
    host.dispose();

    result
}

/// List devices on the configured interface class and exit
fn list_devices_mode(backend: Arc<dyn HidBackend>, config: &SensorConfig) -> Result<()> {
    let catalog = DeviceCatalog::new(backend);
    let devices = catalog
        .survey(config.device.interface_class)
        .context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for (path, identity) in devices {
        match identity {
            Some(identity) if identity == config.device.signature => {
                println!("  {}  {}  (sensor)", path, identity)
            }
            Some(identity) => println!("  {}  {}", path, identity),
            None => println!("  {}  (not accessible)", path),
        }
    }
    Ok(())
}

/// Tick until Ctrl+C, reacting to session and hot-plug events in between
async fn run(host: &mut SensorHost, bridge: &EventBridge, config: &SensorConfig) -> Result<()> {
    let mut ticker = tokio::time::interval(config.host.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to shutdown");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if host.is_active() {
                    let eeg = host.eeg_value();
                    let classification = host.classify();
                    info!("EEG {:>6.1}  {} {:>5.0}", eeg, config.detector.algorithm, classification);
                }
            }
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                return Ok(());
            }
            event = bridge.recv_session() => {
                let event = event.context("Session event channel closed")?;
                host.on_session_event(&event);
            }
            change = bridge.recv_change() => {
                let change = change.context("Device change channel closed")?;
                debug!("Device change: {:?}", change);
                host.on_device_change(&change);
            }
        }
    }
}
