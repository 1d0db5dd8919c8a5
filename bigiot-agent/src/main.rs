//! BigIoT agent entry point.
//!
//! ```text
//! bigiot-agent                              Run the device session
//! bigiot-agent --config <path>              Load a custom config TOML
//! bigiot-agent --gen-config                 Write default config to stdout
//! bigiot-agent --ssid <s> --secret <p>      Save the network identity and exit
//! ```

use std::path::PathBuf;

use bigiot_core::{BigiotError, Client, DataPoint, FileIdentityStore, IdentityStore, NetworkIdentity};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bigiot_agent::config::{AgentConfig, ConfigError};
use bigiot_agent::device::{LevelActuator, SysfsSource};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "bigiot-agent", about = "BigIoT device agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "bigiot-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Network SSID to save.
    #[arg(long, requires = "secret")]
    ssid: Option<String>,

    /// Network secret to save.
    #[arg(long, requires = "ssid")]
    secret: Option<String>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let (config, load_error) = match AgentConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (AgentConfig::default(), Some(e)),
    };

    // Init tracing before reporting how the config was loaded.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match load_error {
        Some(e @ ConfigError::Missing(_)) => info!("{e}; using defaults"),
        Some(e) => warn!("{e}; using defaults"),
        None => debug!(path = %cli.config.display(), "config loaded"),
    }

    let store = FileIdentityStore::new(&config.identity.path);

    // --ssid / --secret: provision and exit.
    if let (Some(ssid), Some(secret)) = (cli.ssid, cli.secret) {
        store.save(&NetworkIdentity::new(ssid, secret)).await?;
        println!("Network identity saved to {}.", store.path().display());
        return Ok(());
    }

    match store.load().await {
        Ok(identity) => info!(ssid = %identity.ssid, "network identity loaded"),
        Err(BigiotError::NotConfigured) => {
            error!("no network identity saved; run with --ssid and --secret first");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(field) = config.missing_device_field() {
        error!("{field} is not set in {}", cli.config.display());
        std::process::exit(2);
    }

    info!("bigiot-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("broker: {}:{}", config.broker.host, config.broker.port);
    info!("device: {} ({})", config.device.name, config.device.id);
    info!("sensor: {}", config.sensor.path.display());

    let source = SysfsSource::new(&config.sensor.path, config.sensor.divisor);
    let data_point = DataPoint::new(config.device.data_point_id.as_str(), source);
    let mut client = Client::new(
        config.credentials(),
        config.client.clone(),
        config.client.connector(),
        LevelActuator::new(),
        data_point,
    );

    // Ctrl-C handler.
    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        shutdown.cancel();
    });

    client.run().await?;

    Ok(())
}
