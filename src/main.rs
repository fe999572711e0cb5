use shelly_energy_meter::{LoggingHost, Platform, PlatformConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "SHELLY_EM_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Shelly 3EM energy meter bridge");
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Using config file {}", config_path);
    let config = PlatformConfig::load(&config_path)?;

    let mut platform = Platform::new(config, Arc::new(LoggingHost::default()));
    platform.did_finish_launching().await;

    tokio::signal::ctrl_c().await?;
    platform.shutdown();
    Ok(())
}
