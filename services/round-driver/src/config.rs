use anyhow::Context;
use engine::config::{DriverConfig, EngineConfig, StoreBackend, StoreConfig};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub metrics_port: u16,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub driver: DriverConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let metrics_port = env::var("DRIVER_METRICS_PORT")
            .unwrap_or_else(|_| "9091".to_string())
            .parse()
            .context("invalid value for DRIVER_METRICS_PORT")?;
        let config = Config {
            metrics_port,
            store: StoreConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            driver: DriverConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// A standalone driver must share state with the API process
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.store.backend == StoreBackend::Redis,
            "round-driver needs STORE_BACKEND=redis; use DRIVER_EMBEDDED=true with the memory store"
        );
        anyhow::ensure!(self.driver.tick_ms > 0, "DRIVER_TICK_MS must be positive");
        Ok(())
    }
}
