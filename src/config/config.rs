use parking_lot::RwLock;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use super::{cli::CliConfig, settings::Settings, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub mgmt_addr: SocketAddr,
    pub log_level: LogLevel,
    pub settings: Settings,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Async because the settings file is read with non-blocking IO.
    /// Panics on a bad settings file: do not start with a bad state.
    pub async fn init() {
        CliConfig::init();

        Self::load().await;
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    async fn load() {
        let cli = CliConfig::snapshot();

        let settings = match cli.config_file_location.as_deref() {
            Some(path) => Settings::from_file(path)
                .await
                .unwrap_or_else(|e| panic!("failed to load settings from {:?}: {e}", path)),
            None => Settings::default(),
        };

        let next = Config {
            listen_addr: cli.listen_addr,
            mgmt_addr: cli.mgmt_addr,
            log_level: cli.log_level,
            settings,
        };

        if let Some(handle) = ROOT_CONFIG.get() {
            *handle.write() = next;
        } else {
            let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
        }
    }

    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
