use clap::Parser;
use parking_lot::RwLock;
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub listen_addr: SocketAddr,
    pub mgmt_addr: SocketAddr,
    pub config_file_location: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let cfg = Self::from_args();
            cfg.validate();
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| e.exit());

        Self {
            listen_addr: SocketAddr::from((args.host, args.port)),
            mgmt_addr: SocketAddr::from((args.mgmt_host, args.mgmt_port)),
            config_file_location: args.config_file,
            log_level: args.log_level,
        }
    }

    fn validate(&self) {
        if let Some(path) = self.config_file_location.as_deref() {
            must_exist_file(path, "--config / receptor-gateway.toml");
        }

        if self.listen_addr == self.mgmt_addr {
            panic!(
                "agent listener and management listener share {}",
                self.listen_addr
            );
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "receptor-gateway", version, about = "Job gateway for remote agents")]
struct Args {
    // IPv4 or IPv6 literal (e.g., 0.0.0.0, ::). Agents connect here.
    #[arg(long = "host", short = 'H', env = "RECEPTOR_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long = "port", short = 'p', env = "RECEPTOR_PORT", default_value_t = 8080)]
    port: u16,

    // Management listener; keep it on a private interface.
    #[arg(long = "mgmt-host", env = "RECEPTOR_MGMT_HOST", default_value = "127.0.0.1")]
    mgmt_host: IpAddr,

    #[arg(long = "mgmt-port", env = "RECEPTOR_MGMT_PORT", default_value_t = 9090)]
    mgmt_port: u16,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    // Optional; built-in defaults apply when absent.
    #[arg(long = "config", env = "RECEPTOR_CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("config not initialized; call CliConfig::init() first")
        .clone()
}

fn must_exist_file(path: &Path, hint: &str) {
    let md = fs::metadata(path).unwrap_or_else(|_| {
        panic!("required file missing: {} (from {hint})", path.display());
    });

    if !md.is_file() {
        panic!("path is not a file: {} (from {hint})", path.display());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
