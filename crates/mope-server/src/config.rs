//! Server command-line configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mope_core::TreeConfig;

/// Default listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:65432";

#[derive(Parser, Debug, Clone)]
#[command(name = "mope-server")]
#[command(about = "Order-revealing index server over deterministic ciphertexts")]
pub struct ServerArgs {
    /// Address to accept client sessions on
    #[arg(long, env = "MOPE_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Row database file
    #[arg(long, env = "MOPE_DB", default_value = "mope.redb")]
    pub db: PathBuf,

    /// Keep rows in memory only (nothing survives a restart)
    #[arg(long)]
    pub memory: bool,

    /// JSON tree config file
    #[arg(long, env = "MOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the balance threshold from the config file
    #[arg(long, env = "MOPE_BALANCE_THRESHOLD")]
    pub balance_threshold: Option<u32>,

    /// Seconds a session may stay silent before it is dropped
    #[arg(
        long,
        env = "MOPE_SESSION_TIMEOUT",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub session_timeout: u64,

    /// Expose Prometheus metrics on this address
    #[arg(long, env = "MOPE_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerArgs {
    /// Config file (or defaults), then command-line overrides
    pub fn tree_config(&self) -> mope_core::Result<TreeConfig> {
        let mut config = match &self.config {
            Some(path) => TreeConfig::load(path)?,
            None => TreeConfig::default(),
        };
        if let Some(threshold) = self.balance_threshold {
            config.balance_threshold = threshold;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn session_idle_limit(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }
}
