//! Engine configuration.
//!
//! Settings come from the command line first, then `TRAFFICGEN_WORKSPACE` and
//! `RUST_LOG`, then the answers file named on the command line. [`ConfigManager`]
//! folds them into one [`AppConfig`] before anything touches the workspace.

pub mod app_config;
pub mod cli;

pub use app_config::{AppConfig, EnvSnapshot, LogLevel, WORKSPACE_ENV};
pub use cli::{CliCommand, CliConfig};

use anyhow::Result;

/// Command line and environment, resolved once at startup
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub app: AppConfig,
}

impl ConfigManager {
    /// Parse `std::env::args` and snapshot the process environment
    pub fn from_cli_and_env() -> Result<Self> {
        let cli_config = CliConfig::from_args()?;
        let app_config = AppConfig::from_cli(&cli_config)?;

        Ok(Self { app: app_config })
    }

    pub fn validate(&self) -> Result<()> {
        self.app.validate()
    }

    /// Install the stderr subscriber at the configured level
    pub fn init_logging(&self) -> Result<()> {
        self.app.init_logging()
    }
}
