pub mod abandon;
pub mod exams;
pub mod result;
pub mod start;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;

use ktiger_client::config::{load_config_from, KtigerConfig};

/// Options shared by every subcommand.
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

impl GlobalOptions {
    /// Load the config and apply command-line overrides.
    pub fn load_config(&self) -> Result<KtigerConfig> {
        let mut config = load_config_from(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }
}
