//! Builds the listener configuration from the config file and command line.
//!
//! Precedence: command line / environment, then the TOML file, then defaults.

use std::path::Path;

use open_live::ListenerConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::Result;

/// Contents of the TOML configuration file.
///
/// ```toml
/// [listener]
/// room_key = "ABCDEF123"
/// app_id = 0
/// retry_delay_ms = 5000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listener: ListenerConfig,
}

impl AppConfig {
    /// Load the config file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        debug!(path = %path.display(), "Loading configuration file");
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply command-line and environment overrides.
    pub fn into_listener_config(self, args: &Args) -> ListenerConfig {
        let mut config = self.listener;

        if let Some(room_key) = &args.room_key {
            config.room_key = room_key.clone();
        }
        if let Some(app_id) = args.app_id {
            config.app_id = app_id;
        }
        if let Some(api_base) = &args.api_base {
            config.api_base = Some(api_base.clone());
        }

        config
    }
}
