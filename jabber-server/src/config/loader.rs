//! Configuration loader

use std::path::Path;

use jabber_utils::{config_file, BridgeError, Result};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            AppConfig::default()
        };
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| BridgeError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.queues.incoming_capacity == 0 || config.queues.outgoing_capacity == 0 {
            return Err(BridgeError::config("queue capacities must be at least 1"));
        }

        if config.queues.priority_lane_capacity == 0 {
            return Err(BridgeError::config(
                "priority_lane_capacity must be at least 1",
            ));
        }

        if config.inbox.capacity == 0 {
            return Err(BridgeError::config("inbox capacity must be at least 1"));
        }

        Ok(())
    }

    /// Load, apply env overrides, and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// XMPP_SERVER / XMPP_PORT override the file
    fn apply_env_overrides(config: &mut AppConfig) {
        if let Ok(server) = std::env::var("XMPP_SERVER") {
            if !server.is_empty() {
                config.xmpp.server = Some(server);
            }
        }
        if let Ok(port) = std::env::var("XMPP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.xmpp.port = Some(port);
            }
        }
    }

}
