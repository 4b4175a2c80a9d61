//! Configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("plugin timeout must be at least 1 second")]
    InvalidPluginTimeout,

    #[error("plugin weightings must be positive (got {0} for {1})")]
    InvalidPluginWeight(i64, String),

    #[error("introspection port cannot be 0")]
    InvalidWebPort,
}

/// Loads the engine configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. The YAML file, when one is given
    /// 3. Environment variables (`ADAPTATION_ENGINE_*`)
    pub fn load(file: Option<&std::path::Path>) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = figment.merge(Yaml::file_exact(file));
        }
        let config: Config = figment
            .merge(Env::prefixed("ADAPTATION_ENGINE_").split("__"))
            .extract()
            .context("failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a configuration after loading or merging.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.plugins.timeout_secs == 0 {
            return Err(ConfigError::InvalidPluginTimeout);
        }
        if config.plugins.default_weighting < 1 {
            return Err(ConfigError::InvalidPluginWeight(
                config.plugins.default_weighting,
                "default_weighting".into(),
            ));
        }
        for weighting in &config.plugins.weightings {
            if weighting.weight < 1 {
                return Err(ConfigError::InvalidPluginWeight(
                    weighting.weight,
                    weighting.name.clone(),
                ));
            }
        }

        if config.webbo.port == 0 {
            return Err(ConfigError::InvalidWebPort);
        }

        Ok(())
    }
}
