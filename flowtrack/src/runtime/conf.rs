use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::runtime::{
    cli::Cli,
    conf::{conf_serde::level, flow::FlowConf},
};

pub mod conf_serde;
pub mod flow;

/// Settings for a tracker run: logging, flow table sizing, and flow aging.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Conf {
    /// The file this configuration was read from, if any. Never serialized;
    /// kept so the configuration can be reloaded from the same place.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// The logging level for the application.
    #[serde(with = "level")]
    pub log_level: Level,

    /// Initial number of slots reserved in the flow table.
    /// - Default: 4096
    #[serde(default = "defaults::flow_table_capacity")]
    pub flow_table_capacity: usize,

    /// Idle timeouts for aging flows out of the table.
    #[serde(default)]
    pub flow: FlowConf,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            config_path: None,
            log_level: Level::INFO,
            flow_table_capacity: defaults::flow_table_capacity(),
            flow: FlowConf::default(),
        }
    }
}

mod defaults {
    pub fn flow_table_capacity() -> usize {
        4096
    }
}

impl Conf {
    /// Builds the configuration from defaults, the optional YAML file, and the
    /// command line, in increasing order of priority. Environment variables
    /// reach this function through `Cli`, which reads the `FLOWTRACK_*` variables.
    ///
    /// # Errors
    /// * `ConfigError::NoConfigFile` - the configured path does not exist.
    /// * `ConfigError::InvalidConfigPath` - the path is not a regular file.
    /// * `ConfigError::InvalidExtension` - the file is not `.yaml` or `.yml`.
    /// * `ConfigError::Extraction` - the merged values do not form a valid `Conf`.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment.merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;

        conf.config_path = config_path_to_store;
        Ok((conf, cli))
    }

    /// Re-reads the configuration file on top of the current values.
    ///
    /// Command line flags and environment variables are not re-read; the
    /// current configuration is the base the file is layered on.
    ///
    /// # Errors
    /// Returns `ConfigError::NoConfigFile` when this configuration was not
    /// loaded from a file, or `ConfigError::Extraction` when the file no
    /// longer parses.
    pub fn reload(&self) -> Result<Self, ConfigError> {
        let Some(path) = &self.config_path else {
            return Err(ConfigError::NoConfigFile);
        };

        let mut conf: Conf = Figment::from(Serialized::defaults(self))
            .merge(Yaml::file(path))
            .extract()?;
        conf.config_path = self.config_path.clone();

        Ok(conf)
    }
}

/// Checks that `path` is an existing regular file with a YAML extension.
fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    // is_file() is false both for missing paths and for directories
    if !path.is_file() {
        if path.exists() {
            return Err(ConfigError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        }
        return Err(ConfigError::NoConfigFile);
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfigError::InvalidExtension(ext.to_string())),
        None => Err(ConfigError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The specified configuration file does not exist.
    #[error("no config file provided")]
    NoConfigFile,

    /// The path exists but is not a file (e.g., it's a directory).
    #[error("path '{0}' is not a valid file")]
    InvalidConfigPath(String),

    /// The file has an unsupported extension.
    #[error("invalid file extension '.{0}', expected 'yaml' or 'yml'")]
    InvalidExtension(String),

    #[error("configuration error: {0}")]
    Extraction(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Extraction(Box::new(e))
    }
}
