//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::Config;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    NotFound(PathBuf),
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(path) => write!(f, "Config file not found: {}", path.display()),
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => ConfigError::Io(e),
    })?;
    parse_config(&content)
}

/// Holds the last successfully loaded configuration for one file.
///
/// A failed [`ConfigStore::load`] never replaces the stored value, so
/// [`ConfigStore::get`] keeps returning the last good config.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Option<Arc<Config>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: None,
        }
    }

    /// Path of the tracked configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. On success the new value becomes the current one.
    pub fn load(&mut self) -> Result<Arc<Config>, ConfigError> {
        let config = Arc::new(load_config(&self.path)?);
        tracing::debug!(
            path = %self.path.display(),
            downstreams = config.mcp_servers.len(),
            "Configuration loaded"
        );
        self.current = Some(Arc::clone(&config));
        Ok(config)
    }

    /// Current configuration, loading it on first use.
    pub fn get(&mut self) -> Result<Arc<Config>, ConfigError> {
        match &self.current {
            Some(config) => Ok(Arc::clone(config)),
            None => self.load(),
        }
    }

    /// Last good configuration without touching the file.
    pub fn last_good(&self) -> Option<Arc<Config>> {
        self.current.clone()
    }

    /// Reinstate a previously accepted configuration.
    pub fn restore(&mut self, config: Arc<Config>) {
        self.current = Some(config);
    }
}
