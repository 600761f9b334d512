//! Optional YAML configuration file.
//!
//! Command-line arguments and environment variables override any value read
//! here; missing values fall back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_BIND_ADDRESS: &str = "[::]:3000";
pub const DEFAULT_DATA_DIRECTORY: &str = "./data";
pub const DEFAULT_ASSETS_DIRECTORY: &str = "./assets";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid bind address {0:?}")]
    BindAddress(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_connector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_registration: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_directory: Option<PathBuf>,
}

impl FileConfig {
    /// The defaults every unset value falls back to.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            bind_address: Some(DEFAULT_BIND_ADDRESS.to_string()),
            db_connector: None,
            data_directory: Some(PathBuf::from(DEFAULT_DATA_DIRECTORY)),
            open_registration: Some(false),
            app_name: None,
            assets_directory: Some(PathBuf::from(DEFAULT_ASSETS_DIRECTORY)),
        }
    }

    /// Read `path`. A missing file is created with the defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Self::default()),
            Ok(contents) => serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "Configuration file {} not found, writing defaults",
                    path.display()
                );
                let defaults = Self::defaults();
                defaults.save(path)?;
                Ok(defaults)
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let yaml = serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, yaml).map_err(write_error)
    }
}

/// Accepts `host:port`, `[v6]:port` and the host-less `:port`.
///
/// # Errors
/// Returns an error if the address cannot be parsed.
pub fn parse_bind_address(address: &str) -> Result<SocketAddr, ConfigError> {
    let address = address.trim();
    let candidate = if address.starts_with(':') {
        format!("[::]{address}")
    } else {
        address.to_string()
    };
    candidate
        .parse()
        .map_err(|_| ConfigError::BindAddress(address.to_string()))
}
