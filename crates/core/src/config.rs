//! TOML-based configuration for gitdoc.
//!
//! The storage section is handed to [`DocumentStore`](crate::DocumentStore)
//! explicitly; nothing here is process-global.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Document storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default `127.0.0.1:4567`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Largest accepted request body in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:4567".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Where documents live and how commits are attributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding `documents/` and `merges/`.
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// Author name used when a document has no `user_id`.
    #[serde(default = "default_author")]
    pub default_author: String,

    /// Domain appended to author names to form commit e-mail addresses.
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
}

fn default_root_path() -> PathBuf {
    PathBuf::from("./data")
}
fn default_author() -> String {
    "anonymous".into()
}
fn default_email_domain() -> String {
    "gitdoc.local".into()
}

impl StorageConfig {
    /// Storage rooted at `root_path` with default identities.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            default_author: default_author(),
            email_domain: default_email_domain(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.root_path".into(),
                detail: "root path must not be empty".into(),
            });
        }
        if self.storage.default_author.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.default_author".into(),
                detail: "default author must not be empty".into(),
            });
        }
        if self.server.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "server.listen".into(),
                detail: format!("'{}' is not a socket address", self.server.listen),
            });
        }
        if self.server.body_limit_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.body_limit_bytes".into(),
                detail: "body limit must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
