//! Runtime configuration.
//!
//! Values come from command-line flags (or their `GITSERVE_*` environment
//! variables), then an optional JSON file, then built-in defaults.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::credentials::DEFAULT_KEY_PATH;

pub const DEFAULT_ADDRESS: &str = ":8080";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const CONFIG_FILE_NAME: &str = ".gitserve.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid remote {0:?}: {1}")]
    InvalidRemote(String, &'static str),

    #[error("invalid listen address {value:?}: {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("refresh interval must be greater than zero")]
    ZeroInterval,
}

/// Contents of a `.gitserve.json` file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub private_key: Option<String>,
    pub password: Option<String>,
    pub address: Option<String>,
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
    pub cache_dir: Option<PathBuf>,
    pub shallow: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given, otherwise the first of
    /// `~/.gitserve.json` and `./.gitserve.json` that exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidates = dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .into_iter()
            .chain(std::iter::once(PathBuf::from(CONFIG_FILE_NAME)));

        for candidate in candidates {
            if candidate.is_file() {
                log::debug!("Using config file {}", candidate.display());
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub remote: String,
    pub private_key: Option<String>,
    pub password: Option<String>,
    pub address: Option<String>,
    pub interval: Option<Duration>,
    pub cache_dir: Option<PathBuf>,
    pub shallow: bool,
    pub config: Option<PathBuf>,
}

/// Fully resolved settings for one run.
#[derive(Clone, PartialEq)]
pub struct Config {
    pub remote: String,
    pub key_path: String,
    pub passphrase: Option<String>,
    pub address: SocketAddr,
    pub interval: Duration,
    /// Pinned storage directory; a temporary one is used when unset.
    pub cache_dir: Option<PathBuf>,
    pub shallow: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("remote", &self.remote)
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("address", &self.address)
            .field("interval", &self.interval)
            .field("cache_dir", &self.cache_dir)
            .field("shallow", &self.shallow)
            .finish()
    }
}

impl Config {
    /// Discover the config file and merge it with `overrides`.
    pub fn load(overrides: Overrides) -> Result<Self, ConfigError> {
        let file = FileConfig::discover(overrides.config.as_deref())?;
        Self::resolve(overrides, file)
    }

    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self, ConfigError> {
        let remote = validate_remote(overrides.remote)?;

        let address = overrides
            .address
            .or(file.address)
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let address = parse_listen_address(&address)?;

        let interval = overrides
            .interval
            .or(file.interval)
            .unwrap_or(DEFAULT_INTERVAL);
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(Self {
            remote,
            key_path: overrides
                .private_key
                .or(file.private_key)
                .unwrap_or_else(|| DEFAULT_KEY_PATH.to_string()),
            passphrase: overrides.password.or(file.password),
            address,
            interval,
            cache_dir: overrides.cache_dir.or(file.cache_dir),
            shallow: overrides.shallow || file.shallow.unwrap_or(false),
        })
    }
}

fn validate_remote(remote: String) -> Result<String, ConfigError> {
    let trimmed = remote.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidRemote(remote, "must not be empty"));
    }
    if trimmed
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ConfigError::InvalidRemote(
            remote,
            "must not contain whitespace or control characters",
        ));
    }
    Ok(trimmed.to_string())
}

/// Parse `host:port`, or `:port` meaning every interface.
pub fn parse_listen_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        value: value.to_string(),
        reason,
    };

    let candidate = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => value.to_string(),
    };

    if let Ok(addr) = candidate.parse::<SocketAddr>() {
        return Ok(addr);
    }

    candidate
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("host did not resolve".to_string()))
}
