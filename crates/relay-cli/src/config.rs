//! Configuration file management for relay.
//!
//! Provides a TOML-based config file at `~/.config/relay/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use relay_core::StreamConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub stream: StreamSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Idle seconds before a keepalive frame is sent.
    pub keepalive_secs: u64,
    /// Optional cap on events buffered for a run with no subscriber.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffered_events: Option<usize>,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            keepalive_secs: StreamConfig::DEFAULT_KEEPALIVE_SECS,
            max_buffered_events: None,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the relay config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/relay` or `~/.config/relay`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("relay");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("relay")
}

/// Return the path to the relay config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line; `None` defers to the next layer.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub keepalive_secs: Option<u64>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    pub stream: StreamConfig,
}

/// Parse an optional env var, failing loudly on malformed values.
fn env_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key} env var is not valid: {raw:?}")),
        Err(_) => Ok(None),
    }
}

impl RelayConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// A missing config file is fine; a malformed one is an error.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file_config = if config_path().exists() {
            Some(load_config()?)
        } else {
            None
        };
        Self::resolve_with(cli, file_config.unwrap_or_default())
    }

    /// Resolve against an already-loaded config file.
    ///
    /// - bind: `--bind` > `RELAY_BIND` > `server.bind`
    /// - port: `--port` > `RELAY_PORT` > `server.port`
    /// - keepalive: `--keepalive-secs` > `RELAY_KEEPALIVE_SECS` > `stream.keepalive_secs`
    /// - buffer cap: `RELAY_MAX_BUFFERED_EVENTS` > `stream.max_buffered_events`
    pub fn resolve_with(cli: &CliOverrides, file: ConfigFile) -> Result<Self> {
        let bind = match cli.bind.clone() {
            Some(bind) => bind,
            None => env_var::<String>("RELAY_BIND")?.unwrap_or(file.server.bind),
        };

        let port = match cli.port {
            Some(port) => port,
            None => env_var::<u16>("RELAY_PORT")?.unwrap_or(file.server.port),
        };

        let keepalive_secs = match cli.keepalive_secs {
            Some(secs) => secs,
            None => env_var::<u64>("RELAY_KEEPALIVE_SECS")?.unwrap_or(file.stream.keepalive_secs),
        };
        anyhow::ensure!(keepalive_secs > 0, "keepalive interval must be at least 1 second");

        let max_buffered_events = env_var::<usize>("RELAY_MAX_BUFFERED_EVENTS")?
            .or(file.stream.max_buffered_events)
            .filter(|max| *max > 0);

        Ok(Self {
            bind,
            port,
            stream: StreamConfig::new(Duration::from_secs(keepalive_secs), max_buffered_events),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
