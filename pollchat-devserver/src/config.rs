//! Configuration system for the `PollChat` development backend.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pollchat-devserver/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use crate::store::SeedUser;

/// Errors that can occur when loading devserver configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the devserver.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DevServerConfigFile {
    server: ServerFileConfig,
    users: Option<Vec<SeedUser>>,
}

/// `[server]` section of the devserver config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    latency_ms: Option<u64>,
    echo_client_token: Option<bool>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the devserver.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PollChat development backend")]
pub struct DevServerCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "POLLCHAT_DEVSERVER_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/pollchat-devserver/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Artificial delay added to every reply, in milliseconds.
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Do not echo client tokens on stored messages.
    #[arg(long)]
    pub no_echo_client_token: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "POLLCHAT_DEVSERVER_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved devserver configuration.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Artificial reply delay.
    pub latency: Duration,
    /// Whether stored messages carry the sender's client token.
    pub echo_client_token: bool,
    /// Users the backend starts with.
    pub users: Vec<SeedUser>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            latency: Duration::ZERO,
            echo_client_token: true,
            users: vec![
                SeedUser::new(1, "alice", "alice-token"),
                SeedUser::new(2, "bob", "bob-token"),
                SeedUser::new(3, "carol", "carol-token"),
            ],
            log_level: "info".to_string(),
        }
    }
}

impl DevServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &DevServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &DevServerCliArgs, file: DevServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            latency: cli
                .latency_ms
                .or(file.server.latency_ms)
                .map_or(defaults.latency, Duration::from_millis),
            echo_client_token: !cli.no_echo_client_token
                && file
                    .server
                    .echo_client_token
                    .unwrap_or(defaults.echo_client_token),
            users: file.users.unwrap_or(defaults.users),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the devserver.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<DevServerConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(DevServerConfigFile::default());
    };
    let path = config_dir.join("pollchat-devserver").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DevServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
