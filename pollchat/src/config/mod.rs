//! Configuration system for the `PollChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pollchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error. The session token is
//! never read from the file.

use std::path::PathBuf;
use std::time::Duration;

use pollchat_proto::ids::UserId;
use pollchat_proto::user::CurrentUser;

use crate::contacts::{DirectoryConfig, PresenceMode};
use crate::conversation::ConversationConfig;
use crate::poller::PollerConfig;
use crate::session::{Credential, Session};

/// Errors that can occur when loading configuration.
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

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
    session: SessionFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    poll_interval_ms: Option<u64>,
    presence_every_ticks: Option<u64>,
    poll_window: Option<usize>,
    message_page_size: Option<usize>,
    contact_page_size: Option<usize>,
    dedup_tolerance_secs: Option<u64>,
    presence_mode: Option<PresenceMode>,
    event_buffer: Option<usize>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<i64>,
    username: Option<String>,
    avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Sync core tuning (used by `ChatClient`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on every backend request.
    pub request_timeout: Duration,
    /// Time between poll ticks.
    pub poll_interval: Duration,
    /// Presence refresh cadence in active ticks.
    pub presence_every: u64,
    /// Messages fetched per poll.
    pub poll_window: usize,
    /// Page size for conversation history.
    pub message_page_size: usize,
    /// Page size for the contact list.
    pub contact_page_size: usize,
    /// Time window for matching untokened server copies to pending sends.
    pub dedup_tolerance: Duration,
    /// How presence refreshes are applied.
    pub presence_mode: PresenceMode,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(3),
            presence_every: 10,
            poll_window: 20,
            message_page_size: 30,
            contact_page_size: 30,
            dedup_tolerance: Duration::from_secs(60),
            presence_mode: PresenceMode::Replace,
            event_buffer: 64,
        }
    }
}

impl SyncConfig {
    /// Settings for the conversation store.
    #[must_use]
    pub const fn conversation(&self) -> ConversationConfig {
        ConversationConfig {
            page_size: self.message_page_size,
            dedup_tolerance: self.dedup_tolerance,
        }
    }

    /// Settings for the contact directory.
    #[must_use]
    pub const fn directory(&self) -> DirectoryConfig {
        DirectoryConfig {
            page_size: self.contact_page_size,
            presence_mode: self.presence_mode,
        }
    }

    /// Settings for the poller.
    #[must_use]
    pub const fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            presence_every: self.presence_every,
            window: self.poll_window,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL the endpoint scripts live under.
    pub base_url: String,

    // -- Session --
    /// Bearer token (CLI or environment only).
    pub token: Option<Credential>,
    /// Session owner's id.
    pub user_id: Option<i64>,
    /// Session owner's display name.
    pub username: Option<String>,
    /// Session owner's avatar reference.
    pub avatar: String,

    // -- Startup --
    /// Peer to open on start.
    pub peer: Option<i64>,
    /// Initial contact search.
    pub search: String,

    // -- Sync --
    /// Sync core tuning.
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token: None,
            user_id: None,
            username: None,
            avatar: String::new(),
            peer: None,
            search: String::new(),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or the default file exists but is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let sync_defaults = defaults.sync;

        Self {
            base_url: cli
                .base_url
                .clone()
                .or_else(|| file.server.base_url.clone())
                .unwrap_or(defaults.base_url),
            token: cli.token.as_deref().map(Credential::new),
            user_id: cli.user_id.or(file.session.user_id),
            username: cli
                .username
                .clone()
                .or_else(|| file.session.username.clone()),
            avatar: cli
                .avatar
                .clone()
                .or_else(|| file.session.avatar.clone())
                .unwrap_or(defaults.avatar),
            peer: cli.peer,
            search: cli.search.clone().unwrap_or(defaults.search),
            sync: SyncConfig {
                request_timeout: file
                    .server
                    .request_timeout_secs
                    .map_or(sync_defaults.request_timeout, Duration::from_secs),
                poll_interval: cli
                    .poll_interval_ms
                    .or(file.sync.poll_interval_ms)
                    .map_or(sync_defaults.poll_interval, Duration::from_millis),
                presence_every: file
                    .sync
                    .presence_every_ticks
                    .unwrap_or(sync_defaults.presence_every),
                poll_window: file.sync.poll_window.unwrap_or(sync_defaults.poll_window),
                message_page_size: file
                    .sync
                    .message_page_size
                    .unwrap_or(sync_defaults.message_page_size),
                contact_page_size: file
                    .sync
                    .contact_page_size
                    .unwrap_or(sync_defaults.contact_page_size),
                dedup_tolerance: file
                    .sync
                    .dedup_tolerance_secs
                    .map_or(sync_defaults.dedup_tolerance, Duration::from_secs),
                presence_mode: file
                    .sync
                    .presence_mode
                    .unwrap_or(sync_defaults.presence_mode),
                event_buffer: file
                    .sync
                    .event_buffer
                    .unwrap_or(sync_defaults.event_buffer),
            },
        }
    }

    /// The session described by this configuration, if it names a token,
    /// a user id and a username.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        let credential = self.token.clone()?;
        let user = CurrentUser {
            id: UserId::new(self.user_id?),
            username: self.username.clone()?,
            avatar: self.avatar.clone(),
        };
        Some(Session::new(user, credential))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Headless client for a polled two-party chat")]
pub struct CliArgs {
    /// Base URL of the chat backend.
    #[arg(long, env = "POLLCHAT_BASE_URL")]
    pub base_url: Option<String>,

    /// Session token issued by the backend.
    #[arg(long, env = "POLLCHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your user id.
    #[arg(long, env = "POLLCHAT_USER_ID")]
    pub user_id: Option<i64>,

    /// Your display name.
    #[arg(long, env = "POLLCHAT_USERNAME")]
    pub username: Option<String>,

    /// Your avatar reference.
    #[arg(long)]
    pub avatar: Option<String>,

    /// Peer to open on start.
    #[arg(long)]
    pub peer: Option<i64>,

    /// Initial contact search.
    #[arg(long)]
    pub search: Option<String>,

    /// Poll interval in milliseconds.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Path to config file (default: `~/.config/pollchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "POLLCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/pollchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("pollchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
