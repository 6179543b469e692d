//! Configuration for the `tahweel-realtime` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tahweel/client.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::ws::WsOptions;
use crate::typing::TypingTimings;

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

    /// The hub URL is not a valid `ws://` or `wss://` URL.
    #[error("invalid hub url {url:?}: {reason}")]
    InvalidHubUrl {
        /// The rejected value.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A typing timing is zero.
    #[error("typing.{0} must be greater than zero")]
    ZeroTiming(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    typing: TypingFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    hub_url: Option<String>,
    user_id: Option<String>,
    display_name: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
    identify_timeout_secs: Option<u64>,
    conversation: Option<String>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    ttl_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    throttle_ms: Option<u64>,
    idle_stop_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Hub WebSocket URL.
    pub hub_url: Option<String>,
    /// Local user id sent in `Identify`.
    pub user_id: Option<String>,
    /// Name shown to peers in typing indicators. Falls back to the user id.
    pub display_name: Option<String>,
    /// Session token forwarded to the hub.
    pub token: Option<String>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for the hub's `Ready` answer.
    pub identify_timeout: Duration,
    /// Conversation whose typing channel the CLI watches.
    pub conversation: Option<String>,

    // -- Typing --
    /// Typing indicator timings.
    pub typing: TypingTimings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            user_id: None,
            display_name: None,
            token: None,
            connect_timeout: Duration::from_secs(10),
            identify_timeout: Duration::from_secs(5),
            conversation: None,
            typing: TypingTimings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/tahweel/client.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the resolved values fail validation.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let typing = &file.typing;

        Self {
            hub_url: cli.hub_url.clone().or_else(|| file.network.hub_url.clone()),
            user_id: cli.user_id.clone().or_else(|| file.network.user_id.clone()),
            display_name: cli
                .display_name
                .clone()
                .or_else(|| file.network.display_name.clone()),
            token: cli.token.clone().or_else(|| file.network.token.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            identify_timeout: file
                .network
                .identify_timeout_secs
                .map_or(defaults.identify_timeout, Duration::from_secs),
            conversation: cli
                .conversation
                .clone()
                .or_else(|| file.network.conversation.clone()),
            typing: TypingTimings {
                ttl: typing
                    .ttl_ms
                    .map_or(defaults.typing.ttl, Duration::from_millis),
                sweep_interval: typing
                    .sweep_interval_ms
                    .map_or(defaults.typing.sweep_interval, Duration::from_millis),
                throttle: typing
                    .throttle_ms
                    .map_or(defaults.typing.throttle, Duration::from_millis),
                idle_stop: typing
                    .idle_stop_ms
                    .map_or(defaults.typing.idle_stop, Duration::from_millis),
            },
        }
    }

    /// Check the hub URL scheme and that every typing timing is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHubUrl`] or [`ConfigError::ZeroTiming`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(raw) = &self.hub_url {
            let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidHubUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidHubUrl {
                    url: raw.clone(),
                    reason: format!("unsupported scheme {:?}", parsed.scheme()),
                });
            }
        }

        let t = &self.typing;
        for (name, value) in [
            ("ttl_ms", t.ttl),
            ("sweep_interval_ms", t.sweep_interval),
            ("throttle_ms", t.throttle),
            ("idle_stop_ms", t.idle_stop),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTiming(name));
            }
        }
        Ok(())
    }

    /// The name announced in typing events: display name, else user id.
    #[must_use]
    pub fn effective_display_name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.user_id.as_deref())
    }

    /// Connection options for [`WsTransport::connect`].
    ///
    /// [`WsTransport::connect`]: crate::transport::ws::WsTransport::connect
    #[must_use]
    pub fn to_ws_options(&self) -> WsOptions {
        WsOptions {
            token: self.token.clone(),
            connect_timeout: self.connect_timeout,
            identify_timeout: self.identify_timeout,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Presence and typing indicators over a realtime hub")]
pub struct CliArgs {
    /// WebSocket URL of the hub, e.g. `ws://127.0.0.1:9100/ws`.
    #[arg(long, env = "TAHWEEL_HUB_URL")]
    pub hub_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "TAHWEEL_USER_ID")]
    pub user_id: Option<String>,

    /// Name shown to peers while you type.
    #[arg(long, env = "TAHWEEL_DISPLAY_NAME")]
    pub display_name: Option<String>,

    /// Session token forwarded to the hub.
    #[arg(long, env = "TAHWEEL_TOKEN")]
    pub token: Option<String>,

    /// Conversation id whose typing channel to watch.
    #[arg(long)]
    pub conversation: Option<String>,

    /// Path to config file (default: `~/.config/tahweel/client.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TAHWEEL_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
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
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("tahweel").join("client.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
