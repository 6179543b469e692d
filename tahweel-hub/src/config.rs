//! Hub configuration: where to listen and how large client input may get.
//!
//! Values are layered, highest priority first: command line, environment
//! (`TAHWEEL_HUB_ADDR`, `TAHWEEL_HUB_LOG`), `~/.config/tahweel/hub.toml`,
//! then the defaults on [`HubConfig`] and [`HubLimits`].
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:9100"
//!
//! [limits]
//! max_frame_size = 16384
//! max_display_name_len = 64
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Worst-case UTF-8 width of one display name character.
const MAX_UTF8_CHAR_BYTES: usize = 4;

/// Errors raised while loading hub configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this layout.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// `bind_addr` is not an `ip:port` pair.
    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBindAddr {
        /// The rejected value.
        addr: String,
        /// Parser error.
        source: std::net::AddrParseError,
    },

    /// A limit is zero.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    /// A display name at the maximum length might not fit in one frame.
    #[error(
        "max_display_name_len {name_len} needs up to {needed} bytes, \
         more than max_frame_size {frame_size}"
    )]
    NameExceedsFrame {
        /// Configured display name limit in characters.
        name_len: usize,
        /// Bytes such a name can take in UTF-8.
        needed: usize,
        /// Configured frame limit in bytes.
        frame_size: usize,
    },
}

/// Per-connection input limits enforced by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubLimits {
    /// Largest inbound WebSocket frame the hub decodes, in bytes.
    pub max_frame_size: usize,
    /// Longest display name accepted on a typing signal, in characters.
    pub max_display_name_len: usize,
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024,
            max_display_name_len: 64,
        }
    }
}

impl HubLimits {
    /// Checks that both limits are usable together.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroLimit`] for a zero limit, or
    /// [`ConfigError::NameExceedsFrame`] when a maximum-length display name
    /// could be rejected by the frame limit first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size == 0 {
            return Err(ConfigError::ZeroLimit("max_frame_size"));
        }
        if self.max_display_name_len == 0 {
            return Err(ConfigError::ZeroLimit("max_display_name_len"));
        }
        let needed = self.max_display_name_len.saturating_mul(MAX_UTF8_CHAR_BYTES);
        if needed > self.max_frame_size {
            return Err(ConfigError::NameExceedsFrame {
                name_len: self.max_display_name_len,
                needed,
                frame_size: self.max_frame_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerSection,
    limits: LimitsSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LimitsSection {
    max_frame_size: Option<usize>,
    max_display_name_len: Option<usize>,
}

/// Command line of the `tahweel-hub` binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Tahweel realtime hub")]
pub struct HubCliArgs {
    /// Listen address, `ip:port`.
    #[arg(short, long, env = "TAHWEEL_HUB_ADDR")]
    pub bind: Option<String>,

    /// Config file (default: `~/.config/tahweel/hub.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest inbound frame in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Longest display name in characters.
    #[arg(long)]
    pub max_display_name_len: Option<usize>,

    /// Fallback log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "TAHWEEL_HUB_LOG")]
    pub log_level: String,
}

/// Resolved and validated hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Socket address the hub listens on.
    pub bind_addr: SocketAddr,
    /// Input limits handed to [`HubState`](crate::hub::HubState).
    pub limits: HubLimits,
    /// Log filter directive.
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
            limits: HubLimits::default(),
            log_level: "info".to_string(),
        }
    }
}

impl HubConfig {
    /// Reads the config file, layers the command line on top and validates
    /// the result.
    ///
    /// A missing file at the default location counts as empty; a missing
    /// file passed with `--config` is an error.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]: unreadable or malformed file, a bad bind address,
    /// or limits that fail [`HubLimits::validate`].
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = read_config_file(cli.config.as_deref())?;
        Self::from_layers(cli, &file)
    }

    fn from_layers(cli: &HubCliArgs, file: &HubConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = match cli.bind.as_deref().or(file.server.bind_addr.as_deref()) {
            Some(addr) => addr.parse().map_err(|source| ConfigError::InvalidBindAddr {
                addr: addr.to_string(),
                source,
            })?,
            None => defaults.bind_addr,
        };

        let limits = HubLimits {
            max_frame_size: cli
                .max_frame_size
                .or(file.limits.max_frame_size)
                .unwrap_or(defaults.limits.max_frame_size),
            max_display_name_len: cli
                .max_display_name_len
                .or(file.limits.max_display_name_len)
                .unwrap_or(defaults.limits.max_display_name_len),
        };
        limits.validate()?;

        Ok(Self {
            bind_addr,
            limits,
            log_level: cli.log_level.clone(),
        })
    }
}

fn read_config_file(explicit: Option<&Path>) -> Result<HubConfigFile, ConfigError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("tahweel").join("hub.toml"), false),
            None => return Ok(HubConfigFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(HubConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
