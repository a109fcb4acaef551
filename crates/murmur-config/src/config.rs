//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Connection and outbound publishing settings.
    pub network: NetworkConfig,
    /// Snapshot interpolation and interest settings.
    pub sync: SyncConfig,
    /// Local player identity used for the join handshake.
    pub identity: IdentityConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network/connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket URL of the world server.
    pub server_url: String,
    /// How long `connect` waits for the server's welcome, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Rate at which local position updates are published (Hz).
    pub publish_rate_hz: u32,
    /// First reconnect delay in milliseconds.
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound on the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up.
    pub reconnect_max_attempts: u32,
}

/// Where snapshot timestamps come from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimestampSource {
    /// Stamp snapshots with the local clock when the frame is ingested.
    #[default]
    Arrival,
    /// Use the server's `timestampMs` from the frame.
    Server,
}

/// Remote-entity smoothing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// How far behind the newest data rendering runs, in milliseconds.
    pub render_delay_ms: u64,
    /// Maximum snapshots retained per remote entity.
    pub snapshot_capacity: usize,
    /// Exponential smoothing rate (per second) used while starved of data.
    pub smoothing_rate: f32,
    /// Hidden entities are recycled after this long without reappearing.
    pub hidden_retention_ms: u64,
    /// Clock domain used to stamp incoming snapshots.
    pub timestamp_source: TimestampSource,
    /// Render tick rate of the headless client (Hz).
    pub render_rate_hz: u32,
}

/// Local player identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable player id. Empty means "generate one at startup".
    pub player_id: String,
    /// Display name sent in the join command.
    pub username: String,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            connect_timeout_ms: 5_000,
            publish_rate_hz: 20,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            render_delay_ms: 100,
            snapshot_capacity: 30,
            smoothing_rate: 10.0,
            hidden_retention_ms: 30_000,
            timestamp_source: TimestampSource::Arrival,
            render_rate_hz: 60,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            player_id: String::new(),
            username: "Player".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Default per-user config directory (`<config_dir>/murmur`), falling back to
/// the working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("murmur"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
