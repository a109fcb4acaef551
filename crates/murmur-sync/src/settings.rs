//! Runtime knobs derived from [`murmur_config::Config`].

use std::time::Duration;

use murmur_config::{Config, TimestampSource};

use crate::entity::SmoothingParams;

/// Everything the sync pipeline needs from configuration, in ready-to-use units.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// How long `connect` waits for `welcome`.
    pub connect_timeout: Duration,
    /// Minimum gap between published position updates.
    pub publish_interval_ms: i64,
    pub smoothing: SmoothingParams,
    pub snapshot_capacity: usize,
    /// Hidden entities older than this are recycled.
    pub hidden_retention_ms: i64,
    pub timestamp_source: TimestampSource,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        let rate = config.network.publish_rate_hz.max(1);
        Self {
            connect_timeout: config.network.connect_timeout(),
            publish_interval_ms: 1_000 / i64::from(rate),
            smoothing: SmoothingParams {
                render_delay_ms: millis(config.sync.render_delay_ms),
                smoothing_rate: config.sync.smoothing_rate,
            },
            snapshot_capacity: config.sync.snapshot_capacity,
            hidden_retention_ms: millis(config.sync.hidden_retention_ms),
            timestamp_source: config.sync.timestamp_source,
        }
    }
}

fn millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}
