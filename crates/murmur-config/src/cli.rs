//! Command-line argument parsing for the murmur client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// murmur client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "murmur-client", about = "Headless world-state sync client")]
pub struct CliArgs {
    /// WebSocket URL of the world server.
    #[arg(long)]
    pub server: Option<String>,

    /// Display name sent with the join command.
    #[arg(long)]
    pub username: Option<String>,

    /// Stable player id (generated when omitted).
    #[arg(long)]
    pub player_id: Option<String>,

    /// Render delay for snapshot interpolation, in milliseconds.
    #[arg(long)]
    pub render_delay_ms: Option<u64>,

    /// Welcome handshake timeout, in milliseconds.
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref url) = args.server {
            self.network.server_url = url.clone();
        }
        if let Some(ref name) = args.username {
            self.identity.username = name.clone();
        }
        if let Some(ref id) = args.player_id {
            self.identity.player_id = id.clone();
        }
        if let Some(delay) = args.render_delay_ms {
            self.sync.render_delay_ms = delay;
        }
        if let Some(timeout) = args.connect_timeout_ms {
            self.network.connect_timeout_ms = timeout;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("ws://10.0.0.2:8080/ws".to_string()),
            username: Some("Ava".to_string()),
            render_delay_ms: Some(120),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_url, "ws://10.0.0.2:8080/ws");
        assert_eq!(config.identity.username, "Ava");
        assert_eq!(config.sync.render_delay_ms, 120);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "murmur-client",
            "--username",
            "Ava",
            "--connect-timeout-ms",
            "2500",
        ]);
        assert_eq!(args.username.as_deref(), Some("Ava"));
        assert_eq!(args.connect_timeout_ms, Some(2500));
        assert!(args.server.is_none());
    }
}
