//! Headless murmur client.
//!
//! Connects to a world server, follows every remote participant through
//! snapshot interpolation at the render rate, publishes a scripted local
//! flight path at the publish rate, and reconnects with backoff when the
//! server goes away.
//!
//! Run with: `cargo run -p murmur-client -- --server ws://127.0.0.1:8080/ws`

mod flight;
mod hud;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use murmur_config::{CliArgs, Config, default_config_dir};
use murmur_net::{Connector, ReconnectConfig, WebSocketConnector};
use murmur_sync::{
    Clock, DisconnectReason, LocalIdentity, Session, SyncSettings, SystemClock,
};
use rand::Rng;
use tracing::{error, info, warn};

/// How often the HUD logs a summary.
const REPORT_INTERVAL_MS: i64 = 5_000;

/// How often `config.ron` is checked for edits.
const CONFIG_POLL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let on_disk = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error ({e}), using defaults");
            Config::default()
        }
    };
    let mut config = on_disk.clone();
    config.apply_cli_overrides(&args);

    murmur_log::init_logging(
        Some(config_dir.join("logs").as_path()),
        cfg!(debug_assertions),
        Some(&config),
    );

    if config.identity.player_id.is_empty() {
        config.identity.player_id = format!("player-{:08x}", rand::rng().random::<u32>());
    }
    let identity = LocalIdentity::new(
        config.identity.player_id.clone(),
        config.identity.username.clone(),
    );

    info!("murmur client {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Server: {} | Player: {} ({})",
        config.network.server_url, identity.username, identity.player_id
    );
    info!(
        "Render delay: {}ms | Snapshots: {} | Publish: {}Hz | Render: {}Hz",
        config.sync.render_delay_ms,
        config.sync.snapshot_capacity,
        config.network.publish_rate_hz,
        config.sync.render_rate_hz,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let connector = WebSocketConnector::new(config.network.server_url.clone());
    let mut session = Session::new(connector, SyncSettings::from(&config), Arc::clone(&clock));
    session.relay_mut().on_chat(|chat| info!("[chat] {}: {}", chat.username, chat.message));

    let reconnect = ReconnectConfig::from_millis(
        config.network.reconnect_initial_delay_ms,
        config.network.reconnect_max_delay_ms,
        config.network.reconnect_max_attempts,
    );

    if let Err(e) = session.connect(identity.clone()).await {
        warn!("initial connect failed: {e}");
        if !reconnect_until(&mut session, &identity, &reconnect, ctrl_c()).await {
            return;
        }
    }

    let watch = ConfigWatch {
        dir: config_dir,
        on_disk,
    };
    run(&mut session, &config, watch, &identity, &reconnect, clock.as_ref()).await;
    info!("Shutting down");
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Retry the connection with backoff until it succeeds, the attempts run
/// out, or `shutdown` resolves. Returns `true` once connected again.
async fn reconnect_until<C: Connector>(
    session: &mut Session<C>,
    identity: &LocalIdentity,
    config: &ReconnectConfig,
    shutdown: impl Future<Output = ()>,
) -> bool {
    let outcome = tokio::select! {
        result = session.reconnect(identity.clone(), config.clone()) => Some(result),
        () = shutdown => None,
    };
    match outcome {
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            error!("giving up on multiplayer: {e}");
            false
        }
        None => {
            info!("shutdown requested while reconnecting");
            session.disconnect();
            false
        }
    }
}

/// Last known contents of `config.ron`, before CLI overrides.
struct ConfigWatch {
    dir: PathBuf,
    on_disk: Config,
}

async fn run(
    session: &mut Session<WebSocketConnector>,
    config: &Config,
    mut watch: ConfigWatch,
    identity: &LocalIdentity,
    reconnect: &ReconnectConfig,
    clock: &dyn Clock,
) {
    let render_hz = config.sync.render_rate_hz.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / render_hz);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut config_poll = tokio::time::interval(CONFIG_POLL);

    let mut flight = flight::CircuitFlight::default();
    let mut hud = hud::Hud::new();
    let mut last_tick_ms = clock.now_ms();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now_ms();
                let dt = (now - last_tick_ms).max(0) as f32 / 1000.0;
                last_tick_ms = now;

                session.pump();
                if !session.is_connected() {
                    if session.last_disconnect() == Some(DisconnectReason::ConnectionLost) {
                        warn!("lost connection to {}", config.network.server_url);
                        if !reconnect_until(session, identity, reconnect, ctrl_c()).await {
                            return;
                        }
                        continue;
                    }
                    return;
                }

                flight.step(dt);
                session.publish_position(flight.update(now), now);
                session.advance_entities(now, &mut hud);
                hud.report(now, REPORT_INTERVAL_MS);
            }
            _ = config_poll.tick() => {
                match watch.on_disk.reload(&watch.dir) {
                    Ok(Some(changed)) => {
                        info!("config.ron changed; restart the client to apply it");
                        watch.on_disk = changed;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("config reload failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                session.disconnect();
                return;
            }
        }
    }
}
