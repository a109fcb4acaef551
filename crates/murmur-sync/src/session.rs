//! Connection session: transport lifecycle, join handshake, outbound commands.
//!
//! `connect` is the only operation that waits: it opens a transport, sends
//! `join`, and resolves when `welcome` arrives or fails after the connect
//! timeout. Everything else is synchronous. Inbound frames are queued by the
//! transport and drained on the caller's context with [`Session::pump`], so
//! the router, reconciler and entity views only ever see strict interleaving.
//!
//! Explicit [`Session::disconnect`] and an unexpected transport close both go
//! through one cleanup path that drops every entity view. Callers tell them
//! apart through [`DisconnectReason`].

use std::sync::Arc;
use std::time::Duration;

use murmur_net::{
    Command, ConnectionState, ConnectionStateWatch, Connector, JoinCommand, MessageError,
    PlayerId, PositionUpdate, ReconnectConfig, ReconnectError, ReconnectState, Transport,
    TransportError, TransportEvent,
};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::interest::{InterestReconciler, PoseSink};
use crate::publish::PublishThrottle;
use crate::relay::EventRelay;
use crate::router::{ProtocolRouter, RouteOutcome};
use crate::settings::SyncSettings;

/// Who we are for the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub player_id: PlayerId,
    pub username: String,
}

impl LocalIdentity {
    pub fn new(player_id: impl Into<PlayerId>, username: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            username: username.into(),
        }
    }
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Session::disconnect`] was called.
    Requested,
    /// The transport closed underneath us.
    ConnectionLost,
}

/// Errors returned by [`Session::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no welcome from server within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection closed before welcome")]
    ClosedBeforeWelcome,

    #[error("session is not disconnected")]
    AlreadyConnected,

    #[error("failed to encode join: {0}")]
    Encode(#[from] MessageError),
}

/// Errors returned by [`Session::reconnect`].
#[derive(Debug, thiserror::Error)]
pub enum ReconnectFailed {
    /// The backoff allowed no attempt at all.
    #[error(transparent)]
    Backoff(#[from] ReconnectError),

    #[error("gave up after {attempts} attempts: {last_error}")]
    GaveUp {
        attempts: u32,
        #[source]
        last_error: ConnectError,
    },
}

/// Running counters, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_applied: u64,
    pub events_relayed: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub server_errors: u64,
    pub commands_sent: u64,
    pub dropped_sends: u64,
}

type DisconnectHandler = Box<dyn FnMut(DisconnectReason) + Send>;

/// One client's connection to the world server.
pub struct Session<C: Connector> {
    connector: C,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    transport: Option<Transport>,
    state: ConnectionStateWatch,
    identity: Option<LocalIdentity>,
    router: ProtocolRouter,
    publish: PublishThrottle,
    on_disconnect: Option<DisconnectHandler>,
    last_disconnect: Option<DisconnectReason>,
    stats: SessionStats,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, settings: SyncSettings, clock: Arc<dyn Clock>) -> Self {
        let reconciler = InterestReconciler::new(settings.clone(), Arc::clone(&clock));
        let publish = PublishThrottle::new(settings.publish_interval_ms);
        Self {
            connector,
            settings,
            clock,
            transport: None,
            state: ConnectionStateWatch::new(),
            identity: None,
            router: ProtocolRouter::new(reconciler, EventRelay::new()),
            publish,
            on_disconnect: None,
            last_disconnect: None,
            stats: SessionStats::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the transport, send `join`, and wait for `welcome`.
    ///
    /// Messages that arrive before `welcome` are routed normally. On failure
    /// the transport is closed and no entity state is left behind.
    pub async fn connect(&mut self, identity: LocalIdentity) -> Result<PlayerId, ConnectError> {
        if self.state.current() != ConnectionState::Disconnected {
            return Err(ConnectError::AlreadyConnected);
        }
        self.state.transition(ConnectionState::Connecting);
        tracing::info!(
            player_id = %identity.player_id,
            username = %identity.username,
            "connecting"
        );

        let timeout = self.settings.connect_timeout;
        let result = tokio::time::timeout(timeout, self.handshake(&identity)).await;
        match result {
            Ok(Ok(player_id)) => {
                self.state.transition(ConnectionState::Connected);
                self.publish.reset();
                self.identity = Some(identity);
                tracing::info!(%player_id, "connected");
                Ok(player_id)
            }
            Ok(Err(e)) => {
                tracing::warn!("connect failed: {e}");
                self.abort_connect();
                Err(e)
            }
            Err(_) => {
                tracing::warn!(?timeout, "connect timed out waiting for welcome");
                self.abort_connect();
                Err(ConnectError::Timeout(timeout))
            }
        }
    }

    async fn handshake(&mut self, identity: &LocalIdentity) -> Result<PlayerId, ConnectError> {
        let transport = self.connector.open().await?;
        let join = Command::Join(JoinCommand {
            player_id: identity.player_id.clone(),
            username: identity.username.clone(),
        })
        .encode()?;
        transport.send(join)?;
        self.transport = Some(transport);
        self.router
            .reconciler_mut()
            .set_local_id(identity.player_id.clone());

        loop {
            let event = match self.transport.as_mut() {
                Some(transport) => transport.recv().await,
                None => return Err(ConnectError::ClosedBeforeWelcome),
            };
            match event {
                TransportEvent::Text(text) => {
                    if let RouteOutcome::Welcome(player_id) = self.route(&text) {
                        return Ok(player_id);
                    }
                }
                TransportEvent::Closed => return Err(ConnectError::ClosedBeforeWelcome),
            }
        }
    }

    fn abort_connect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.router.reconciler_mut().clear();
        self.state.transition(ConnectionState::Disconnected);
    }

    /// Send `leave`, close the transport and drop all entity state.
    pub fn disconnect(&mut self) {
        if self.state.current() == ConnectionState::Disconnected {
            return;
        }
        if let Some(transport) = &self.transport
            && let Ok(leave) = Command::Leave.encode()
        {
            let _ = transport.send(leave);
        }
        tracing::info!("disconnecting");
        self.cleanup(DisconnectReason::Requested);
    }

    fn cleanup(&mut self, reason: DisconnectReason) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.router.reconciler_mut().clear();
        self.state.transition(ConnectionState::Disconnected);
        self.last_disconnect = Some(reason);
        if let Some(handler) = self.on_disconnect.as_mut() {
            handler(reason);
        }
    }

    /// Retry [`connect`](Self::connect) with exponential backoff.
    pub async fn reconnect(
        &mut self,
        identity: LocalIdentity,
        config: ReconnectConfig,
    ) -> Result<PlayerId, ReconnectFailed> {
        let max_attempts = config.max_attempts;
        let mut backoff = ReconnectState::new(config);
        let mut last_error = None;

        while let Some(delay) = backoff.next_delay() {
            tracing::info!(attempt = backoff.attempts(), ?delay, "reconnecting");
            tokio::time::sleep(delay).await;
            match self.connect(identity.clone()).await {
                Ok(player_id) => {
                    tracing::info!(attempts = backoff.attempts(), "reconnected");
                    return Ok(player_id);
                }
                Err(e) => {
                    tracing::warn!(attempt = backoff.attempts(), "reconnect attempt failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last_error) => Err(ReconnectFailed::GaveUp {
                attempts: backoff.attempts(),
                last_error,
            }),
            None => Err(ReconnectError::MaxAttemptsExhausted(max_attempts).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn route(&mut self, text: &str) -> RouteOutcome {
        let outcome = self.router.dispatch(text);
        match &outcome {
            RouteOutcome::Frame(summary) => {
                self.stats.frames_applied += 1;
                self.stats.events_relayed += summary.events_delivered as u64;
            }
            RouteOutcome::Event {
                delivered: true, ..
            } => self.stats.events_relayed += 1,
            RouteOutcome::ServerError(_) => self.stats.server_errors += 1,
            RouteOutcome::Ignored(_) => self.stats.ignored += 1,
            RouteOutcome::Malformed => self.stats.malformed += 1,
            _ => {}
        }
        outcome
    }

    /// Route every inbound message queued since the last call, in arrival
    /// order. A transport close ends the session with
    /// [`DisconnectReason::ConnectionLost`]. Returns the number routed.
    pub fn pump(&mut self) -> usize {
        let mut routed = 0;
        loop {
            let event = match self.transport.as_mut() {
                Some(transport) => transport.try_recv(),
                None => break,
            };
            match event {
                None => break,
                Some(TransportEvent::Text(text)) => {
                    self.route(&text);
                    routed += 1;
                }
                Some(TransportEvent::Closed) => {
                    tracing::warn!("connection lost");
                    self.cleanup(DisconnectReason::ConnectionLost);
                    break;
                }
            }
        }
        routed
    }

    /// Advance visible entity views to `now_ms` and feed them to `sink`.
    pub fn advance_entities(&mut self, now_ms: i64, sink: &mut impl PoseSink) -> usize {
        self.router.reconciler_mut().advance_all(now_ms, sink)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send a command. Silently dropped (returns `false`) unless connected.
    pub fn send(&mut self, command: &Command) -> bool {
        let transport = match &self.transport {
            Some(transport) if self.state.is_connected() => transport,
            _ => {
                tracing::trace!(tag = command.tag(), "dropping command while disconnected");
                self.stats.dropped_sends += 1;
                return false;
            }
        };
        let sent = match command.encode() {
            Ok(text) => transport.send(text).is_ok(),
            Err(e) => {
                tracing::warn!(tag = command.tag(), "failed to encode command: {e}");
                false
            }
        };
        if sent {
            self.stats.commands_sent += 1;
        } else {
            self.stats.dropped_sends += 1;
        }
        sent
    }

    /// Send an `update` if the publish interval has elapsed.
    pub fn publish_position(&mut self, update: PositionUpdate, now_ms: i64) -> bool {
        if !self.state.is_connected() || !self.publish.ready(now_ms) {
            return false;
        }
        self.send(&Command::Update(update))
    }

    pub fn send_chat(&mut self, message: impl Into<String>) -> bool {
        self.send(&Command::Chat {
            message: message.into(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Observe connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Install the handler called whenever the session ends.
    pub fn on_disconnect(&mut self, handler: impl FnMut(DisconnectReason) + Send + 'static) {
        self.on_disconnect = Some(Box::new(handler));
    }

    pub fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.last_disconnect
    }

    pub fn identity(&self) -> Option<&LocalIdentity> {
        self.identity.as_ref()
    }

    pub fn entities(&self) -> &InterestReconciler {
        self.router.reconciler()
    }

    pub fn relay_mut(&mut self) -> &mut EventRelay {
        self.router.relay_mut()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
