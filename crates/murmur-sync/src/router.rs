//! Inbound message routing.
//!
//! [`ProtocolRouter::dispatch`] decodes one text frame and hands it to exactly
//! one destination: the interest reconciler, the event relay, or the log.
//! Malformed frames and unknown tags are absorbed so a single bad message
//! never interrupts a healthy session.

use murmur_net::{EventTag, PlayerId, ServerMessage, decode_server_message};

use crate::interest::{FrameSummary, InterestReconciler};
use crate::relay::EventRelay;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handshake completed for this id.
    Welcome(PlayerId),
    /// A world-state frame was reconciled.
    Frame(FrameSummary),
    /// A participant left; `existed` says whether we had a view for it.
    PlayerLeft { id: PlayerId, existed: bool },
    /// A domain event was offered to the relay.
    Event { tag: EventTag, delivered: bool },
    /// The server reported an error.
    ServerError(String),
    /// Well-formed message with a tag this client does not handle.
    Ignored(String),
    /// Undecodable frame.
    Malformed,
}

/// Decodes inbound frames and dispatches them by tag.
pub struct ProtocolRouter {
    reconciler: InterestReconciler,
    relay: EventRelay,
}

impl ProtocolRouter {
    pub fn new(reconciler: InterestReconciler, relay: EventRelay) -> Self {
        Self { reconciler, relay }
    }

    /// Decode `raw` and route it. Never fails.
    pub fn dispatch(&mut self, raw: &str) -> RouteOutcome {
        let message = match decode_server_message(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "dropping malformed message");
                return RouteOutcome::Malformed;
            }
        };

        match message {
            ServerMessage::Welcome(welcome) => {
                self.reconciler.set_local_id(welcome.player_id.clone());
                if let Some(world) = &welcome.world_state {
                    self.reconciler.bootstrap(world);
                }
                RouteOutcome::Welcome(welcome.player_id)
            }
            ServerMessage::State(frame) => {
                RouteOutcome::Frame(self.reconciler.apply_frame(frame, &mut self.relay))
            }
            ServerMessage::PlayerLeft(left) => {
                let existed = self.reconciler.retire(&left.player_id);
                RouteOutcome::PlayerLeft {
                    id: left.player_id,
                    existed,
                }
            }
            ServerMessage::Event(event) => {
                let delivered = self.relay.dispatch(&event);
                RouteOutcome::Event {
                    tag: event.tag,
                    delivered,
                }
            }
            ServerMessage::Error(err) => {
                tracing::warn!("server error: {}", err.message);
                RouteOutcome::ServerError(err.message)
            }
            ServerMessage::Unknown(tag) => {
                tracing::trace!(%tag, "ignoring unknown message tag");
                RouteOutcome::Ignored(tag)
            }
        }
    }

    pub fn reconciler(&self) -> &InterestReconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut InterestReconciler {
        &mut self.reconciler
    }

    pub fn relay_mut(&mut self) -> &mut EventRelay {
        &mut self.relay
    }
}
