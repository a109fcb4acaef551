//! Networking for the murmur client: the JSON wire protocol, WebSocket and
//! in-memory transports, connection state, and reconnect backoff.

pub mod connection;
pub mod messages;
pub mod reconnection;
pub mod transport;

pub use connection::{ConnectionState, ConnectionStateWatch};
pub use messages::{
    ChatMessage, Command, DomainEvent, EventTag, FullEntitySample, JoinCommand, LegacyWorldState,
    MessageError, ModeCommand, PlayerId, PlayerLeft, PositionUpdate, ReducedEntitySample,
    ServerError, ServerMessage, Welcome, WorldStateFrame, decode_server_message,
};
pub use reconnection::{ReconnectConfig, ReconnectError, ReconnectState};
pub use transport::{
    Connector, MemoryConnector, MemoryPeer, Transport, TransportError, TransportEvent,
    WebSocketConnector,
};
