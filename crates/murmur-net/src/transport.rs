//! Bidirectional text-message transport.
//!
//! A [`Transport`] is a pair of channels: outbound text frames and inbound
//! [`TransportEvent`]s. The WebSocket flavour spawns a reader and a writer
//! task that shuttle frames between the channels and the socket; the memory
//! flavour wires the channels straight to a [`MemoryPeer`] so tests and
//! loopback setups can play the server.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Something the transport delivers to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Text(String),
    /// The remote end went away. Nothing follows.
    Closed,
}

/// Errors raised while opening or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("transport is closed")]
    Closed,

    /// No endpoint to connect to.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// An open transport. Dropping it stops any background tasks.
pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    /// Sending `true` makes the reader and writer tasks exit.
    shutdown_tx: watch::Sender<bool>,
}

impl Transport {
    /// Open a WebSocket to `url`.
    pub async fn websocket(url: &str) -> Result<Self, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut writer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = out_rx.recv() => match next {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::text(text)).await {
                                tracing::warn!("websocket write failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                    changed = writer_shutdown.changed() => {
                        if changed.is_err() || *writer_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            // Frames queued right before shutdown (e.g. `leave`) still go out.
            while let Ok(text) = out_rx.try_recv() {
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut reader_shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(TransportEvent::Text(text.as_str().to_owned())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                if in_tx.send(TransportEvent::Text(text)).is_err() {
                                    break;
                                }
                            }
                            Err(_) => tracing::warn!("dropping non-utf8 binary frame ({} bytes)", bytes.len()),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "websocket closed by server");
                            let _ = in_tx.send(TransportEvent::Closed);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("websocket read failed: {e}");
                            let _ = in_tx.send(TransportEvent::Closed);
                            break;
                        }
                        None => {
                            let _ = in_tx.send(TransportEvent::Closed);
                            break;
                        }
                    },
                    changed = reader_shutdown.changed() => {
                        if changed.is_err() || *reader_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::debug!(url, "websocket transport open");
        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            shutdown_tx,
        })
    }

    /// Create an in-memory transport and the peer that plays the server.
    pub fn memory_pair() -> (Self, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Self {
            outbound: out_tx,
            inbound: in_rx,
            shutdown_tx,
        };
        let peer = MemoryPeer {
            to_client: in_tx,
            from_client: out_rx,
            client_shutdown: shutdown_rx,
        };
        (transport, peer)
    }

    /// Queue one text frame for the remote end.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Wait for the next event. Yields [`TransportEvent::Closed`] once the
    /// inbound side is gone.
    pub async fn recv(&mut self) -> TransportEvent {
        self.inbound.recv().await.unwrap_or(TransportEvent::Closed)
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        match self.inbound.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(TransportEvent::Closed),
        }
    }

    /// Close the transport. Frames already queued are still flushed.
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Server side of an in-memory transport.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
    client_shutdown: watch::Receiver<bool>,
}

impl MemoryPeer {
    /// Deliver a text frame to the client. Returns `false` if it is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(TransportEvent::Text(text.into()))
            .is_ok()
    }

    /// Deliver a JSON value as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Simulate the server dropping the connection.
    pub fn close(&self) {
        let _ = self.to_client.send(TransportEvent::Closed);
    }

    /// Next frame the client sent, waiting if none is queued.
    /// `None` once the client transport is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame the client sent, if one is queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Drain every queued client frame.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Whether the client closed or dropped its end.
    pub fn client_closed(&self) -> bool {
        *self.client_shutdown.borrow() || self.to_client.is_closed()
    }
}

/// Opens transports on demand, so sessions can connect and reconnect.
pub trait Connector: Send + Sync {
    fn open(&self) -> impl Future<Output = Result<Transport, TransportError>> + Send;
}

/// Connects to a fixed WebSocket URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Transport, TransportError> {
        Transport::websocket(&self.url).await
    }
}

/// Hands out in-memory transports prepared with [`MemoryConnector::accept`],
/// oldest first. Opening with nothing prepared fails like a refused connect.
#[derive(Default)]
pub struct MemoryConnector {
    pending: Mutex<VecDeque<Transport>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare the next connection and return its server side.
    pub fn accept(&self) -> MemoryPeer {
        let (transport, peer) = Transport::memory_pair();
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(transport);
        peer
    }

    /// Number of prepared connections not yet opened.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Connector for MemoryConnector {
    async fn open(&self) -> Result<Transport, TransportError> {
        let next = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.ok_or_else(|| TransportError::Unavailable("no pending memory peer".into()))
    }
}
