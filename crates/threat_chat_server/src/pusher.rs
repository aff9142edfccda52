//! Pushing frames to open WebSocket connections by id.
//!
//! Every accepted connection registers an outbound queue here; a writer task
//! drains the queue into the socket. Handlers only ever see the id.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use threat_chat_client::{CompletionChunk, ErrorFrame};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

/// Outbound frames buffered per connection before pushes start waiting.
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("connection {0} is gone")]
    Gone(ConnectionId),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delivery of frames to one connection endpoint.
#[async_trait]
pub trait ConnectionPusher: Send + Sync {
    /// Send one fragment. At most once; failures are the caller's to log.
    async fn push(&self, id: ConnectionId, chunk: &CompletionChunk) -> Result<(), PushError>;

    async fn push_error(&self, id: ConnectionId, frame: &ErrorFrame) -> Result<(), PushError>;

    /// Terminate the connection.
    async fn close(&self, id: ConnectionId) -> Result<(), PushError>;
}

/// Open connections and their outbound queues.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    senders: Mutex<HashMap<ConnectionId, mpsc::Sender<WsMessage>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the queue its writer task must drain.
    pub fn register(&self, id: ConnectionId) -> mpsc::Receiver<WsMessage> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.lock().insert(id, tx);
        rx
    }

    /// Forget `id`. Returns false when it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, mpsc::Sender<WsMessage>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_frame(&self, id: ConnectionId, frame: WsMessage) -> Result<(), PushError> {
        let tx = self.lock().get(&id).cloned().ok_or(PushError::Gone(id))?;
        tx.send(frame).await.map_err(|_| PushError::Gone(id))
    }
}

#[async_trait]
impl ConnectionPusher for ConnectionRegistry {
    async fn push(&self, id: ConnectionId, chunk: &CompletionChunk) -> Result<(), PushError> {
        let json = serde_json::to_string(chunk)?;
        self.send_frame(id, WsMessage::Text(json)).await
    }

    async fn push_error(&self, id: ConnectionId, frame: &ErrorFrame) -> Result<(), PushError> {
        let json = serde_json::to_string(frame)?;
        self.send_frame(id, WsMessage::Text(json)).await
    }

    async fn close(&self, id: ConnectionId) -> Result<(), PushError> {
        let tx = self.lock().remove(&id).ok_or(PushError::Gone(id))?;
        tx.send(WsMessage::Close(None))
            .await
            .map_err(|_| PushError::Gone(id))
    }
}
