//! WebSocket transport: accept loop, per-connection reader and writer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use threat_chat_client::{ErrorFrame, InboundEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::handler::ChatHandler;
use crate::pusher::{ConnectionId, ConnectionPusher, ConnectionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("config error: {0}")]
    Config(#[from] threat_chat_client::ConfigError),
    #[error("invalid keyword term: {0}")]
    Keywords(#[from] regex::Error),
    #[error("model client: {0}")]
    Completion(#[from] crate::completion::CompletionError),
}

/// Shared by every connection.
pub struct ServerState {
    pub handler: Arc<ChatHandler>,
    pub registry: Arc<ConnectionRegistry>,
    pub invocation_timeout: Duration,
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::warn!(%peer, error = %e, "connection failed");
            }
        });
    }
}

/// Serve one WebSocket connection until the peer goes away.
pub async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
) -> Result<(), ServerError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let id = ConnectionId::new();
    let mut outbound = state.registry.register(id);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                tracing::debug!(connection_id = %id, error = %e, "write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    dispatch(&state, id, InboundEvent::Connect).await;

    let mut requests = JoinSet::new();
    while let Some(item) = read.next().await {
        let text = match item {
            Ok(WsMessage::Text(t)) => t,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "read failed");
                break;
            }
        };
        match InboundEvent::parse(&text) {
            Ok(event) => {
                tracing::debug!(connection_id = %id, action = event.name(), "event received");
                requests.spawn(run_event(state.clone(), id, event));
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "invalid message");
                let frame = ErrorFrame::new(400, format!("Invalid message: {}", e));
                if let Err(e) = state.registry.push_error(id, &frame).await {
                    tracing::debug!(connection_id = %id, error = %e, "error frame not delivered");
                }
                if let Err(e) = state.registry.close(id).await {
                    tracing::debug!(connection_id = %id, error = %e, "error closing connection");
                }
            }
        }
    }

    // The peer is gone; in-flight replies have nowhere to go.
    requests.shutdown().await;
    state.registry.unregister(id);
    dispatch(&state, id, InboundEvent::Disconnect).await;
    let _ = writer.await;
    Ok(())
}

async fn run_event(state: Arc<ServerState>, id: ConnectionId, event: InboundEvent) {
    let action = event.name();
    match tokio::time::timeout(state.invocation_timeout, state.handler.handle(id, event)).await {
        Ok(Ok(ack)) => tracing::debug!(connection_id = %id, action, ?ack, "event handled"),
        Ok(Err(e)) => tracing::debug!(connection_id = %id, action, error = %e, "event failed"),
        Err(_) => {
            tracing::warn!(
                connection_id = %id,
                action,
                timeout_secs = state.invocation_timeout.as_secs(),
                "invocation timed out, closing connection"
            );
            if let Err(e) = state.registry.close(id).await {
                tracing::debug!(connection_id = %id, error = %e, "error closing connection");
            }
        }
    }
}

async fn dispatch(state: &ServerState, id: ConnectionId, event: InboundEvent) {
    if let Err(e) = state.handler.handle(id, event).await {
        tracing::debug!(connection_id = %id, error = %e, "lifecycle event failed");
    }
}
