//! WebSocket client: connect, send a message history, receive the streamed
//! reply until the server closes the connection.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

use crate::messages::{InboundEvent, SendMessageRequest, ServerFrame, StreamFragment};
use crate::session::{ChatId, ChatSessionStore};

/// Events received while a reply streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Error { status: u16, message: String },
    Closed,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Client connection error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Assembled reply: all chunk text concatenated plus the server error, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub error: Option<String>,
}

/// One open connection. The server closes it after each reply.
pub struct Client {
    inner: WsStream,
    closed: bool,
}

/// Connect to the WebSocket server at `url` (e.g. `ws://localhost:8765`).
pub async fn connect(url: &str) -> Result<Client, ClientError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    tracing::debug!(url, "connected");
    Ok(Client {
        inner: ws_stream,
        closed: false,
    })
}

impl Client {
    /// Send one `sendMessage` request.
    pub async fn send(&mut self, request: &SendMessageRequest) -> Result<(), ClientError> {
        let event = InboundEvent::SendMessage(request.clone());
        let json = serde_json::to_string(&event)?;
        self.inner.send(WsMessage::Text(json)).await?;
        Ok(())
    }

    /// Next event on the connection. Transport failures are reported as
    /// `Closed`; once closed, every later call returns `Closed`.
    pub async fn next_event(&mut self) -> StreamEvent {
        if self.closed {
            return StreamEvent::Closed;
        }
        while let Some(item) = self.inner.next().await {
            let text = match item {
                Ok(WsMessage::Text(t)) => t,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "connection failed mid-stream");
                    break;
                }
            };
            let frame = serde_json::from_str::<serde_json::Value>(&text)
                .map_err(|e| e.to_string())
                .and_then(|value| ServerFrame::from_json(&value));
            match frame {
                Ok(ServerFrame::Chunk(chunk)) => {
                    return StreamEvent::Chunk(chunk.text().to_string())
                }
                Ok(ServerFrame::Error { status, message }) => {
                    return StreamEvent::Error { status, message }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed frame");
                    continue;
                }
            }
        }
        self.closed = true;
        StreamEvent::Closed
    }

    /// Next fragment to apply to a conversation. Error frames are logged and
    /// skipped; closure yields the terminal fragment.
    pub async fn next_fragment(&mut self) -> StreamFragment {
        loop {
            match self.next_event().await {
                StreamEvent::Chunk(delta) => return StreamFragment::delta(delta),
                StreamEvent::Error { status, message } => {
                    tracing::warn!(status, %message, "server reported an error");
                }
                StreamEvent::Closed => return StreamFragment::end(),
            }
        }
    }

    /// Send `request` and collect the reply until the connection closes.
    pub async fn collect_reply(
        &mut self,
        request: &SendMessageRequest,
    ) -> Result<Reply, ClientError> {
        self.send(request).await?;
        let mut reply = Reply::default();
        loop {
            match self.next_event().await {
                StreamEvent::Chunk(delta) => reply.text.push_str(&delta),
                StreamEvent::Error { message, .. } => reply.error = Some(message),
                StreamEvent::Closed => break,
            }
        }
        Ok(reply)
    }

    /// Fold the streamed reply into `store` for `chat_id`, calling `on_delta`
    /// with each chunk's text. Always ends with a terminal fragment so the
    /// store never stays locked. Returns the assembled reply.
    pub async fn stream_into<F>(
        &mut self,
        store: &mut ChatSessionStore,
        chat_id: ChatId,
        mut on_delta: F,
    ) -> Reply
    where
        F: FnMut(&str),
    {
        let mut reply = Reply::default();
        loop {
            match self.next_event().await {
                StreamEvent::Chunk(delta) => {
                    if !delta.is_empty() {
                        on_delta(&delta);
                    }
                    reply.text.push_str(&delta);
                    store.on_fragment(chat_id, &StreamFragment::delta(delta));
                }
                StreamEvent::Error { status, message } => {
                    tracing::warn!(chat_id, status, %message, "server reported an error");
                    reply.error = Some(message);
                }
                StreamEvent::Closed => {
                    store.on_fragment(chat_id, &StreamFragment::end());
                    return reply;
                }
            }
        }
    }

    /// Close from the client side. Safe to call after the server closed.
    pub async fn close(&mut self) {
        if !self.closed {
            if let Err(e) = self.inner.close(None).await {
                tracing::debug!(error = %e, "close after server shutdown");
            }
            self.closed = true;
        }
    }
}
