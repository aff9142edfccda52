//! Connection-scoped request handler.
//!
//! For one `sendMessage` request: retrieve context, augment the system
//! prompt, invoke the model in streaming mode and push every chunk to the
//! requesting connection, then push an empty terminal chunk and close. Every
//! path out of a request ends with the connection closed.

use std::sync::Arc;

use futures_util::StreamExt;
use threat_chat_client::config::Config;
use threat_chat_client::{CompletionChunk, ErrorFrame, InboundEvent, SendMessageRequest};

use crate::completion::{ChunkStream, CompletionBackend, CompletionError, CompletionRequest};
use crate::prompt::{inject_context, with_system_message, DEFAULT_SYSTEM_PROMPT};
use crate::pusher::{ConnectionId, ConnectionPusher, PushError};
use crate::retrieval::ContextRetriever;

/// Process-wide, read-only handler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerSettings {
    pub base_prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl HandlerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_prompt: config
                .server
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            model: config.model_name().to_string(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Successful handling outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAck {
    Connected,
    Disconnected,
    Streamed { fragments: usize, failed: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Messages are required")]
    Validation,
    #[error("Error: {0}")]
    Invocation(#[from] CompletionError),
}

impl HandlerError {
    /// HTTP-style status reported in the error frame.
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::Validation => 400,
            HandlerError::Invocation(_) => 500,
        }
    }
}

pub struct ChatHandler {
    retriever: ContextRetriever,
    backend: Arc<dyn CompletionBackend>,
    pusher: Arc<dyn ConnectionPusher>,
    settings: HandlerSettings,
}

impl ChatHandler {
    pub fn new(
        retriever: ContextRetriever,
        backend: Arc<dyn CompletionBackend>,
        pusher: Arc<dyn ConnectionPusher>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            retriever,
            backend,
            pusher,
            settings,
        }
    }

    pub async fn handle(
        &self,
        id: ConnectionId,
        event: InboundEvent,
    ) -> Result<HandlerAck, HandlerError> {
        match event {
            InboundEvent::Connect => {
                tracing::info!(connection_id = %id, "connected");
                Ok(HandlerAck::Connected)
            }
            InboundEvent::Disconnect => {
                tracing::info!(connection_id = %id, "disconnected");
                Ok(HandlerAck::Disconnected)
            }
            InboundEvent::SendMessage(request) => self.send_message(id, request).await,
        }
    }

    async fn send_message(
        &self,
        id: ConnectionId,
        request: SendMessageRequest,
    ) -> Result<HandlerAck, HandlerError> {
        let Some(messages) = request.messages else {
            return Err(self.fail(id, HandlerError::Validation).await);
        };

        let snippets = self.retriever.retrieve_or_empty(&messages).await;
        let system_text = inject_context(&self.settings.base_prompt, &snippets);
        let augmented = with_system_message(&messages, &system_text);
        tracing::info!(
            connection_id = %id,
            messages = augmented.len(),
            snippets = snippets.len(),
            "invoking model"
        );

        let completion = CompletionRequest {
            model: self.settings.model.clone(),
            messages: augmented,
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
            temperature: request.temperature.unwrap_or(self.settings.temperature),
        };
        let stream = match self.backend.stream_completion(completion).await {
            Ok(s) => s,
            Err(e) => return Err(self.fail(id, HandlerError::Invocation(e)).await),
        };

        let (fragments, failed) = match self.forward(id, stream).await {
            Ok(counts) => counts,
            Err(e) => return Err(self.fail(id, HandlerError::Invocation(e)).await),
        };
        self.finish(id).await;
        tracing::info!(connection_id = %id, fragments, failed, "reply streamed");
        Ok(HandlerAck::Streamed { fragments, failed })
    }

    /// Push chunks in model order. A failed push is logged and skipped; a
    /// connection that is gone stops the stream. An error before the first
    /// chunk is returned as an invocation failure; a later one ends the reply.
    async fn forward(
        &self,
        id: ConnectionId,
        mut stream: ChunkStream,
    ) -> Result<(usize, usize), CompletionError> {
        let (mut fragments, mut failed) = (0, 0);
        let mut received = false;
        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) if !received => return Err(e),
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "model stream failed, ending reply");
                    break;
                }
            };
            received = true;
            match self.pusher.push(id, &chunk).await {
                Ok(()) => fragments += 1,
                Err(PushError::Gone(_)) => {
                    failed += 1;
                    tracing::info!(connection_id = %id, "connection gone, stopping stream");
                    break;
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(connection_id = %id, error = %e, "error sending chunk to client");
                }
            }
        }
        Ok((fragments, failed))
    }

    /// Terminal empty chunk, then close.
    async fn finish(&self, id: ConnectionId) {
        if let Err(e) = self.pusher.push(id, &CompletionChunk::terminal()).await {
            tracing::debug!(connection_id = %id, error = %e, "terminal chunk not delivered");
        }
        self.close(id).await;
    }

    /// Report `err` to the client and close; returns it for the caller.
    async fn fail(&self, id: ConnectionId, err: HandlerError) -> HandlerError {
        tracing::warn!(connection_id = %id, status = err.status_code(), error = %err, "request failed");
        let frame = ErrorFrame::new(err.status_code(), err.to_string());
        if let Err(e) = self.pusher.push_error(id, &frame).await {
            tracing::debug!(connection_id = %id, error = %e, "error frame not delivered");
        }
        self.close(id).await;
        err
    }

    async fn close(&self, id: ConnectionId) {
        if let Err(e) = self.pusher.close(id).await {
            tracing::debug!(connection_id = %id, error = %e, "error closing connection");
        }
    }
}
