//! Streaming chat completion against an OpenAI-compatible endpoint.
//!
//! One invocation per turn, no retries. The result is a lazy stream of
//! chunks that ends when the model sends `[DONE]` or the body ends.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header;
use serde::Serialize;
use threat_chat_client::config::Config;
use threat_chat_client::{CompletionChunk, Message, Role};

use crate::sse::SseDecoder;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Lazy, finite sequence of model chunks.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<CompletionChunk, CompletionError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API error ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("stream error: {0}")]
    Stream(String),
}

/// One streaming invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<&'a Message>,
    max_tokens: u32,
    temperature: f32,
    stop: Option<Vec<String>>,
    stream: bool,
}

impl CompletionRequest {
    /// Wire body. Empty assistant placeholders are local reply slots and
    /// are not sent to the model.
    fn body(&self) -> ChatCompletionBody<'_> {
        ChatCompletionBody {
            model: &self.model,
            messages: self
                .messages
                .iter()
                .filter(|m| !(m.role == Role::Assistant && m.is_empty()))
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stop: None,
            stream: true,
        }
    }
}

/// Model invocation seam.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, CompletionError>;
}

/// Client for `{base_url}/chat/completions` with bearer auth.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        let base_url = config
            .api
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if config.api.api_key.is_none() {
            tracing::warn!("no API key configured; model requests will be unauthenticated");
        }
        Self::new(base_url, config.api.api_key.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, CompletionError> {
        let body = request.body();
        tracing::debug!(
            model = %request.model,
            messages = body.messages.len(),
            max_tokens = request.max_tokens,
            "invoking model"
        );

        let mut req = self
            .http
            .post(self.endpoint())
            .header(header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(CompletionError::Status { status, body });
        }

        Ok(Box::pin(chunk_stream(resp.bytes_stream())))
    }
}

struct ChunkState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<crate::sse::SseFrame>,
    exhausted: bool,
    done: bool,
}

/// Turn an SSE byte stream into completion chunks. A transport error or an
/// `error` payload ends the stream after yielding one `Err`.
pub fn chunk_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<CompletionChunk, CompletionError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = ChunkState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            if let Some(frame) = st.pending.pop_front() {
                if frame.is_done() {
                    st.done = true;
                    return None;
                }
                let value: serde_json::Value = match frame.parse() {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            data = %frame.preview(),
                            "skipping malformed SSE frame"
                        );
                        continue;
                    }
                };
                if let Some(err) = value.get("error") {
                    st.done = true;
                    let message = err
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| err.to_string());
                    return Some((Err(CompletionError::Stream(message)), st));
                }
                match serde_json::from_value::<CompletionChunk>(value) {
                    Ok(chunk) => return Some((Ok(chunk), st)),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            data = %frame.preview(),
                            "skipping unexpected chunk"
                        );
                        continue;
                    }
                }
            }
            if st.exhausted {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(b)) => {
                    let frames = st.decoder.push(b.as_ref());
                    st.pending.extend(frames);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(CompletionError::Stream(e.to_string())), st));
                }
                None => {
                    st.exhausted = true;
                    let frames = st.decoder.finish();
                    st.pending.extend(frames);
                }
            }
        }
    })
}
