//! WebSocket message types shared by the chat client and server. Client ↔ server JSON.
//!
//! Inbound (client → server) frames carry an `action` discriminator. Outbound
//! (server → client) frames mirror an OpenAI-compatible streaming chunk,
//! `{"choices":[{"delta":{"content":"..."}}]}`; there is no explicit end
//! marker on the wire, completion is inferred from connection closure.

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One structured content part. Only text parts carry searchable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Message body: either a plain string or a list of structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Normalize to plain text. Parts are joined with a single space.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn text(&self) -> String {
        self.content.to_text()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Copy of this message with `delta` appended to its text.
    pub fn appended(&self, delta: &str) -> Self {
        let mut text = self.content.to_text();
        text.push_str(delta);
        Self {
            role: self.role,
            content: MessageContent::Text(text),
        }
    }
}

/// Client → server: request a streamed reply for a full message history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl SendMessageRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages: Some(messages),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// One inbound connection event; discriminator is the JSON "action" field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum InboundEvent {
    #[serde(rename = "$connect", alias = "connect")]
    Connect,
    #[serde(rename = "$disconnect", alias = "disconnect")]
    Disconnect,
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessageRequest),
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Connect => "connect",
            InboundEvent::Disconnect => "disconnect",
            InboundEvent::SendMessage(_) => "sendMessage",
        }
    }
}

/// Incremental delta inside a streamed chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Server → client: one streamed fragment, in OpenAI-compatible chunk shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl CompletionChunk {
    /// Chunk carrying only `content` in its first choice.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            id: None,
            model: None,
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }

    /// Empty-content fragment sent right before the connection is closed.
    pub fn terminal() -> Self {
        Self::from_text("")
    }

    /// Incremental text: `choices[0].delta.content`, empty when absent.
    pub fn text(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}

/// Server → client: handler failure, pushed once before the connection closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorBody,
}

impl ErrorFrame {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                status,
                message: message.into(),
            },
        }
    }
}

/// One server frame as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Chunk(CompletionChunk),
    Error { status: u16, message: String },
}

impl ServerFrame {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        if value.get("error").is_some() {
            let frame: ErrorFrame =
                serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
            return Ok(ServerFrame::Error {
                status: frame.error.status,
                message: frame.error.message,
            });
        }
        if value.get("choices").is_some() {
            let chunk: CompletionChunk =
                serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
            return Ok(ServerFrame::Chunk(chunk));
        }
        Err("unrecognized frame: expected `choices` or `error`".into())
    }
}

/// One fragment as applied to a conversation. `ended` carries no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub delta: String,
    pub ended: bool,
}

impl StreamFragment {
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ended: false,
        }
    }

    pub fn end() -> Self {
        Self {
            delta: String::new(),
            ended: true,
        }
    }
}
