//! Shared threat-intel chat library (config, WebSocket protocol, chat sessions).
//! Used by the chat server and the terminal client.

pub mod client;
pub mod config;
pub mod messages;
pub mod session;

pub use client::{connect, Client, ClientError, Reply, StreamEvent};
pub use config::{default_config_path, ApiSection, ChatSection, Config, ConfigError, ServerSection};
pub use messages::{
    CompletionChunk, ErrorFrame, InboundEvent, Message, MessageContent, Role, SendMessageRequest,
    ServerFrame, StreamFragment,
};
pub use session::{ChatId, ChatSessionStore, Conversation, PendingSend, StreamPhase};
