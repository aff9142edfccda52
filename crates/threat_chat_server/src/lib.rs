//! Threat-intel chat server: keyword retrieval over a threat store, system
//! prompt augmentation, and streamed model replies pushed over WebSocket.

pub mod completion;
pub mod handler;
pub mod prompt;
pub mod pusher;
pub mod retrieval;
pub mod server;
pub mod sse;
pub mod store;

pub use completion::{CompletionBackend, CompletionError, CompletionRequest, OpenAiCompatibleClient};
pub use handler::{ChatHandler, HandlerAck, HandlerError, HandlerSettings};
pub use pusher::{ConnectionId, ConnectionPusher, ConnectionRegistry, PushError};
pub use retrieval::{ContextRetriever, KeywordIndex};
pub use server::{serve, ServerError, ServerState};
pub use store::{JsonFileStore, MemoryStore, StoreError, ThreatItem, ThreatStore};
