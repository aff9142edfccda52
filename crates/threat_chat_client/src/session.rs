//! Multi-conversation chat state: which conversations exist, which one is
//! active, and how streamed fragments fold into a pending assistant reply.
//!
//! In-flight reply state is keyed by conversation id, so a fragment always
//! lands in the conversation it was requested for even after the user has
//! switched to another one. Sending and creating conversations stay disabled
//! while any reply is in flight.

use std::collections::HashMap;

use crate::messages::{Message, Role, SendMessageRequest, StreamFragment};

/// Conversation ordinal, unique within one store. Starts at 1.
pub type ChatId = u64;

/// One independent message history.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    id: ChatId,
    messages: Vec<Message>,
}

impl Conversation {
    fn new(id: ChatId) -> Self {
        Self {
            id,
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> ChatId {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Short label: the first user message, truncated to `max_chars`.
    pub fn title(&self, max_chars: usize) -> String {
        let first = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        if first.chars().count() > max_chars {
            let cut: String = first.chars().take(max_chars).collect();
            format!("{}…", cut)
        } else {
            first
        }
    }

    /// Replace the last message with `updated`.
    fn replace_last(&mut self, updated: Message) {
        if let Some(last) = self.messages.last_mut() {
            *last = updated;
        }
    }
}

/// Progress of one in-flight reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Sent; no fragment has arrived yet.
    AwaitingFirstToken,
    /// At least one fragment has been applied.
    Streaming,
}

/// What `send` asks the transport to do: open a connection for `chat_id`
/// carrying `request`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub chat_id: ChatId,
    pub request: SendMessageRequest,
}

/// Ordered conversations plus the active pointer and per-conversation reply state.
#[derive(Debug, Clone, Default)]
pub struct ChatSessionStore {
    chats: Vec<Conversation>,
    active_id: Option<ChatId>,
    next_id: ChatId,
    input: String,
    streams: HashMap<ChatId, StreamPhase>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl ChatSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose requests carry explicit generation options.
    pub fn with_options(max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        Self {
            max_tokens,
            temperature,
            ..Self::default()
        }
    }

    pub fn chats(&self) -> &[Conversation] {
        &self.chats
    }

    pub fn chat(&self, id: ChatId) -> Option<&Conversation> {
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn active_id(&self) -> Option<ChatId> {
        self.active_id
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.and_then(|id| self.chat(id))
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Create the first conversation if none exists; returns the active id.
    pub fn ensure_chat(&mut self) -> ChatId {
        match self.active_id {
            Some(id) => id,
            None => self.push_chat(),
        }
    }

    pub fn can_create_chat(&self) -> bool {
        !self.is_response_in_flight() && !self.chats.iter().any(Conversation::is_empty)
    }

    /// Append a new empty conversation and make it active. No-op while an
    /// empty conversation exists or a reply is in flight.
    pub fn new_chat(&mut self) -> Option<ChatId> {
        if !self.can_create_chat() {
            tracing::debug!("new chat ignored: empty conversation exists or reply in flight");
            return None;
        }
        Some(self.push_chat())
    }

    fn push_chat(&mut self) -> ChatId {
        self.next_id += 1;
        let id = self.next_id;
        self.chats.push(Conversation::new(id));
        self.active_id = Some(id);
        id
    }

    /// Change the active conversation. Returns false for unknown ids.
    pub fn select_chat(&mut self, id: ChatId) -> bool {
        if self.chat(id).is_none() {
            return false;
        }
        self.active_id = Some(id);
        true
    }

    pub fn is_response_in_flight(&self) -> bool {
        !self.streams.is_empty()
    }

    /// True while the active conversation's reply has produced no fragment yet.
    pub fn is_awaiting_first_token(&self) -> bool {
        self.active_id
            .and_then(|id| self.phase(id))
            .is_some_and(|p| p == StreamPhase::AwaitingFirstToken)
    }

    pub fn phase(&self, id: ChatId) -> Option<StreamPhase> {
        self.streams.get(&id).copied()
    }

    pub fn can_send(&self) -> bool {
        !self.is_response_in_flight()
    }

    /// Append the user message and an empty assistant placeholder to the
    /// active conversation, clear the input buffer and mark the reply in
    /// flight. Returns `None` for blank text or while a reply is in flight.
    pub fn send(&mut self, text: &str) -> Option<PendingSend> {
        if text.trim().is_empty() || !self.can_send() {
            return None;
        }
        let chat_id = self.ensure_chat();
        let (max_tokens, temperature) = (self.max_tokens, self.temperature);
        let chat = self.chats.iter_mut().find(|c| c.id == chat_id)?;
        chat.messages.push(Message::user(text));
        chat.messages.push(Message::assistant(""));
        let request = SendMessageRequest {
            messages: Some(chat.messages.clone()),
            max_tokens,
            temperature,
        };
        self.input.clear();
        self.streams.insert(chat_id, StreamPhase::AwaitingFirstToken);
        tracing::debug!(chat_id, messages = chat.messages.len(), "message sent");
        Some(PendingSend { chat_id, request })
    }

    /// Fold one streamed fragment into `chat_id`'s last assistant message,
    /// or start one if none is pending. `ended` finishes the reply.
    pub fn on_fragment(&mut self, chat_id: ChatId, fragment: &StreamFragment) {
        let Some(chat) = self.chats.iter_mut().find(|c| c.id == chat_id) else {
            tracing::warn!(chat_id, "fragment for unknown conversation dropped");
            return;
        };

        let pending = chat
            .messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .cloned();
        let first_fragment = pending.as_ref().map_or(true, Message::is_empty);
        match pending {
            Some(last) => {
                if !fragment.delta.is_empty() {
                    chat.replace_last(last.appended(&fragment.delta));
                }
            }
            None => {
                if !fragment.delta.is_empty() {
                    chat.messages.push(Message::assistant(fragment.delta.as_str()));
                }
            }
        }
        if first_fragment {
            if let Some(phase) = self.streams.get_mut(&chat_id) {
                *phase = StreamPhase::Streaming;
            }
        }

        if fragment.ended {
            self.streams.remove(&chat_id);
            tracing::debug!(chat_id, "reply finished");
        }
    }

    /// Connection closed or failed: an implicit end with no further content.
    pub fn on_connection_closed(&mut self, chat_id: ChatId) {
        self.on_fragment(chat_id, &StreamFragment::end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last_text(store: &ChatSessionStore, id: ChatId) -> String {
        store.chat(id).unwrap().messages().last().unwrap().text()
    }

    #[test]
    fn send_appends_user_and_placeholder_to_active_only() {
        let mut store = ChatSessionStore::new();
        let first = store.ensure_chat();
        store.send("hello").unwrap();
        store.on_connection_closed(first);

        let second = store.new_chat().unwrap();
        store.set_input("what is phishing?");
        let pending = store.send("what is phishing?").unwrap();

        assert_eq!(pending.chat_id, second);
        assert_eq!(store.chat(first).unwrap().messages().len(), 2);
        let msgs = store.chat(second).unwrap().messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], Message::user("what is phishing?"));
        assert_eq!(msgs[1], Message::assistant(""));
        assert_eq!(store.input(), "");
        assert!(store.is_response_in_flight());
        assert!(store.is_awaiting_first_token());
        assert_eq!(pending.request.messages.as_deref(), Some(msgs));
    }

    #[test]
    fn blank_text_is_ignored() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        assert!(store.send("   \n\t").is_none());
        assert!(store.chat(id).unwrap().is_empty());
        assert!(!store.is_response_in_flight());
    }

    #[test]
    fn send_is_disabled_while_reply_in_flight() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        store.send("one").unwrap();
        assert!(!store.can_send());
        assert!(store.send("two").is_none());
        assert_eq!(store.chat(id).unwrap().messages().len(), 2);
    }

    #[test]
    fn fragments_concatenate_regardless_of_chunking() {
        for chunks in [vec!["Hel", "lo"], vec!["H", "e", "l", "l", "o"], vec!["Hello"]] {
            let mut store = ChatSessionStore::new();
            let id = store.ensure_chat();
            store.send("greet me").unwrap();
            for c in &chunks {
                store.on_fragment(id, &StreamFragment::delta(*c));
            }
            store.on_fragment(id, &StreamFragment::end());
            assert_eq!(last_text(&store, id), "Hello", "chunks: {:?}", chunks);
            assert!(!store.is_response_in_flight());
        }
    }

    #[test]
    fn first_fragment_clears_awaiting_flag() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        store.send("hi").unwrap();
        assert_eq!(store.phase(id), Some(StreamPhase::AwaitingFirstToken));
        store.on_fragment(id, &StreamFragment::delta("Hi"));
        assert_eq!(store.phase(id), Some(StreamPhase::Streaming));
        assert!(!store.is_awaiting_first_token());
        assert!(store.is_response_in_flight());
    }

    #[test]
    fn delta_then_end_finishes_reply() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        store.send("hi").unwrap();
        store.on_fragment(id, &StreamFragment::delta("Hi"));
        store.on_fragment(
            id,
            &StreamFragment {
                delta: String::new(),
                ended: true,
            },
        );
        assert_eq!(last_text(&store, id), "Hi");
        assert!(!store.is_response_in_flight());
        assert_eq!(store.phase(id), None);
    }

    #[test]
    fn close_without_fragments_unlocks_and_leaves_placeholder_empty() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        store.send("anyone there?").unwrap();
        store.on_connection_closed(id);
        assert!(!store.is_response_in_flight());
        let msgs = store.chat(id).unwrap().messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], Message::assistant(""));
        assert!(store.can_send());
    }

    #[test]
    fn new_chat_is_noop_while_empty_chat_exists() {
        let mut store = ChatSessionStore::new();
        store.ensure_chat();
        assert!(!store.can_create_chat());
        assert!(store.new_chat().is_none());
        assert_eq!(store.chats().len(), 1);
    }

    #[test]
    fn new_chat_is_noop_while_reply_in_flight() {
        let mut store = ChatSessionStore::new();
        store.ensure_chat();
        store.send("x").unwrap();
        assert!(store.new_chat().is_none());
        assert_eq!(store.chats().len(), 1);
    }

    #[test]
    fn fragments_follow_their_conversation_after_switching() {
        let mut store = ChatSessionStore::new();
        let first = store.ensure_chat();
        store.send("a").unwrap();
        store.on_connection_closed(first);
        let second = store.new_chat().unwrap();
        store.select_chat(first);
        store.send("b").unwrap();

        assert!(store.select_chat(second));
        store.on_fragment(first, &StreamFragment::delta("reply to b"));
        store.on_connection_closed(first);

        assert!(store.chat(second).unwrap().is_empty());
        assert_eq!(last_text(&store, first), "reply to b");
        assert_eq!(store.active_id(), Some(second));
    }

    #[test]
    fn fragment_without_placeholder_starts_new_assistant_message() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        store.send("q").unwrap();
        store.on_connection_closed(id);
        store.chats[0].messages.pop();

        store.on_fragment(id, &StreamFragment::delta("late"));
        let msgs = store.chat(id).unwrap().messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], Message::assistant("late"));
    }

    #[test]
    fn select_unknown_chat_is_rejected() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        assert!(!store.select_chat(id + 10));
        assert_eq!(store.active_id(), Some(id));
    }

    #[test]
    fn options_are_forwarded_in_request() {
        let mut store = ChatSessionStore::with_options(Some(256), Some(0.2));
        let pending = store.send("x").unwrap();
        assert_eq!(pending.request.max_tokens, Some(256));
        assert_eq!(pending.request.temperature, Some(0.2));
    }

    #[test]
    fn title_uses_first_user_message() {
        let mut store = ChatSessionStore::new();
        let id = store.ensure_chat();
        store.send("tell me about ransomware groups").unwrap();
        assert_eq!(store.chat(id).unwrap().title(11), "tell me abo…");
        assert_eq!(store.chat(id).unwrap().title(100), "tell me about ransomware groups");
    }
}
