//! Keyword-driven context retrieval.
//!
//! A fixed vocabulary of threat terms is matched against the user's text
//! (case-insensitive, whole word). Stored items are relevant when one of
//! their category tags equals a matched keyword, ignoring case. Tags are
//! never substring-matched.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use threat_chat_client::{Message, Role};

use crate::store::{StoreError, ThreatStore};

/// Built-in threat vocabulary.
pub const THREAT_TERMS: &[&str] = &[
    "phishing",
    "malware",
    "ransomware",
    "denial-of-service",
    "dos",
    "supply chain",
    "zero-day",
    "sql injection",
    "tactics",
    "techniques",
    "procedures",
    "mitre",
    "spear phishing",
    "credential dumping",
    "ioc",
    "indicators",
    "ip address",
    "domain",
    "file hash",
    "md5",
    "sha-256",
    "registry",
    "reconnaissance",
    "initial compromise",
    "lateral movement",
    "data exfiltration",
    "persistence",
    "incident report",
    "case study",
    "breach",
    "forensic",
    "analysis",
    "threat intelligence",
    "feed",
    "alienvault",
    "recorded future",
    "threat feed",
];

/// Read-only set of domain terms, compiled once at startup.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    terms: Vec<(String, Regex)>,
}

impl KeywordIndex {
    pub fn new<I, S>(terms: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for term in terms {
            let term = term.as_ref().trim().to_lowercase();
            if term.is_empty() || compiled.iter().any(|(t, _)| *t == term) {
                continue;
            }
            // \b only holds next to a word character
            let edge = |c: Option<char>| match c {
                Some(c) if c.is_alphanumeric() || c == '_' => r"\b",
                _ => "",
            };
            let pattern = format!(
                "(?i){}{}{}",
                edge(term.chars().next()),
                regex::escape(&term),
                edge(term.chars().last())
            );
            let re = Regex::new(&pattern)?;
            compiled.push((term, re));
        }
        Ok(Self { terms: compiled })
    }

    /// Index over [`THREAT_TERMS`].
    pub fn threat_terms() -> Result<Self, regex::Error> {
        Self::new(THREAT_TERMS)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms occurring in `text` as whole words. Lowercased, deduplicated.
    pub fn extract_keywords(&self, text: &str) -> BTreeSet<String> {
        self.terms
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(term, _)| term.clone())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Text that drives retrieval: the first user message, normalized.
pub fn query_text(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(Message::text)
        .unwrap_or_default()
}

/// Finds stored threat content relevant to a conversation.
#[derive(Clone)]
pub struct ContextRetriever {
    index: Arc<KeywordIndex>,
    store: Arc<dyn ThreatStore>,
}

impl ContextRetriever {
    pub fn new(index: Arc<KeywordIndex>, store: Arc<dyn ThreatStore>) -> Self {
        Self { index, store }
    }

    pub fn extract_keywords(&self, text: &str) -> BTreeSet<String> {
        self.index.extract_keywords(text)
    }

    /// Raw content of every item tagged with one of `keywords`, in scan
    /// order, each item at most once. No store read for an empty set.
    pub async fn fetch_relevant(
        &self,
        keywords: &BTreeSet<String>,
    ) -> Result<Vec<String>, RetrievalError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: BTreeSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let items = self.store.scan().await?;
        let scanned = items.len();

        let matched: Vec<String> = items
            .into_iter()
            .filter(|item| !item.raw_content.is_empty() && !item.categories.is_empty())
            .filter(|item| item.tags().any(|tag| wanted.contains(&tag.to_lowercase())))
            .map(|item| item.raw_content)
            .collect();

        tracing::debug!(
            keywords = ?keywords,
            scanned,
            matched = matched.len(),
            "threat store filtered"
        );
        Ok(matched)
    }

    /// Relevant content for `messages`; a store failure degrades to no content.
    pub async fn retrieve_or_empty(&self, messages: &[Message]) -> Vec<String> {
        let keywords = self.extract_keywords(&query_text(messages));
        match self.fetch_relevant(&keywords).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }
}
