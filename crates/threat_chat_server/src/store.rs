//! Read-only access to the threat-content store populated by the crawler.
//!
//! The store is only ever read with a full scan; filtering happens in the
//! retriever after every record has been read.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One crawled item: its raw text and category → keyword tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatItem {
    #[serde(default, alias = "RawContent")]
    pub raw_content: String,
    #[serde(default, alias = "ThreatCategories")]
    pub categories: BTreeMap<String, Vec<String>>,
}

impl ThreatItem {
    pub fn new(raw_content: impl Into<String>) -> Self {
        Self {
            raw_content: raw_content.into(),
            categories: BTreeMap::new(),
        }
    }

    pub fn with_category<I, S>(mut self, name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories
            .insert(name.into(), keywords.into_iter().map(Into::into).collect());
        self
    }

    /// Every tag across all categories.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.categories.values().flatten().map(String::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store contents invalid: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Full-table read access. Order is stable for a given store state.
#[async_trait]
pub trait ThreatStore: Send + Sync {
    async fn scan(&self) -> Result<Vec<ThreatItem>, StoreError>;
}

/// Store backed by a JSON array file, re-read on every scan.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ThreatStore for JsonFileStore {
    async fn scan(&self) -> Result<Vec<ThreatItem>, StoreError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let items: Vec<ThreatItem> = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %self.path.display(), items = items.len(), "store scanned");
        Ok(items)
    }
}

/// In-process store. Counts scans.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Vec<ThreatItem>,
    scans: AtomicUsize,
    fail: bool,
}

impl MemoryStore {
    pub fn new(items: Vec<ThreatItem>) -> Self {
        Self {
            items,
            scans: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Store whose every scan fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThreatStore for MemoryStore {
    async fn scan(&self) -> Result<Vec<ThreatItem>, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::Unavailable("memory store configured to fail".into()));
        }
        Ok(self.items.clone())
    }
}
