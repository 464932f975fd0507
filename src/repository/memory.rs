//! In-process document repository.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{next_modified_at, DocumentRepository, StoredDocument};
use crate::session::SessionId;

/// Repository holding documents in a `HashMap`. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    docs: RwLock<HashMap<SessionId, StoredDocument>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentRepository for MemoryRepository {
    fn fetch_by_id(&self, id: SessionId) -> Result<Option<StoredDocument>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("Session document lock poisoned"))?;
        Ok(docs.get(&id).cloned())
    }

    fn upsert(&self, doc: &StoredDocument) -> Result<DateTime<Utc>> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("Session document lock poisoned"))?;

        let previous = docs.get(&doc.id).map(|prev| prev.modified_at);
        let modified_at = next_modified_at(doc.modified_at, previous);
        docs.insert(
            doc.id,
            StoredDocument {
                modified_at,
                ..doc.clone()
            },
        );
        Ok(modified_at)
    }

    fn delete_by_id(&self, id: SessionId) -> Result<bool> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("Session document lock poisoned"))?;
        Ok(docs.remove(&id).is_some())
    }

    fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("Session document lock poisoned"))?;
        let before = docs.len();
        docs.retain(|_, doc| doc.modified_at >= cutoff);
        Ok(before - docs.len())
    }

    fn document_count(&self) -> Result<usize> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("Session document lock poisoned"))?;
        Ok(docs.len())
    }
}
