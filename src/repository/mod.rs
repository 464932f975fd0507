//! Document repositories holding sealed session payloads.
//!
//! The lifecycle controller only needs fetch, upsert and delete by id. The
//! maintenance operations back the cleanup task and the CLI.

pub mod cleanup;
pub mod memory;
pub mod redb;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use memory::MemoryRepository;
pub use self::redb::RedbRepository;

/// A persisted session: sealed values keyed by session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(rename = "_id")]
    pub id: SessionId,

    /// Codec output of the session values.
    pub data: String,

    #[serde(rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn new(id: SessionId, data: String) -> Self {
        Self {
            id,
            data,
            modified_at: Utc::now(),
        }
    }
}

/// Storage contract used by the session store.
pub trait DocumentRepository: Send + Sync {
    /// Fetch a document by id. `Ok(None)` when absent.
    fn fetch_by_id(&self, id: SessionId) -> Result<Option<StoredDocument>>;

    /// Insert or overwrite the document keyed by `doc.id` in one atomic step.
    ///
    /// The stored `modified_at` is bumped if needed so it strictly exceeds the
    /// previous value for the same id. Returns the timestamp written.
    fn upsert(&self, doc: &StoredDocument) -> Result<DateTime<Utc>>;

    /// Delete a document. Returns whether one existed; a missing id is not an error.
    fn delete_by_id(&self, id: SessionId) -> Result<bool>;

    /// Delete documents last modified before `cutoff`. Returns the number removed.
    fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of stored documents.
    fn document_count(&self) -> Result<usize>;
}

/// Timestamp to store on upsert given the previous stored value.
pub(crate) fn next_modified_at(
    requested: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match previous {
        Some(prev) if requested <= prev => prev + chrono::Duration::microseconds(1),
        _ => requested,
    }
}
