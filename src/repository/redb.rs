//! Session documents backed by redb embedded database.
//!
//! Documents are keyed by the 12 raw id bytes, so table order follows
//! session creation time. Values are MessagePack-encoded `StoredDocument`s.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{next_modified_at, DocumentRepository, StoredDocument};
use crate::session::SessionId;

/// redb table for sessions (key: raw session id, value: MessagePack bytes).
const SESSIONS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

/// Session document repository on a redb file.
pub struct RedbRepository {
    db: Database,
}

impl RedbRepository {
    /// Open or create a repository at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open session database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = ?path, "Opened session document repository");

        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> Result<StoredDocument> {
        rmp_serde::from_slice(bytes).context("Failed to deserialize session document")
    }
}

impl DocumentRepository for RedbRepository {
    fn fetch_by_id(&self, id: SessionId) -> Result<Option<StoredDocument>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        match table.get(id.as_bytes().as_slice())? {
            Some(value) => Ok(Some(Self::decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, doc: &StoredDocument) -> Result<DateTime<Utc>> {
        let key = doc.id.as_bytes().as_slice();

        // redb serializes write transactions, so the read of the previous
        // timestamp and the overwrite happen as one step.
        let write_txn = self.db.begin_write()?;
        let modified_at = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;

            let previous = match table.get(key)? {
                Some(value) => Self::decode(value.value()).ok().map(|prev| prev.modified_at),
                None => None,
            };
            let modified_at = next_modified_at(doc.modified_at, previous);

            let stored = StoredDocument {
                modified_at,
                ..doc.clone()
            };
            let data = rmp_serde::to_vec_named(&stored)
                .context("Failed to serialize session document")?;
            table.insert(key, data.as_slice())?;
            modified_at
        };
        write_txn.commit()?;

        Ok(modified_at)
    }

    fn delete_by_id(&self, id: SessionId) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            let result = table.remove(id.as_bytes().as_slice())?;
            result.is_some()
        };
        write_txn.commit()?;

        Ok(removed)
    }

    fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let evicted = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;

            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match Self::decode(value.value()) {
                    Ok(doc) if doc.modified_at < cutoff => stale.push(key.value().to_vec()),
                    Err(e) => {
                        warn!(key = %hex::encode(key.value()), error = %e, "Failed to deserialize session document, marking for deletion");
                        stale.push(key.value().to_vec());
                    }
                    _ => {}
                }
            }

            for key in &stale {
                table.remove(key.as_slice())?;
            }
            stale.len()
        };
        write_txn.commit()?;

        Ok(evicted)
    }

    fn document_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        Ok(table.len()? as usize)
    }
}
