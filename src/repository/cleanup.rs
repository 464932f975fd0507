//! Background cleanup of stale session documents.
//!
//! Periodically deletes documents not modified within the session max age.
//! Their cookies have expired, so nothing can reach them any more.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::DocumentRepository;

/// Default cleanup interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300; // 5 minutes

/// Run one eviction pass. Non-positive `max_age_secs` evicts nothing.
pub fn evict_once(repository: &dyn DocumentRepository, max_age_secs: i64) -> anyhow::Result<usize> {
    if max_age_secs <= 0 {
        return Ok(0);
    }
    let cutoff = chrono::Duration::try_seconds(max_age_secs)
        .and_then(|max_age| Utc::now().checked_sub_signed(max_age));
    match cutoff {
        Some(cutoff) => repository.evict_stale(cutoff),
        None => Ok(0),
    }
}

/// Spawn a background task that periodically evicts stale documents.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_cleanup_task(
    repository: Arc<dyn DocumentRepository>,
    max_age_secs: i64,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match evict_once(repository.as_ref(), max_age_secs) {
                Ok(count) if count > 0 => {
                    info!(evicted = count, "Session cleanup completed");
                }
                Ok(_) => {
                    debug!("Session cleanup: no stale documents");
                }
                Err(e) => {
                    warn!(error = %e, "Session cleanup failed");
                }
            }

            match repository.document_count() {
                Ok(count) => {
                    debug!(documents = count, "Session repository status");
                }
                Err(e) => {
                    debug!(error = %e, "Failed to get document count");
                }
            }
        }
    })
}
