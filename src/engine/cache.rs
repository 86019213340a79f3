// In-memory study cache with a fixed time-to-live and lazy expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::info;

use super::result::AggregateResult;

struct CacheEntry {
    result: Arc<AggregateResult>,
    inserted_at: Instant,
}

/// Entry counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
}

pub struct StudyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl StudyCache {
    /// Create an empty cache whose entries expire `ttl` after they were written.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry. Expired entries read as absent but stay in the map
    /// until overwritten or cleared.
    pub fn get(&self, key: &str) -> Option<Arc<AggregateResult>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.result))
    }

    /// Store `result` under `key`, replacing any previous entry and restarting its TTL.
    pub fn set(&self, key: &str, result: Arc<AggregateResult>) {
        let succeeded = result.succeeded_count();
        {
            let mut entries = self.entries.write();
            entries.insert(
                key.to_string(),
                CacheEntry {
                    result,
                    inserted_at: Instant::now(),
                },
            );
        }
        info!("cached study {} ({} images)", key, succeeded);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
        info!("cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let valid_entries = entries
            .values()
            .filter(|entry| entry.inserted_at.elapsed() <= self.ttl)
            .count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries,
        }
    }
}
