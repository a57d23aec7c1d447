//! Memoized wait-time queries bound to a dataset version

use crate::model::{WaitTimeQuery, WaitTimeRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Results keyed by the exact query. Entries are only valid for `version`.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<WaitTimeQuery, Arc<Vec<WaitTimeRecord>>>,
    version: Option<Uuid>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, query: &WaitTimeQuery) -> Option<Arc<Vec<WaitTimeRecord>>> {
        match self.entries.get(query) {
            Some(rows) => {
                self.hits += 1;
                Some(Arc::clone(rows))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, query: WaitTimeQuery, rows: Arc<Vec<WaitTimeRecord>>) {
        self.entries.insert(query, rows);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn version(&self) -> Option<Uuid> {
        self.version
    }

    /// Adopt `version`, dropping every entry if it differs from the current one.
    /// Returns whether entries were dropped.
    pub fn bind_version(&mut self, version: Option<Uuid>) -> bool {
        if self.version == version {
            return false;
        }
        info!(
            old = ?self.version,
            new = ?version,
            dropped = self.entries.len(),
            "dataset version changed, clearing query cache"
        );
        self.clear();
        self.version = version;
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
