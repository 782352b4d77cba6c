//! JetStream KV binding for the relation cache

use async_nats::jetstream::kv::{Operation, Store};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::SystemTime;

use super::{CacheEntry, RelationCache};
use crate::types::{Result, WardenError};

/// Relation cache backed by a JetStream KV bucket.
///
/// The bucket is bound once at startup; the KV store is the concurrency
/// authority, so no locking happens here.
#[derive(Clone)]
pub struct KvRelationCache {
    store: Store,
}

impl KvRelationCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RelationCache for KvRelationCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self
            .store
            .entry(key)
            .await
            .map_err(|e| WardenError::Transport(format!("cache get {}: {}", key, e)))?;

        Ok(entry.and_then(|entry| match entry.operation {
            // Delete and purge markers read as not-found.
            Operation::Delete | Operation::Purge => None,
            Operation::Put => Some(CacheEntry {
                value: entry.value,
                created: DateTime::<Utc>::from(SystemTime::from(entry.created)),
            }),
        }))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64> {
        self.store
            .put(key, value)
            .await
            .map_err(|e| WardenError::Transport(format!("cache put {}: {}", key, e)))
    }
}
