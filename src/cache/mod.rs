//! Relation check cache
//!
//! A narrow key-value contract over the JetStream KV bucket that backs the
//! check cache. Relation entries live under `rel.`-prefixed keys holding the
//! ASCII literals `true`/`false`; the reserved `inv` key is the global
//! invalidation marker, read for its server-assigned creation timestamp
//! only. The bucket is shared across all replicas; entry expiry is the
//! bucket's TTL, not ours.

mod bucket;

pub use bucket::KvRelationCache;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::types::Result;

/// One cache entry with its server-assigned creation time.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub created: DateTime<Utc>,
}

/// Key-value operations the engines need from the cache bucket.
///
/// No delete, CAS, or watch: entries age out via the bucket TTL and are
/// logically invalidated by the `inv` marker's timestamp.
#[async_trait]
pub trait RelationCache: Send + Sync {
    /// Fetch an entry. `Ok(None)` means the key is not present (or was
    /// deleted); errors are transport failures.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store raw bytes under a key, returning the new revision.
    async fn put(&self, key: &str, value: Bytes) -> Result<u64>;

    /// Convenience equivalent of [`RelationCache::put`] for string values.
    async fn put_string(&self, key: &str, value: &str) -> Result<u64> {
        self.put(key, Bytes::from(value.to_string())).await
    }
}
