//! In-memory doubles for the store and cache, used by unit tests
//!
//! Both doubles record the calls they see and can be scripted to fail, so
//! tests can assert on ordering rules (no invalidation after a failed
//! write, live fallback after a cache error) without a running NATS or
//! store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheEntry, RelationCache};
use crate::store::{BatchCheckItem, CheckOutcome, FgaClient, ReadPage};
use crate::tuple::TupleKey;
use crate::types::{Result, WardenError};

/// In-memory authorization store.
pub struct MemoryStore {
    tuples: Mutex<Vec<TupleKey>>,
    check_results: Mutex<HashMap<String, bool>>,
    page_size: usize,
    fail_reads: Mutex<Option<String>>,
    fail_writes: Mutex<Option<String>>,
    empty_batch_result: Mutex<bool>,
    /// Recorded write calls as (writes, deletes) pairs.
    pub write_calls: Mutex<Vec<(Vec<TupleKey>, Vec<TupleKey>)>>,
    /// Recorded batch-check calls.
    pub batch_calls: Mutex<Vec<Vec<BatchCheckItem>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tuples: Mutex::new(Vec::new()),
            check_results: Mutex::new(HashMap::new()),
            page_size: 2,
            fail_reads: Mutex::new(None),
            fail_writes: Mutex::new(None),
            empty_batch_result: Mutex::new(false),
            write_calls: Mutex::new(Vec::new()),
            batch_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tuples(tuples: Vec<TupleKey>) -> Self {
        let store = Self::new();
        *store.tuples.lock().unwrap() = tuples;
        store
    }

    pub fn set_check_result(&self, relation_key: &str, allowed: bool) {
        self.check_results
            .lock()
            .unwrap()
            .insert(relation_key.to_string(), allowed);
    }

    pub fn fail_writes(&self, message: &str) {
        *self.fail_writes.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_reads(&self, message: &str) {
        *self.fail_reads.lock().unwrap() = Some(message.to_string());
    }

    pub fn return_empty_batch_result(&self) {
        *self.empty_batch_result.lock().unwrap() = true;
    }

    pub fn stored_tuples(&self) -> Vec<TupleKey> {
        self.tuples.lock().unwrap().clone()
    }
}

#[async_trait]
impl FgaClient for MemoryStore {
    async fn read(&self, object: &str, continuation: Option<&str>) -> Result<ReadPage> {
        if let Some(message) = self.fail_reads.lock().unwrap().clone() {
            return Err(WardenError::Transport(message));
        }

        let matching: Vec<TupleKey> = self
            .tuples
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.object == object)
            .cloned()
            .collect();

        let offset: usize = continuation.map(|c| c.parse().unwrap_or(0)).unwrap_or(0);
        let end = (offset + self.page_size).min(matching.len());
        let page: Vec<TupleKey> = matching[offset.min(matching.len())..end].to_vec();

        Ok(ReadPage {
            tuples: page,
            continuation: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn write(&self, writes: &[TupleKey], deletes: &[TupleKey]) -> Result<()> {
        if let Some(message) = self.fail_writes.lock().unwrap().clone() {
            return Err(WardenError::Transport(message));
        }

        self.write_calls
            .lock()
            .unwrap()
            .push((writes.to_vec(), deletes.to_vec()));

        let mut tuples = self.tuples.lock().unwrap();
        tuples.retain(|t| !deletes.contains(t));
        tuples.extend_from_slice(writes);
        Ok(())
    }

    async fn batch_check(
        &self,
        checks: &[BatchCheckItem],
    ) -> Result<HashMap<String, CheckOutcome>> {
        self.batch_calls.lock().unwrap().push(checks.to_vec());

        if *self.empty_batch_result.lock().unwrap() {
            return Ok(HashMap::new());
        }

        let results = self.check_results.lock().unwrap();
        Ok(checks
            .iter()
            .map(|check| {
                let allowed = results
                    .get(&check.tuple.relation_key())
                    .copied()
                    .unwrap_or(false);
                (check.correlation_id.clone(), CheckOutcome { allowed })
            })
            .collect())
    }
}

/// In-memory relation cache with a logical clock.
///
/// Each put gets a creation time one second after the previous one, so
/// tests can order entries against the invalidation marker; `put_at`
/// backdates entries explicitly.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: AtomicI64,
    fail_gets: Mutex<Option<String>>,
    fail_puts: Mutex<Option<String>>,
    /// Recorded put calls as (key, value) pairs.
    pub put_calls: Mutex<Vec<(String, String)>>,
}

const CLOCK_EPOCH: i64 = 1_700_000_000;

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock: AtomicI64::new(0),
            fail_gets: Mutex::new(None),
            fail_puts: Mutex::new(None),
            put_calls: Mutex::new(Vec::new()),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let n = self.clock.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_opt(CLOCK_EPOCH + n, 0).unwrap()
    }

    /// Timestamp `offset` seconds after the clock epoch, without advancing
    /// the clock.
    pub fn at(offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(CLOCK_EPOCH + offset, 0).unwrap()
    }

    /// Insert an entry with an explicit creation time.
    pub fn put_at(&self, key: &str, value: &str, created: DateTime<Utc>) {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            CacheEntry {
                value: Bytes::from(value.to_string()),
                created,
            },
        );
    }

    pub fn fail_gets(&self, message: &str) {
        *self.fail_gets.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_puts(&self, message: &str) {
        *self.fail_puts.lock().unwrap() = Some(message.to_string());
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        self.entry(key)
            .map(|e| String::from_utf8_lossy(&e.value).into_owned())
    }
}

#[async_trait]
impl RelationCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        if let Some(message) = self.fail_gets.lock().unwrap().clone() {
            return Err(WardenError::Transport(message));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64> {
        if let Some(message) = self.fail_puts.lock().unwrap().clone() {
            return Err(WardenError::Transport(message));
        }

        self.put_calls.lock().unwrap().push((
            key.to_string(),
            String::from_utf8_lossy(&value).into_owned(),
        ));

        let created = self.tick();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), CacheEntry { value, created });
        Ok(entries.len() as u64)
    }
}
