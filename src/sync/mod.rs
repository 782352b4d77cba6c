//! Tuple sync engine
//!
//! Replaces the stored relationship set for one object with the desired set
//! derived from a domain event, in a single atomic batch mutation against
//! the authorization store, then invalidates and re-seeds the check cache.
//!
//! Ordering within one sync call is load-bearing: the read happens before
//! the write, the invalidation marker is written after the mutation so that
//! readers observing the new marker also observe the new stored set, and
//! seed writes run after the invalidation so their creation timestamps land
//! above the marker and survive the staleness test.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::cache::RelationCache;
use crate::store::FgaClient;
use crate::tuple::{TupleKey, INVALIDATION_KEY};
use crate::types::Result;

/// Deadline for asynchronous cache seed writes. Seeds are a pre-warm, not a
/// correctness requirement, so they get their own bounded scope instead of
/// the caller's cancellation.
const SEED_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine that converges one object's stored tuples to a desired state.
pub struct SyncEngine {
    store: Arc<dyn FgaClient>,
    cache: Arc<dyn RelationCache>,
    use_cache: bool,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn FgaClient>, cache: Arc<dyn RelationCache>, use_cache: bool) -> Self {
        Self {
            store,
            cache,
            use_cache,
        }
    }

    /// Fetch all direct relationships (no transitive evaluation) defined
    /// against an object, following the store's continuation tokens until
    /// exhausted. Order is the store's natural order.
    pub async fn read_object_tuples(&self, object: &str) -> Result<Vec<TupleKey>> {
        let mut tuples = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self.store.read(object, continuation.as_deref()).await?;
            tuples.extend(page.tuples);
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(tuples)
    }

    /// Read an object's tuples and keep only those with the given relation.
    /// Used for optional cross-object lookups, e.g. projecting a project's
    /// meeting coordinators onto a meeting.
    pub async fn get_tuples_by_relation(
        &self,
        object: &str,
        relation: &str,
    ) -> Result<Vec<TupleKey>> {
        Ok(self
            .read_object_tuples(object)
            .await?
            .into_iter()
            .filter(|tuple| tuple.relation == relation)
            .collect())
    }

    /// Convert the desired tuples into a map keyed by `relation@user`.
    ///
    /// The store uses a composite key of the form
    /// `project:acme#writer@user:alice` for tuples, so a `relation@user`
    /// map key is similarly safe without content escaping. Tuples with an
    /// empty object are bound to the target; tuples naming a different
    /// object are dropped so one call never syncs more than one object.
    /// Later entries overwrite earlier ones.
    fn desired_map(object: &str, desired: Vec<TupleKey>) -> HashMap<String, TupleKey> {
        let mut map = HashMap::new();

        for mut tuple in desired {
            if tuple.object.is_empty() {
                tuple.object = object.to_string();
            } else if tuple.object != object {
                continue;
            }

            let key = format!("{}@{}", tuple.relation, tuple.user);
            map.insert(key, tuple);
        }

        map
    }

    /// Converge the stored tuple set for `object` to `desired`.
    ///
    /// Reads the current set, diffs it against the desired set, and applies
    /// the difference as one atomic write. Returns the writes and deletes
    /// that were applied; both empty means the object was already in sync
    /// and nothing was touched.
    pub async fn sync_object_tuples(
        &self,
        object: &str,
        desired: Vec<TupleKey>,
    ) -> Result<(Vec<TupleKey>, Vec<TupleKey>)> {
        let mut desired_map = Self::desired_map(object, desired);

        let current = self.read_object_tuples(object).await?;

        // Compare the live tuples against the desired state. Matches are
        // removed from the desired map (nothing to write); live tuples not
        // desired become deletes; whatever remains in the map is new.
        let mut deletes = Vec::new();
        for tuple in current {
            let key = format!("{}@{}", tuple.relation, tuple.user);
            if desired_map.remove(&key).is_some() {
                debug!(
                    user = %tuple.user,
                    relation = %tuple.relation,
                    object = %object,
                    "relation already in sync"
                );
            } else {
                debug!(
                    user = %tuple.user,
                    relation = %tuple.relation,
                    object = %object,
                    "will delete relation in batch write"
                );
                deletes.push(TupleKey::new(&tuple.user, &tuple.relation, object));
            }
        }

        let writes: Vec<TupleKey> = desired_map.into_values().collect();
        for write in &writes {
            debug!(
                user = %write.user,
                relation = %write.relation,
                object = %object,
                "will add relation in batch write"
            );
        }

        self.apply_tuple_changes(object, &writes, &deletes).await?;

        Ok((writes, deletes))
    }

    /// Apply a precomputed batch of writes and deletes for one object, then
    /// invalidate the cache and seed the written user relations.
    ///
    /// Escapes early when there is nothing to do, so a no-op sync touches
    /// neither the store nor the cache.
    pub async fn apply_tuple_changes(
        &self,
        object: &str,
        writes: &[TupleKey],
        deletes: &[TupleKey],
    ) -> Result<()> {
        if writes.is_empty() && deletes.is_empty() {
            return Ok(());
        }

        self.store.write(writes, deletes).await?;

        if !self.use_cache {
            return Ok(());
        }

        // Invalidate caches. Any value works; readers compare the entry's
        // native creation timestamp, not its value. A failure here is not a
        // sync failure: the mutation is already durable and the cache
        // reconciles as entries age out.
        if let Err(e) = self
            .cache
            .put(INVALIDATION_KEY, Bytes::from_static(b"1"))
            .await
        {
            error!(error = %e, object = %object, "failed to write cache invalidation marker");
        }

        // Seed direct user relationships after the invalidation so the
        // seeded entries are newer than the marker. Only user principals
        // (wildcard included) are seeded; reference tuples between objects
        // are never queried as check inputs.
        for write in writes.iter().filter(|w| w.is_user()) {
            let cache = Arc::clone(&self.cache);
            let cache_key = write.cache_key();
            tokio::spawn(async move {
                // Detached from the caller, which may be gone the moment
                // the sync returns. Errors are unobservable on purpose.
                let _ = tokio::time::timeout(SEED_TIMEOUT, cache.put_string(&cache_key, "true"))
                    .await;
            });
        }

        Ok(())
    }
}
