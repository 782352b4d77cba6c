//! Authorization store gateway
//!
//! A narrow contract over the external ReBAC store. The store evaluates the
//! authorization model; warden only reads direct tuples, applies batch
//! mutations, and asks for batched checks. All transport failures surface as
//! [`WardenError::Transport`] with no retry here — callers decide what a
//! failure means.

mod http;

pub use http::HttpFgaClient;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::tuple::TupleKey;
use crate::types::Result;

/// One page of a tuple read. An absent continuation token means the read is
/// exhausted.
#[derive(Debug, Default)]
pub struct ReadPage {
    pub tuples: Vec<TupleKey>,
    pub continuation: Option<String>,
}

/// One check in a batch, tagged with the caller-assigned correlation id.
#[derive(Debug, Clone)]
pub struct BatchCheckItem {
    pub tuple: TupleKey,
    pub correlation_id: String,
}

/// Result of a single check, routed back by correlation id.
#[derive(Debug, Clone, Copy)]
pub struct CheckOutcome {
    pub allowed: bool,
}

/// Operations warden needs from the authorization store.
#[async_trait]
pub trait FgaClient: Send + Sync {
    /// Read one page of direct tuples (no transitive evaluation) for an
    /// object. Pass the previous page's continuation token to advance.
    async fn read(&self, object: &str, continuation: Option<&str>) -> Result<ReadPage>;

    /// Apply writes and deletes as one atomic batch: on success all are
    /// applied, on failure the stored set is unchanged (the store's
    /// guarantee, not ours).
    async fn write(&self, writes: &[TupleKey], deletes: &[TupleKey]) -> Result<()>;

    /// Check many tuples at once. The store echoes each correlation id back
    /// verbatim in the result map.
    async fn batch_check(
        &self,
        checks: &[BatchCheckItem],
    ) -> Result<HashMap<String, CheckOutcome>>;
}
