//! Generic access-control update and delete-all handlers
//!
//! `UpdateAccessHandler` is the one handler behind every
//! `lfx.update_access.<type>` subject; the per-type knowledge lives in the
//! injected [`DesiredStateBuilder`]. `StandardAccessBuilder` covers object
//! types whose payload follows the common access shape (committee,
//! groups.io service).

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use super::{DesiredStateBuilder, InboundMessage, MessageHandler};
use crate::sync::SyncEngine;
use crate::tuple::{TupleKey, OBJECT_TYPE_USER, RELATION_PARENT, RELATION_VIEWER, USER_WILDCARD};
use crate::types::{Result, WardenError};

/// Reply body for successful mutations.
const OK: &[u8] = b"OK";

/// Handles a full desired-state sync for one object.
pub struct UpdateAccessHandler {
    sync: Arc<SyncEngine>,
    builder: Box<dyn DesiredStateBuilder>,
}

impl UpdateAccessHandler {
    pub fn new(sync: Arc<SyncEngine>, builder: Box<dyn DesiredStateBuilder>) -> Self {
        Self { sync, builder }
    }
}

#[async_trait]
impl MessageHandler for UpdateAccessHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<Bytes> {
        let kind = self.builder.kind();
        info!(
            message = %String::from_utf8_lossy(&message.payload),
            "handling {} access control update",
            kind
        );

        let (object, desired) = self.builder.build(&message.payload).await?;

        let (writes, deletes) = self
            .sync
            .sync_object_tuples(&object, desired)
            .await
            .map_err(|e| {
                error!(error = %e, object = %object, "failed to sync tuples");
                WardenError::Transport("failed to sync tuples".to_string())
            })?;

        info!(
            object = %object,
            writes = writes.len(),
            deletes = deletes.len(),
            "synced tuples"
        );

        Ok(Bytes::from_static(OK))
    }
}

/// Handles `lfx.delete_all_access.<type>`: the payload is the raw object
/// UID, never serialized.
pub struct DeleteAllAccessHandler {
    sync: Arc<SyncEngine>,
    object_type_prefix: &'static str,
    kind: &'static str,
}

impl DeleteAllAccessHandler {
    pub fn new(sync: Arc<SyncEngine>, object_type_prefix: &'static str, kind: &'static str) -> Self {
        Self {
            sync,
            object_type_prefix,
            kind,
        }
    }
}

#[async_trait]
impl MessageHandler for DeleteAllAccessHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<Bytes> {
        info!(
            message = %String::from_utf8_lossy(&message.payload),
            "handling {} access control delete all",
            self.kind
        );

        let uid = std::str::from_utf8(&message.payload)
            .map_err(|_| WardenError::Parse("unsupported deletion payload".to_string()))?;
        if uid.is_empty() {
            error!("empty deletion payload");
            return Err(WardenError::Payload("empty deletion payload".to_string()));
        }
        if uid.starts_with(['{', '[', '"']) {
            error!("unsupported deletion payload");
            return Err(WardenError::Parse("unsupported deletion payload".to_string()));
        }

        let object = format!("{}{}", self.object_type_prefix, uid);

        // A delete is a sync to the empty desired state.
        let (writes, deletes) = self
            .sync
            .sync_object_tuples(&object, Vec::new())
            .await
            .map_err(|e| {
                error!(error = %e, object = %object, "failed to sync tuples");
                WardenError::Transport("failed to sync tuples".to_string())
            })?;

        info!(
            object = %object,
            writes = writes.len(),
            deletes = deletes.len(),
            "synced tuples"
        );

        Ok(Bytes::from_static(OK))
    }
}

/// Common access-control payload shape shared by most object types.
#[derive(Debug, Deserialize)]
pub struct StandardAccessPayload {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub public: bool,
    /// Relation name → principal UIDs.
    #[serde(default)]
    pub relations: HashMap<String, Vec<String>>,
    /// Reference relation name → referenced object UID.
    #[serde(default)]
    pub references: HashMap<String, String>,
}

/// Desired-state builder for the common access payload.
pub struct StandardAccessBuilder {
    kind: &'static str,
}

impl StandardAccessBuilder {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl DesiredStateBuilder for StandardAccessBuilder {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn build(&self, payload: &[u8]) -> Result<(String, Vec<TupleKey>)> {
        let access: StandardAccessPayload = serde_json::from_slice(payload).map_err(|e| {
            error!(error = %e, "event data parse error");
            WardenError::Parse("event data parse error".to_string())
        })?;

        if access.uid.is_empty() {
            error!("{} ID not found", self.kind);
            return Err(WardenError::Payload(format!("{} ID not found", self.kind)));
        }

        let object = format!("{}:{}", access.object_type, access.uid);
        let mut tuples = Vec::with_capacity(4);

        // The "public" attribute becomes a wildcard viewer relation.
        if access.public {
            tuples.push(TupleKey::new(USER_WILDCARD, RELATION_VIEWER, &object));
        }

        // References between objects (parent relation, project relation,
        // ...). A parent reference points at an object of the payload's own
        // type.
        for (reference, value) in &access.references {
            let ref_type = if reference == RELATION_PARENT {
                access.object_type.as_str()
            } else {
                reference.as_str()
            };
            let user = format!("{}:{}", ref_type, value);
            tuples.push(TupleKey::new(&user, reference, &object));
        }

        // Each principal becomes the corresponding relationship tuple as
        // defined by the authorization model (writer, auditor, ...).
        for (relation, principals) in &access.relations {
            for principal in principals {
                let user = format!("{}{}", OBJECT_TYPE_USER, principal);
                tuples.push(TupleKey::new(&user, relation, &object));
            }
        }

        Ok((object, tuples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCache, MemoryStore};

    fn sync_engine(store: Arc<MemoryStore>) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(store, Arc::new(MemoryCache::new()), true))
    }

    fn message(subject: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            subject: subject.to_string(),
            payload: Bytes::copy_from_slice(payload),
            reply: None,
        }
    }

    #[tokio::test]
    async fn test_standard_builder_tuples() {
        let builder = StandardAccessBuilder::new("committee");
        let payload = br#"{
            "uid": "c1",
            "object_type": "committee",
            "public": true,
            "relations": {"writer": ["alice", "bob"]},
            "references": {"parent": "c0", "project": "p1"}
        }"#;

        let (object, tuples) = builder.build(payload).await.unwrap();
        assert_eq!(object, "committee:c1");

        assert!(tuples.contains(&TupleKey::new("user:*", "viewer", "committee:c1")));
        // A parent reference takes the payload's object type as its prefix.
        assert!(tuples.contains(&TupleKey::new("committee:c0", "parent", "committee:c1")));
        assert!(tuples.contains(&TupleKey::new("project:p1", "project", "committee:c1")));
        assert!(tuples.contains(&TupleKey::new("user:alice", "writer", "committee:c1")));
        assert!(tuples.contains(&TupleKey::new("user:bob", "writer", "committee:c1")));
        assert_eq!(tuples.len(), 5);
    }

    #[tokio::test]
    async fn test_standard_builder_missing_uid() {
        let builder = StandardAccessBuilder::new("committee");
        let err = builder.build(br#"{"object_type": "committee"}"#).await.unwrap_err();
        assert!(matches!(err, WardenError::Payload(_)));
        assert_eq!(err.reply_text(), "committee ID not found");
    }

    #[tokio::test]
    async fn test_standard_builder_bad_json() {
        let builder = StandardAccessBuilder::new("groupsio_service");
        let err = builder.build(b"not json").await.unwrap_err();
        assert!(matches!(err, WardenError::Parse(_)));
    }

    #[tokio::test]
    async fn test_update_handler_replies_ok() {
        let store = Arc::new(MemoryStore::new());
        let handler = UpdateAccessHandler::new(
            sync_engine(Arc::clone(&store)),
            Box::new(StandardAccessBuilder::new("committee")),
        );

        let payload = br#"{"uid": "c1", "object_type": "committee", "public": true}"#;
        let reply = handler
            .handle(&message("lfx.update_access.committee", payload))
            .await
            .unwrap();

        assert_eq!(&reply[..], b"OK");
        assert_eq!(
            store.stored_tuples(),
            vec![TupleKey::new("user:*", "viewer", "committee:c1")]
        );
    }

    #[tokio::test]
    async fn test_delete_all_handler() {
        let store = Arc::new(MemoryStore::with_tuples(vec![
            TupleKey::new("user:a", "writer", "project:7cad9ee"),
            TupleKey::new("user:*", "viewer", "project:7cad9ee"),
        ]));
        let handler =
            DeleteAllAccessHandler::new(sync_engine(Arc::clone(&store)), "project:", "project");

        let reply = handler
            .handle(&message("lfx.delete_all_access.project", b"7cad9ee"))
            .await
            .unwrap();

        assert_eq!(&reply[..], b"OK");
        assert!(store.stored_tuples().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_rejects_serialized_payload() {
        let store = Arc::new(MemoryStore::new());
        let handler = DeleteAllAccessHandler::new(sync_engine(store), "project:", "project");

        for payload in [&br#"{"uid":"x"}"#[..], b"[1]", b"\"x\""] {
            let err = handler
                .handle(&message("lfx.delete_all_access.project", payload))
                .await
                .unwrap_err();
            assert_eq!(err.reply_text(), "unsupported deletion payload");
        }
    }

    #[tokio::test]
    async fn test_delete_all_rejects_empty_payload() {
        let store = Arc::new(MemoryStore::new());
        let handler = DeleteAllAccessHandler::new(sync_engine(store), "project:", "project");

        let err = handler
            .handle(&message("lfx.delete_all_access.project", b""))
            .await
            .unwrap_err();
        assert_eq!(err.reply_text(), "empty deletion payload");
    }
}
