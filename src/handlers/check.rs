//! Access check request handler

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{InboundMessage, MessageHandler};
use crate::check::CheckEngine;
use crate::tuple::extract_check_batch;
use crate::types::{Result, WardenError};

/// Handles `lfx.access_check.request`: a newline-delimited batch of
/// `object#relation@user` lines, answered with one tab-separated result
/// line per check.
pub struct AccessCheckHandler {
    check: Arc<CheckEngine>,
}

impl AccessCheckHandler {
    pub fn new(check: Arc<CheckEngine>) -> Self {
        Self { check }
    }
}

#[async_trait]
impl MessageHandler for AccessCheckHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<Bytes> {
        info!(
            message = %String::from_utf8_lossy(&message.payload),
            "handling access check request"
        );

        let checks = extract_check_batch(&message.payload).map_err(|e| {
            warn!(error = %e, "failed to extract check requests");
            WardenError::Parse("failed to extract check requests".to_string())
        })?;

        if checks.is_empty() {
            warn!("no check requests found");
            return Err(WardenError::Payload("no check requests found".to_string()));
        }

        debug!(count = checks.len(), "checking relationships");
        let response = self.check.check_relationships(&checks).await.map_err(|e| {
            error!(error = %e, "failed to check relationship");
            // Preserve the error kind; the inbox only sees the short text.
            match e {
                WardenError::EmptyResponse(_) => {
                    WardenError::EmptyResponse("failed to check relationship".to_string())
                }
                _ => WardenError::Transport("failed to check relationship".to_string()),
            }
        })?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckMetrics;
    use crate::testing::{MemoryCache, MemoryStore};

    fn handler(store: Arc<MemoryStore>) -> AccessCheckHandler {
        AccessCheckHandler::new(Arc::new(CheckEngine::new(
            store,
            Arc::new(MemoryCache::new()),
            Arc::new(CheckMetrics::new()),
            true,
        )))
    }

    fn message(payload: &[u8]) -> InboundMessage {
        InboundMessage {
            subject: "lfx.access_check.request".to_string(),
            payload: Bytes::copy_from_slice(payload),
            reply: Some("_INBOX.reply".to_string()),
        }
    }

    #[tokio::test]
    async fn test_check_request_round_trip() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:1#writer@user:a", true);
        store.set_check_result("project:1#viewer@user:b", false);
        let handler = handler(store);

        let reply = handler
            .handle(&message(b"project:1#writer@user:a\nproject:1#viewer@user:b"))
            .await
            .unwrap();

        assert_eq!(
            &reply[..],
            b"project:1#writer@user:a\ttrue\nproject:1#viewer@user:b\tfalse"
        );
    }

    #[tokio::test]
    async fn test_malformed_line_fails_request() {
        let handler = handler(Arc::new(MemoryStore::new()));
        let err = handler
            .handle(&message(b"project:1#writer@user:a\ngarbage"))
            .await
            .unwrap_err();
        assert_eq!(err.reply_text(), "failed to extract check requests");
    }

    #[tokio::test]
    async fn test_blank_payload_is_rejected() {
        let handler = handler(Arc::new(MemoryStore::new()));
        let err = handler.handle(&message(b"\n\n")).await.unwrap_err();
        assert_eq!(err.reply_text(), "no check requests found");
    }

    #[tokio::test]
    async fn test_check_failure_maps_to_short_reply() {
        let store = Arc::new(MemoryStore::new());
        store.return_empty_batch_result();
        let handler = handler(store);

        let err = handler
            .handle(&message(b"project:1#writer@user:a"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::EmptyResponse(_)));
        assert_eq!(err.reply_text(), "failed to check relationship");
    }
}
