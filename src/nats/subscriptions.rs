//! Queue subscriptions and the reply tail
//!
//! One queue subscription per registered subject; each delivery runs on its
//! own task. Reply sending happens in exactly one place, driven by the
//! handler's result: success bodies and short error strings both go back on
//! the reply inbox when one was provided.

use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::client::NatsClient;
use super::subjects::SYNC_QUEUE;
use crate::handlers::{Dispatcher, InboundMessage};
use crate::types::{Result, WardenError};

/// Subscribe to every subject in the dispatcher's registry, sharing one
/// queue group across replicas. Returns the subscription tasks; they run
/// until the connection drains.
pub async fn start(nats: &NatsClient, dispatcher: Arc<Dispatcher>) -> Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();

    for subject in dispatcher.subjects() {
        let mut subscriber = nats.queue_subscribe(&subject, SYNC_QUEUE).await?;
        info!(subject = %subject, queue = SYNC_QUEUE, "subscribed to subject");

        let nats = nats.clone();
        let dispatcher = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let nats = nats.clone();
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let inbound = InboundMessage::from(message);
                    let subject = inbound.subject.clone();
                    if let Err(e) = dispatch(&nats, &dispatcher, inbound).await {
                        error!(error = %e, subject = %subject, "error handling message");
                    }
                });
            }
        }));
    }

    Ok(tasks)
}

/// Run one delivery through its handler and send the reply, if requested.
pub async fn dispatch(
    nats: &NatsClient,
    dispatcher: &Dispatcher,
    message: InboundMessage,
) -> Result<()> {
    let Some(handler) = dispatcher.handler(&message.subject) else {
        warn!(subject = %message.subject, "no handler registered for subject");
        return Ok(());
    };

    let outcome = handler.handle(&message).await;

    if let Some(inbox) = &message.reply {
        if let Err(e) = nats.publish(inbox, reply_body(&outcome)).await {
            warn!(error = %e, "failed to send reply");
            return Err(WardenError::Reply(format!("failed to send reply: {}", e)));
        }
    }

    outcome.map(|_| ())
}

/// The bytes that go back on the reply inbox: the handler's body on
/// success, its short reply string on failure.
fn reply_body(outcome: &crate::types::Result<Bytes>) -> Bytes {
    match outcome {
        Ok(body) => body.clone(),
        Err(e) => Bytes::from(e.reply_text().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Subscription loops need a running NATS server; only the reply tail is
    // unit tested here.

    #[test]
    fn test_reply_body_success_passthrough() {
        let outcome = Ok(Bytes::from_static(b"OK"));
        assert_eq!(&reply_body(&outcome)[..], b"OK");
    }

    #[test]
    fn test_reply_body_error_uses_short_text() {
        let outcome = Err(WardenError::Parse("failed to extract check requests".to_string()));
        assert_eq!(&reply_body(&outcome)[..], b"failed to extract check requests");
    }
}
