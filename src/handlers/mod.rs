//! Message handlers and subject dispatch
//!
//! Each inbound subject maps to one handler. Mutating subjects go through a
//! desired-state builder that turns the payload into the tuple set for one
//! object; the sync engine then operates uniformly on that set with no
//! knowledge of resource types. Handlers return the reply body on success
//! and a short reply string inside the error on failure; sending the reply
//! is the subscription loop's single tail step, not the handler's concern.

mod access;
mod check;
mod meeting;
mod project;

pub use access::{DeleteAllAccessHandler, StandardAccessBuilder, UpdateAccessHandler};
pub use check::AccessCheckHandler;
pub use meeting::{MeetingAccessBuilder, RegistrantPutHandler, RegistrantRemoveHandler};
pub use project::ProjectAccessBuilder;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::check::CheckEngine;
use crate::nats::subjects;
use crate::sync::SyncEngine;
use crate::tuple::{
    TupleKey, OBJECT_TYPE_COMMITTEE, OBJECT_TYPE_GROUPSIO_SERVICE, OBJECT_TYPE_MEETING,
    OBJECT_TYPE_PROJECT,
};
use crate::types::Result;

/// One delivery from the message bus, detached from the transport so
/// handlers are testable without a broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Reply inbox, when the sender expects a response.
    pub reply: Option<String>,
}

impl From<async_nats::Message> for InboundMessage {
    fn from(message: async_nats::Message) -> Self {
        Self {
            subject: message.subject.to_string(),
            payload: message.payload,
            reply: message.reply.map(|subject| subject.to_string()),
        }
    }
}

/// A handler for one inbound subject.
///
/// `Ok` carries the reply body (`OK` for mutating subjects, the textual
/// batch result for checks). `Err` carries the short reply string in its
/// payload; detailed diagnostics go to the log, not the inbox.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Result<Bytes>;
}

/// Builds the desired tuple set for one object from a domain payload.
#[async_trait]
pub trait DesiredStateBuilder: Send + Sync {
    /// Object kind handled by this builder, for logging.
    fn kind(&self) -> &'static str;

    /// Parse the payload and produce `(object, desired tuples)`.
    async fn build(&self, payload: &[u8]) -> Result<(String, Vec<TupleKey>)>;
}

/// Subject → handler registry.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subject: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(subject.to_string(), handler);
    }

    pub fn handler(&self, subject: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(subject).cloned()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Registry with every subject this service handles.
    pub fn standard(sync: Arc<SyncEngine>, check: Arc<CheckEngine>) -> Self {
        let mut dispatcher = Self::new();

        dispatcher.register(
            subjects::ACCESS_CHECK,
            Arc::new(AccessCheckHandler::new(check)),
        );

        dispatcher.register(
            subjects::PROJECT_UPDATE_ACCESS,
            Arc::new(UpdateAccessHandler::new(
                Arc::clone(&sync),
                Box::new(ProjectAccessBuilder),
            )),
        );
        dispatcher.register(
            subjects::PROJECT_DELETE_ALL_ACCESS,
            Arc::new(DeleteAllAccessHandler::new(
                Arc::clone(&sync),
                OBJECT_TYPE_PROJECT,
                "project",
            )),
        );

        dispatcher.register(
            subjects::MEETING_UPDATE_ACCESS,
            Arc::new(UpdateAccessHandler::new(
                Arc::clone(&sync),
                Box::new(MeetingAccessBuilder::new(Arc::clone(&sync))),
            )),
        );
        dispatcher.register(
            subjects::MEETING_DELETE_ALL_ACCESS,
            Arc::new(DeleteAllAccessHandler::new(
                Arc::clone(&sync),
                OBJECT_TYPE_MEETING,
                "meeting",
            )),
        );
        dispatcher.register(
            subjects::MEETING_REGISTRANT_PUT,
            Arc::new(RegistrantPutHandler::new(Arc::clone(&sync))),
        );
        dispatcher.register(
            subjects::MEETING_REGISTRANT_REMOVE,
            Arc::new(RegistrantRemoveHandler::new(Arc::clone(&sync))),
        );

        dispatcher.register(
            subjects::COMMITTEE_UPDATE_ACCESS,
            Arc::new(UpdateAccessHandler::new(
                Arc::clone(&sync),
                Box::new(StandardAccessBuilder::new("committee")),
            )),
        );
        dispatcher.register(
            subjects::COMMITTEE_DELETE_ALL_ACCESS,
            Arc::new(DeleteAllAccessHandler::new(
                Arc::clone(&sync),
                OBJECT_TYPE_COMMITTEE,
                "committee",
            )),
        );

        dispatcher.register(
            subjects::GROUPSIO_SERVICE_UPDATE_ACCESS,
            Arc::new(UpdateAccessHandler::new(
                Arc::clone(&sync),
                Box::new(StandardAccessBuilder::new("groupsio_service")),
            )),
        );
        dispatcher.register(
            subjects::GROUPSIO_SERVICE_DELETE_ALL_ACCESS,
            Arc::new(DeleteAllAccessHandler::new(
                sync,
                OBJECT_TYPE_GROUPSIO_SERVICE,
                "groupsio_service",
            )),
        );

        dispatcher
    }
}
