//! Meeting access-control builder and registrant handlers
//!
//! Meetings are the one object type whose desired state is enriched from
//! the store itself: the owning project's meeting coordinators each get the
//! organizer relation on the meeting. Registrant events mutate a single
//! per-user relation instead of replacing the whole set.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{DesiredStateBuilder, InboundMessage, MessageHandler};
use crate::sync::SyncEngine;
use crate::tuple::{
    TupleKey, OBJECT_TYPE_COMMITTEE, OBJECT_TYPE_MEETING, OBJECT_TYPE_PROJECT, OBJECT_TYPE_USER,
    RELATION_COMMITTEE, RELATION_HOST, RELATION_MEETING_COORDINATOR, RELATION_MEMBER,
    RELATION_ORGANIZER, RELATION_PARTICIPANT, RELATION_PROJECT, RELATION_VIEWER, USER_WILDCARD,
};
use crate::types::{Result, WardenError};

#[derive(Debug, Deserialize)]
struct MeetingPayload {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    project_uid: String,
    #[serde(default)]
    organizers: Vec<String>,
    #[serde(default)]
    committees: Vec<String>,
}

/// Desired-state builder for meeting access updates.
pub struct MeetingAccessBuilder {
    sync: Arc<SyncEngine>,
}

impl MeetingAccessBuilder {
    pub fn new(sync: Arc<SyncEngine>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl DesiredStateBuilder for MeetingAccessBuilder {
    fn kind(&self) -> &'static str {
        "meeting"
    }

    async fn build(&self, payload: &[u8]) -> Result<(String, Vec<TupleKey>)> {
        let meeting: MeetingPayload = serde_json::from_slice(payload).map_err(|e| {
            error!(error = %e, "event data parse error");
            WardenError::Parse("event data parse error".to_string())
        })?;

        if meeting.uid.is_empty() {
            error!("meeting ID not found");
            return Err(WardenError::Payload("meeting ID not found".to_string()));
        }
        if meeting.project_uid.is_empty() {
            error!("meeting project ID not found");
            return Err(WardenError::Payload("meeting project ID not found".to_string()));
        }

        let object = format!("{}{}", OBJECT_TYPE_MEETING, meeting.uid);
        let project = format!("{}{}", OBJECT_TYPE_PROJECT, meeting.project_uid);

        // Every tuple that should exist for the meeting must be produced
        // here: the sync deletes whatever is stored but not listed.
        let mut tuples = Vec::with_capacity(4);

        if meeting.public {
            tuples.push(TupleKey::new(USER_WILDCARD, RELATION_VIEWER, &object));
        }

        // Associate the meeting with its project, and let the project's
        // meeting-coordinator userset organize it.
        tuples.push(TupleKey::new(&project, RELATION_PROJECT, &object));
        let coordinator_set = format!("{}#{}", project, RELATION_MEETING_COORDINATOR);
        tuples.push(TupleKey::new(&coordinator_set, RELATION_ORGANIZER, &object));

        // Each committee on the meeting participates through its members.
        for committee in &meeting.committees {
            let committee_object = format!("{}{}", OBJECT_TYPE_COMMITTEE, committee);
            tuples.push(TupleKey::new(&committee_object, RELATION_COMMITTEE, &object));
            let member_set = format!("{}#{}", committee_object, RELATION_MEMBER);
            tuples.push(TupleKey::new(&member_set, RELATION_PARTICIPANT, &object));
        }

        // Project the project's current meeting coordinators onto the
        // meeting as organizers. This is an optional enrichment: a read
        // failure downgrades the update instead of failing it.
        match self
            .sync
            .get_tuples_by_relation(&project, RELATION_MEETING_COORDINATOR)
            .await
        {
            Ok(coordinators) => {
                for coordinator in coordinators {
                    tuples.push(TupleKey::new(&coordinator.user, RELATION_ORGANIZER, &object));
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    project = %project,
                    "failed to read project tuples, continuing without project coordinators"
                );
            }
        }

        for principal in &meeting.organizers {
            let user = format!("{}{}", OBJECT_TYPE_USER, principal);
            tuples.push(TupleKey::new(&user, RELATION_ORGANIZER, &object));
        }

        Ok((object, tuples))
    }
}

#[derive(Debug, Deserialize)]
struct RegistrantPayload {
    #[serde(default)]
    username: String,
    #[serde(default)]
    meeting_uid: String,
    /// Whether the user gets the host relation instead of participant.
    #[serde(default)]
    host: bool,
}

impl RegistrantPayload {
    fn parse(payload: &[u8]) -> Result<Self> {
        let registrant: Self = serde_json::from_slice(payload).map_err(|e| {
            error!(error = %e, "event data parse error");
            WardenError::Parse("event data parse error".to_string())
        })?;

        if registrant.username.is_empty() {
            error!("registrant username not found");
            return Err(WardenError::Payload("registrant username not found".to_string()));
        }
        if registrant.meeting_uid.is_empty() {
            error!("meeting UID not found");
            return Err(WardenError::Payload("meeting UID not found".to_string()));
        }

        Ok(registrant)
    }

    fn meeting(&self) -> String {
        format!("{}{}", OBJECT_TYPE_MEETING, self.meeting_uid)
    }

    fn user(&self) -> String {
        format!("{}{}", OBJECT_TYPE_USER, self.username)
    }
}

/// Relations a registrant can hold on a meeting, as (target, other) given
/// the host flag.
fn registrant_relations(host: bool) -> (&'static str, &'static str) {
    if host {
        (RELATION_HOST, RELATION_PARTICIPANT)
    } else {
        (RELATION_PARTICIPANT, RELATION_HOST)
    }
}

/// Idempotent upsert of a single registrant relation on a meeting.
///
/// A participant↔host role transition collapses into one atomic
/// write+delete; a registrant already in the desired role is a no-op.
pub struct RegistrantPutHandler {
    sync: Arc<SyncEngine>,
}

impl RegistrantPutHandler {
    pub fn new(sync: Arc<SyncEngine>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl MessageHandler for RegistrantPutHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<Bytes> {
        info!(
            message = %String::from_utf8_lossy(&message.payload),
            "handling meeting registrant put"
        );

        let registrant = RegistrantPayload::parse(&message.payload)?;
        let meeting = registrant.meeting();
        let user = registrant.user();
        let (target, other) = registrant_relations(registrant.host);

        let current = self
            .sync
            .read_object_tuples(&meeting)
            .await
            .map_err(|e| {
                error!(error = %e, meeting = %meeting, "failed to read meeting tuples");
                WardenError::Transport("failed to update registrant".to_string())
            })?;

        let has_target = current
            .iter()
            .any(|t| t.user == user && t.relation == target);
        let has_other = current
            .iter()
            .any(|t| t.user == user && t.relation == other);

        let mut writes = Vec::new();
        if !has_target {
            writes.push(TupleKey::new(&user, target, &meeting));
        }
        let mut deletes = Vec::new();
        if has_other {
            deletes.push(TupleKey::new(&user, other, &meeting));
        }

        self.sync
            .apply_tuple_changes(&meeting, &writes, &deletes)
            .await
            .map_err(|e| {
                error!(error = %e, user = %user, meeting = %meeting, "failed to put registrant tuple");
                WardenError::Transport("failed to update registrant".to_string())
            })?;

        info!(
            user = %user,
            relation = target,
            meeting = %meeting,
            "put registrant on meeting"
        );

        Ok(Bytes::from_static(b"OK"))
    }
}

/// Removes a registrant's relations from a meeting.
pub struct RegistrantRemoveHandler {
    sync: Arc<SyncEngine>,
}

impl RegistrantRemoveHandler {
    pub fn new(sync: Arc<SyncEngine>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl MessageHandler for RegistrantRemoveHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<Bytes> {
        info!(
            message = %String::from_utf8_lossy(&message.payload),
            "handling meeting registrant remove"
        );

        let registrant = RegistrantPayload::parse(&message.payload)?;
        let meeting = registrant.meeting();
        let user = registrant.user();

        let current = self
            .sync
            .read_object_tuples(&meeting)
            .await
            .map_err(|e| {
                error!(error = %e, meeting = %meeting, "failed to read meeting tuples");
                WardenError::Transport("failed to remove registrant".to_string())
            })?;

        // Remove whichever registrant relations the user actually holds, so
        // removal is idempotent and survives a missed role transition.
        let deletes: Vec<TupleKey> = current
            .into_iter()
            .filter(|t| {
                t.user == user
                    && (t.relation == RELATION_PARTICIPANT || t.relation == RELATION_HOST)
            })
            .collect();

        self.sync
            .apply_tuple_changes(&meeting, &[], &deletes)
            .await
            .map_err(|e| {
                error!(error = %e, user = %user, meeting = %meeting, "failed to delete registrant tuple");
                WardenError::Transport("failed to remove registrant".to_string())
            })?;

        info!(
            user = %user,
            meeting = %meeting,
            removed = deletes.len(),
            "removed registrant from meeting"
        );

        Ok(Bytes::from_static(b"OK"))
    }
}
