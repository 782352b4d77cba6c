//! Project access-control builder

use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use super::DesiredStateBuilder;
use crate::tuple::{
    TupleKey, OBJECT_TYPE_PROJECT, OBJECT_TYPE_USER, RELATION_AUDITOR,
    RELATION_MEETING_COORDINATOR, RELATION_PARENT, RELATION_VIEWER, RELATION_WRITER,
    USER_WILDCARD,
};
use crate::types::{Result, WardenError};

#[derive(Debug, Deserialize)]
struct ProjectPayload {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    parent_uid: String,
    #[serde(default)]
    writers: Vec<String>,
    #[serde(default)]
    auditors: Vec<String>,
    #[serde(default)]
    meeting_coordinators: Vec<String>,
}

/// Desired-state builder for project access updates.
pub struct ProjectAccessBuilder;

#[async_trait]
impl DesiredStateBuilder for ProjectAccessBuilder {
    fn kind(&self) -> &'static str {
        "project"
    }

    async fn build(&self, payload: &[u8]) -> Result<(String, Vec<TupleKey>)> {
        let project: ProjectPayload = serde_json::from_slice(payload).map_err(|e| {
            error!(error = %e, "event data parse error");
            WardenError::Parse("event data parse error".to_string())
        })?;

        if project.uid.is_empty() {
            error!("project ID not found");
            return Err(WardenError::Payload("project ID not found".to_string()));
        }

        let object = format!("{}{}", OBJECT_TYPE_PROJECT, project.uid);
        let mut tuples = Vec::with_capacity(4);

        if project.public {
            tuples.push(TupleKey::new(USER_WILDCARD, RELATION_VIEWER, &object));
        }

        if !project.parent_uid.is_empty() {
            let parent = format!("{}{}", OBJECT_TYPE_PROJECT, project.parent_uid);
            tuples.push(TupleKey::new(&parent, RELATION_PARENT, &object));
        }

        for principal in &project.writers {
            let user = format!("{}{}", OBJECT_TYPE_USER, principal);
            tuples.push(TupleKey::new(&user, RELATION_WRITER, &object));
        }
        for principal in &project.auditors {
            let user = format!("{}{}", OBJECT_TYPE_USER, principal);
            tuples.push(TupleKey::new(&user, RELATION_AUDITOR, &object));
        }
        for principal in &project.meeting_coordinators {
            let user = format!("{}{}", OBJECT_TYPE_USER, principal);
            tuples.push(TupleKey::new(&user, RELATION_MEETING_COORDINATOR, &object));
        }

        Ok((object, tuples))
    }
}
