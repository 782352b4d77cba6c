//! Subjects and queue group handled by this service

/// Batched access check requests, answered on the reply inbox.
pub const ACCESS_CHECK: &str = "lfx.access_check.request";

/// Project access control updates.
pub const PROJECT_UPDATE_ACCESS: &str = "lfx.update_access.project";

/// Project access control deletion (raw UID payload).
pub const PROJECT_DELETE_ALL_ACCESS: &str = "lfx.delete_all_access.project";

/// Meeting access control updates.
pub const MEETING_UPDATE_ACCESS: &str = "lfx.update_access.meeting";

/// Meeting access control deletion (raw UID payload).
pub const MEETING_DELETE_ALL_ACCESS: &str = "lfx.delete_all_access.meeting";

/// Idempotent upsert of a meeting registrant relation.
pub const MEETING_REGISTRANT_PUT: &str = "lfx.put_registrant.meeting";

/// Removal of a meeting registrant relation.
pub const MEETING_REGISTRANT_REMOVE: &str = "lfx.remove_registrant.meeting";

/// Committee access control updates.
pub const COMMITTEE_UPDATE_ACCESS: &str = "lfx.update_access.committee";

/// Committee access control deletion (raw UID payload).
pub const COMMITTEE_DELETE_ALL_ACCESS: &str = "lfx.delete_all_access.committee";

/// Groups.io service access control updates.
pub const GROUPSIO_SERVICE_UPDATE_ACCESS: &str = "lfx.update_access.groupsio_service";

/// Groups.io service access control deletion (raw UID payload).
pub const GROUPSIO_SERVICE_DELETE_ALL_ACCESS: &str = "lfx.delete_all_access.groupsio_service";

/// Queue group shared by all replicas so each delivery goes to one worker.
pub const SYNC_QUEUE: &str = "lfx.access-sync.queue";
