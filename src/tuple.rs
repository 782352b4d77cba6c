//! Relationship tuple model and wire codec
//!
//! A tuple is one edge in the relationship graph: `(user, relation, object)`.
//! Its canonical text form is the relation key `object#relation@user`, which
//! doubles as the wire format for check requests and as the identity that
//! cache keys are derived from.

use data_encoding::BASE32_NOPAD;

use crate::types::{Result, WardenError};

// Relations defined by the authorization model. Constants for one object
// type can be shared with another (viewer means the same thing on a project
// and a meeting).
pub const RELATION_PARENT: &str = "parent";
pub const RELATION_WRITER: &str = "writer";
pub const RELATION_AUDITOR: &str = "auditor";
pub const RELATION_MEETING_COORDINATOR: &str = "meeting_coordinator";
pub const RELATION_VIEWER: &str = "viewer";
pub const RELATION_PROJECT: &str = "project";
pub const RELATION_COMMITTEE: &str = "committee";
pub const RELATION_ORGANIZER: &str = "organizer";
pub const RELATION_HOST: &str = "host";
pub const RELATION_PARTICIPANT: &str = "participant";
pub const RELATION_MEMBER: &str = "member";

// Object type prefixes.
pub const OBJECT_TYPE_USER: &str = "user:";
pub const OBJECT_TYPE_PROJECT: &str = "project:";
pub const OBJECT_TYPE_COMMITTEE: &str = "committee:";
pub const OBJECT_TYPE_MEETING: &str = "meeting:";
pub const OBJECT_TYPE_GROUPSIO_SERVICE: &str = "groupsio_service:";

/// Public access (all authenticated users)
pub const USER_WILDCARD: &str = "user:*";

/// Prefix that namespaces relation entries away from the reserved
/// invalidation key in the cache bucket.
pub const CACHE_KEY_PREFIX: &str = "rel.";

/// Reserved cache key whose creation timestamp is the global invalidation
/// marker.
pub const INVALIDATION_KEY: &str = "inv";

/// One relationship tuple: `(user, relation, object)`.
///
/// `object` and `user` have the shape `<type>:<uid>`; `user` may also be a
/// userset reference (`project:abc#meeting_coordinator`) or the wildcard
/// `user:*`. Identity is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleKey {
    pub user: String,
    pub relation: String,
    pub object: String,
}

impl TupleKey {
    pub fn new(user: &str, relation: &str, object: &str) -> Self {
        Self {
            user: user.to_string(),
            relation: relation.to_string(),
            object: object.to_string(),
        }
    }

    /// Canonical relation-key form: `object#relation@user`.
    pub fn relation_key(&self) -> String {
        format!("{}#{}@{}", self.object, self.relation, self.user)
    }

    /// Cache key: `rel.` + base32 (no padding) of the relation key.
    ///
    /// Base32 without padding keeps the key inside the token alphabet that
    /// the KV bucket's subject namespace allows. The encoder is a frozen
    /// constant: changing it would silently invalidate every entry in a
    /// deployed cache.
    pub fn cache_key(&self) -> String {
        format!(
            "{}{}",
            CACHE_KEY_PREFIX,
            BASE32_NOPAD.encode(self.relation_key().as_bytes())
        )
    }

    /// Whether the user side is a user principal (wildcard included) rather
    /// than an object or userset reference.
    pub fn is_user(&self) -> bool {
        self.user.starts_with(OBJECT_TYPE_USER)
    }
}

impl std::fmt::Display for TupleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relation_key())
    }
}

/// Parse a single check request line of the form `object#relation@user`.
///
/// Requires exactly the split points: one `@`, and a `#` somewhere left of
/// it. Empty components are accepted as long as both separators are present.
/// No validation is applied to the type prefixes.
pub fn parse_check_line(line: &[u8]) -> Result<TupleKey> {
    let text = std::str::from_utf8(line)
        .map_err(|_| WardenError::Parse(format!("invalid check request: {:?}", line)))?;

    let (first_part, user) = text
        .split_once('@')
        .ok_or_else(|| WardenError::Parse(format!("invalid check request: {}", text)))?;

    let (object, relation) = first_part
        .split_once('#')
        .ok_or_else(|| WardenError::Parse(format!("invalid check request: {}", text)))?;

    Ok(TupleKey::new(user, relation, object))
}

/// Extract check requests from a newline-delineated payload of
/// `object#relation@user` lines. Blank lines are skipped; any malformed
/// line fails the whole batch.
pub fn extract_check_batch(payload: &[u8]) -> Result<Vec<TupleKey>> {
    let mut checks = Vec::new();

    for line in payload.split(|b| *b == b'\n') {
        if line.is_empty() {
            continue;
        }

        let check = parse_check_line(line)?;
        tracing::debug!(
            object = %check.object,
            relation = %check.relation,
            user = %check.user,
            "parsed check request"
        );
        checks.push(check);
    }

    Ok(checks)
}
