//! Entity types shared by the identity store and sync gateway.
//!
//! Payloads are opaque JSON to the sync engine; the only types defined
//! here that the engine inspects are the envelope fields (ids, clocks,
//! roles, statuses).

use serde::{Deserialize, Serialize};

/// Workspace role, ordered `Owner > Editor > Viewer` for comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Role::Owner),
            "editor" => Some(Role::Editor),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

/// Lifecycle status of an [`Invite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Revoked => "revoked",
            InviteStatus::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(InviteStatus::Pending),
            "accepted" => Some(InviteStatus::Accepted),
            "revoked" => Some(InviteStatus::Revoked),
            "expired" => Some(InviteStatus::Expired),
            _ => None,
        }
    }
}

/// A user of the hosting application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub active_workspace_id: Option<String>,
    pub created_at: i64,
}

/// A workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_user_id: String,
    pub created_at: i64,
    pub deleted: bool,
    pub deleted_at: Option<i64>,
}

/// A user's view of a workspace they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub role: Role,
    pub created_at: i64,
    pub is_active: bool,
}

/// A workspace membership row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub role: Role,
    pub created_at: i64,
}

/// A deployment-wide operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub user_id: String,
    pub created_at: i64,
    pub created_by: Option<String>,
}

/// An invite to join a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: String,
    pub workspace_id: String,
    pub email: String,
    pub role: Role,
    pub status: InviteStatus,
    pub invited_by: String,
    pub token_hash: String,
    pub expires_at: i64,
    pub accepted_at: Option<i64>,
    pub accepted_user_id: Option<String>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The static allowlist of sync tables.
pub const SYNC_TABLES: &[&str] = &[
    "threads",
    "messages",
    "projects",
    "posts",
    "kv",
    "file_meta",
    "notifications",
];

/// Returns the materialized-table name backing a sync table, or `None` if
/// `table_name` is not allowlisted.
pub fn materialized_table_name(table_name: &str) -> Option<&'static str> {
    match table_name {
        "threads" => Some("sync_threads"),
        "messages" => Some("sync_messages"),
        "projects" => Some("sync_projects"),
        "posts" => Some("sync_posts"),
        "kv" => Some("sync_kv"),
        "file_meta" => Some("sync_file_meta"),
        "notifications" => Some("sync_notifications"),
        _ => None,
    }
}

/// The kind of a pending or committed sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Put,
    Delete,
}

impl SyncOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOp::Put => "put",
            SyncOp::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "put" => Some(SyncOp::Put),
            "delete" => Some(SyncOp::Delete),
            _ => None,
        }
    }
}

/// The client-generated stamp attached to every pending op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpStamp {
    pub device_id: String,
    pub op_id: String,
    pub hlc: String,
    pub clock: i64,
}

/// A single mutation a device wants to push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOp {
    pub table_name: String,
    pub operation: SyncOp,
    pub pk: String,
    pub payload: Option<serde_json::Value>,
    pub stamp: OpStamp,
}

/// A committed change as returned by `pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub server_version: i64,
    pub table_name: String,
    pub pk: String,
    pub op: SyncOp,
    pub payload: Option<serde_json::Value>,
    pub stamp: ChangeStamp,
}

/// The stamp recorded against a committed change (no `device_id`/`op_id`
/// redundancy beyond what `pull` needs to report).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStamp {
    pub clock: i64,
    pub hlc: String,
    pub device_id: String,
    pub op_id: String,
}

/// Outcome of a single op within a `push` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOpResult {
    pub op_id: String,
    pub success: bool,
    pub server_version: Option<i64>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

/// Response to a `push` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    pub results: Vec<PushOpResult>,
    pub server_version: i64,
}

/// Response to a `pull` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResult {
    pub changes: Vec<Change>,
    pub has_more: bool,
    pub next_cursor: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_is_owner_editor_viewer() {
        assert!(Role::Owner > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Owner, Role::Editor, Role::Viewer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("nope"), None);
    }

    #[test]
    fn materialized_table_name_only_covers_allowlist() {
        for table in SYNC_TABLES {
            assert!(materialized_table_name(table).is_some());
        }
        assert_eq!(materialized_table_name("not_a_table"), None);
    }
}
