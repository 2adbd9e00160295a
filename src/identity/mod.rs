//! Identity & workspace store: users, auth accounts, workspaces, members,
//! and the per-user active-workspace pointer.
//!
//! Mutating operations acquire the writer lock immediately
//! (`db::immediate_transaction`): `resolve_or_create_user`, member
//! upserts, and workspace removal+re-homing all need conflict-safe
//! transactions rather than read-then-insert.

mod admin;
mod invites;

pub use invites::{ConsumedInvite, CreatedInvite};

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::Store;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Role, User, Workspace, WorkspaceMember, WorkspaceSummary};

/// Identity & workspace store. Cheap to clone: `Store` wraps a pool handle
/// and `Clock` is held behind an `Arc`.
#[derive(Clone)]
pub struct IdentityStore {
    store: Store,
    clock: std::sync::Arc<dyn Clock>,
}

impl IdentityStore {
    pub fn new(store: Store, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Resolves `(provider, provider_user_id)` to a user id, creating the
    /// user on first sight. Two concurrent callers with identical inputs
    /// observe the same user id and at most one user row is created: the
    /// insert into `auth_accounts` is conflict-safe (`ON CONFLICT DO
    /// NOTHING`) and the winner is re-read, never assumed from the insert
    /// we issued ourselves.
    #[tracing::instrument(skip(self, email, display_name))]
    pub fn resolve_or_create_user(
        &self,
        provider: &str,
        provider_user_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> GatewayResult<String> {
        let mut conn = self.store.conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock.now();

        let candidate_user_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO users (id, email, display_name, active_workspace_id, created_at) \
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![candidate_user_id, email, display_name, now],
        )?;

        let account_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO auth_accounts (id, user_id, provider, provider_user_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(provider, provider_user_id) DO NOTHING",
            params![account_id, candidate_user_id, provider, provider_user_id, now],
        )?;

        let winner_user_id: String = tx.query_row(
            "SELECT user_id FROM auth_accounts WHERE provider = ?1 AND provider_user_id = ?2",
            params![provider, provider_user_id],
            |row| row.get(0),
        )?;

        if winner_user_id != candidate_user_id {
            // Another account already existed (this call lost the race, or
            // is a pure replay); drop the speculative user row.
            tx.execute("DELETE FROM users WHERE id = ?1", params![candidate_user_id])?;
        }

        tx.commit()?;
        Ok(winner_user_id)
    }

    #[tracing::instrument(skip(self))]
    pub fn get_user(&self, provider: &str, provider_user_id: &str) -> GatewayResult<Option<User>> {
        let conn = self.store.conn()?;
        conn.query_row(
            "SELECT u.id, u.email, u.display_name, u.active_workspace_id, u.created_at \
             FROM users u JOIN auth_accounts a ON a.user_id = u.id \
             WHERE a.provider = ?1 AND a.provider_user_id = ?2",
            params![provider, provider_user_id],
            row_to_user,
        )
        .optional()
        .map_err(GatewayError::from)
    }

    /// Preference order: (a) current `active_workspace_id` if it still
    /// names a non-deleted workspace the user belongs to; (b) the oldest
    /// remaining non-deleted membership, repairing the active pointer;
    /// (c) create "My Workspace" with this user as sole owner.
    #[tracing::instrument(skip(self))]
    pub fn get_or_create_default_workspace(&self, user_id: &str) -> GatewayResult<(String, String)> {
        let mut conn = self.store.conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock.now();

        let active_workspace_id: Option<String> = tx
            .query_row(
                "SELECT active_workspace_id FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| GatewayError::NotFound(format!("user {user_id}")))?;

        if let Some(ws_id) = &active_workspace_id {
            let still_valid: Option<String> = tx
                .query_row(
                    "SELECT w.name FROM workspaces w \
                     JOIN workspace_members m ON m.workspace_id = w.id AND m.user_id = ?2 \
                     WHERE w.id = ?1 AND w.deleted = 0",
                    params![ws_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(name) = still_valid {
                tx.commit()?;
                return Ok((ws_id.clone(), name));
            }
        }

        let oldest_membership: Option<(String, String)> = tx
            .query_row(
                "SELECT w.id, w.name FROM workspace_members m \
                 JOIN workspaces w ON w.id = m.workspace_id \
                 WHERE m.user_id = ?1 AND w.deleted = 0 \
                 ORDER BY m.created_at ASC LIMIT 1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((ws_id, name)) = oldest_membership {
            tx.execute(
                "UPDATE users SET active_workspace_id = ?1 WHERE id = ?2",
                params![ws_id, user_id],
            )?;
            tx.commit()?;
            return Ok((ws_id, name));
        }

        let ws_id = Uuid::new_v4().to_string();
        let member_id = Uuid::new_v4().to_string();
        let name = "My Workspace".to_string();
        tx.execute(
            "INSERT INTO workspaces (id, name, description, owner_user_id, created_at, deleted, deleted_at) \
             VALUES (?1, ?2, NULL, ?3, ?4, 0, NULL)",
            params![ws_id, name, user_id, now],
        )?;
        tx.execute(
            "INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at) \
             VALUES (?1, ?2, ?3, 'owner', ?4)",
            params![member_id, ws_id, user_id, now],
        )?;
        tx.execute(
            "UPDATE users SET active_workspace_id = ?1 WHERE id = ?2",
            params![ws_id, user_id],
        )?;
        tx.commit()?;
        Ok((ws_id, name))
    }

    /// Returns `None` for non-members. Ignores soft-delete state; callers
    /// that need to exclude deleted workspaces check `get_workspace`
    /// separately.
    #[tracing::instrument(skip(self))]
    pub fn get_workspace_role(&self, user_id: &str, workspace_id: &str) -> GatewayResult<Option<Role>> {
        let conn = self.store.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|r| Role::parse(&r)))
    }

    #[tracing::instrument(skip(self))]
    pub fn list_user_workspaces(&self, user_id: &str) -> GatewayResult<Vec<WorkspaceSummary>> {
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(
            "SELECT w.id, w.name, w.description, m.role, w.created_at, \
                    (w.id = u.active_workspace_id) AS is_active \
             FROM workspace_members m \
             JOIN workspaces w ON w.id = m.workspace_id \
             JOIN users u ON u.id = m.user_id \
             WHERE m.user_id = ?1 AND w.deleted = 0 \
             ORDER BY w.created_at ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let role: String = row.get(3)?;
            Ok(WorkspaceSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                role: Role::parse(&role).unwrap_or(Role::Viewer),
                created_at: row.get(4)?,
                is_active: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(GatewayError::from)
    }

    /// Atomically inserts the workspace plus an owner membership for
    /// `user_id`.
    #[tracing::instrument(skip(self, description))]
    pub fn create_workspace(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> GatewayResult<String> {
        if name.trim().is_empty() {
            return Err(GatewayError::Validation("workspace name must not be empty".into()));
        }
        let mut conn = self.store.conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock.now();
        let ws_id = Uuid::new_v4().to_string();
        let member_id = Uuid::new_v4().to_string();

        tx.execute(
            "INSERT INTO workspaces (id, name, description, owner_user_id, created_at, deleted, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL)",
            params![ws_id, name, description, user_id, now],
        )?;
        tx.execute(
            "INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at) \
             VALUES (?1, ?2, ?3, 'owner', ?4)",
            params![member_id, ws_id, user_id, now],
        )?;
        tx.commit()?;
        Ok(ws_id)
    }

    /// Requires role ∈ {owner, editor}; no-op (but still `Ok`) on
    /// soft-deleted workspaces.
    #[tracing::instrument(skip(self, name, description))]
    pub fn update_workspace(
        &self,
        user_id: &str,
        workspace_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> GatewayResult<()> {
        if name.trim().is_empty() {
            return Err(GatewayError::Validation("workspace name must not be empty".into()));
        }
        let role = self.get_workspace_role(user_id, workspace_id)?;
        match role {
            Some(Role::Owner) | Some(Role::Editor) => {}
            _ => return Err(GatewayError::ForbiddenRole),
        }

        let mut conn = self.store.conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        tx.execute(
            "UPDATE workspaces SET name = ?1, description = ?2 WHERE id = ?3 AND deleted = 0",
            params![name, description, workspace_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Requires owner role. Soft-deletes the workspace and re-homes every
    /// affected user's active-workspace pointer in the same transaction.
    #[tracing::instrument(skip(self))]
    pub fn remove_workspace(&self, user_id: &str, workspace_id: &str) -> GatewayResult<()> {
        let role = self.get_workspace_role(user_id, workspace_id)?;
        if role != Some(Role::Owner) {
            return Err(GatewayError::ForbiddenOwner);
        }
        self.soft_delete_and_rehome(workspace_id)
    }

    /// Soft-deletes `workspace_id` and re-homes every user whose active
    /// pointer named it, all in one transaction. Shared by the owner-gated
    /// `remove_workspace` and the ungated admin `soft_delete_workspace`.
    pub(crate) fn soft_delete_and_rehome(&self, workspace_id: &str) -> GatewayResult<()> {
        let mut conn = self.store.conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock.now();

        tx.execute(
            "UPDATE workspaces SET deleted = 1, deleted_at = ?1 WHERE id = ?2",
            params![now, workspace_id],
        )?;

        let affected_users: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM users WHERE active_workspace_id = ?1",
            )?;
            let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for affected_user_id in affected_users {
            let replacement: Option<String> = tx
                .query_row(
                    "SELECT w.id FROM workspace_members m \
                     JOIN workspaces w ON w.id = m.workspace_id \
                     WHERE m.user_id = ?1 AND w.deleted = 0 AND w.id != ?2 \
                     ORDER BY m.created_at ASC LIMIT 1",
                    params![affected_user_id, workspace_id],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "UPDATE users SET active_workspace_id = ?1 WHERE id = ?2",
                params![replacement, affected_user_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Requires an active (non-soft-deleted) membership; fails
    /// `not_member` otherwise, including membership in a soft-deleted
    /// workspace.
    #[tracing::instrument(skip(self))]
    pub fn set_active_workspace(&self, user_id: &str, workspace_id: &str) -> GatewayResult<()> {
        let conn = self.store.conn()?;
        let is_member: bool = conn.query_row(
            "SELECT EXISTS(\
                SELECT 1 FROM workspace_members m \
                JOIN workspaces w ON w.id = m.workspace_id \
                WHERE m.workspace_id = ?1 AND m.user_id = ?2 AND w.deleted = 0\
             )",
            params![workspace_id, user_id],
            |row| row.get(0),
        )?;
        if !is_member {
            return Err(GatewayError::NotMember);
        }
        conn.execute(
            "UPDATE users SET active_workspace_id = ?1 WHERE id = ?2",
            params![workspace_id, user_id],
        )?;
        Ok(())
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn clock(&self) -> &std::sync::Arc<dyn Clock> {
        &self.clock
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        active_workspace_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_user_id: row.get(3)?,
        created_at: row.get(4)?,
        deleted: row.get::<_, i64>(5)? != 0,
        deleted_at: row.get(6)?,
    })
}

pub(crate) fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkspaceMember> {
    let role: String = row.get(3)?;
    Ok(WorkspaceMember {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        user_id: row.get(2)?,
        role: Role::parse(&role).unwrap_or(Role::Viewer),
        created_at: row.get(4)?,
    })
}
