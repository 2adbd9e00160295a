//! Admin/ops surface: deployment-wide admin flags, membership overrides,
//! workspace pagination for support tooling, user search, and per-workspace
//! settings. None of these operations go through the role checks the
//! member-facing identity operations enforce — they are gated by the
//! caller's own admin-authentication layer, which lives outside this
//! crate.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{row_to_member, row_to_user, row_to_workspace, IdentityStore};
use crate::error::{GatewayError, GatewayResult};
use crate::model::{AdminUser, Role, User, Workspace, WorkspaceMember};

impl IdentityStore {
    #[tracing::instrument(skip(self))]
    pub fn list_admins(&self) -> GatewayResult<Vec<AdminUser>> {
        let conn = self.store().conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, created_at, created_by FROM admin_users ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AdminUser {
                user_id: row.get(0)?,
                created_at: row.get(1)?,
                created_by: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(GatewayError::from)
    }

    /// Idempotent: granting an already-admin user is a no-op.
    #[tracing::instrument(skip(self, created_by))]
    pub fn grant_admin(&self, user_id: &str, created_by: Option<&str>) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        let now = self.clock().now();
        conn.execute(
            "INSERT INTO admin_users (user_id, created_at, created_by) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO NOTHING",
            params![user_id, now, created_by],
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn revoke_admin(&self, user_id: &str) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        conn.execute("DELETE FROM admin_users WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn is_admin(&self, user_id: &str) -> GatewayResult<bool> {
        let conn = self.store().conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM admin_users WHERE user_id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self))]
    pub fn list_members(&self, workspace_id: &str) -> GatewayResult<Vec<WorkspaceMember>> {
        let conn = self.store().conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, user_id, role, created_at \
             FROM workspace_members WHERE workspace_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![workspace_id], row_to_member)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(GatewayError::from)
    }

    /// Inserts or updates a membership without any role check on the
    /// caller — this is the admin override path.
    #[tracing::instrument(skip(self))]
    pub fn upsert_member(&self, workspace_id: &str, user_id: &str, role: Role) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        let now = self.clock().now();
        conn.execute(
            "INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role",
            params![Uuid::new_v4().to_string(), workspace_id, user_id, role.as_str(), now],
        )?;
        Ok(())
    }

    /// Fails `not_found` if the user has no existing membership; use
    /// `upsert_member` to create one.
    #[tracing::instrument(skip(self))]
    pub fn set_member_role(&self, workspace_id: &str, user_id: &str, role: Role) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        let updated = conn.execute(
            "UPDATE workspace_members SET role = ?1 WHERE workspace_id = ?2 AND user_id = ?3",
            params![role.as_str(), workspace_id, user_id],
        )?;
        if updated == 0 {
            return Err(GatewayError::NotFound(format!("member {user_id} in workspace {workspace_id}")));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_member(&self, workspace_id: &str, user_id: &str) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        conn.execute(
            "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
        )?;
        Ok(())
    }

    /// Admin pagination over all workspaces, optionally filtered by a
    /// case-insensitive `LIKE` on name and including soft-deleted rows.
    #[tracing::instrument(skip(self, search))]
    pub fn list_workspaces(
        &self,
        search: Option<&str>,
        include_deleted: bool,
        limit: i64,
        offset: i64,
    ) -> GatewayResult<Vec<Workspace>> {
        let conn = self.store().conn()?;
        let pattern = search.map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));

        let mut sql = String::from(
            "SELECT id, name, description, owner_user_id, created_at, deleted, deleted_at \
             FROM workspaces WHERE 1=1",
        );
        if !include_deleted {
            sql.push_str(" AND deleted = 0");
        }
        if pattern.is_some() {
            sql.push_str(" AND name LIKE ?1 ESCAPE '\\'");
            sql.push_str(" ORDER BY created_at ASC LIMIT ?2 OFFSET ?3");
        } else {
            sql.push_str(" ORDER BY created_at ASC LIMIT ?1 OFFSET ?2");
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(pattern) = &pattern {
            stmt.query_map(params![pattern, limit, offset], row_to_workspace)?
                .collect::<Result<Vec<_>, _>>()
        } else {
            stmt.query_map(params![limit, offset], row_to_workspace)?
                .collect::<Result<Vec<_>, _>>()
        };
        rows.map_err(GatewayError::from)
    }

    #[tracing::instrument(skip(self))]
    pub fn get_workspace(&self, workspace_id: &str) -> GatewayResult<Option<Workspace>> {
        let conn = self.store().conn()?;
        conn.query_row(
            "SELECT id, name, description, owner_user_id, created_at, deleted, deleted_at \
             FROM workspaces WHERE id = ?1",
            params![workspace_id],
            row_to_workspace,
        )
        .optional()
        .map_err(GatewayError::from)
    }

    /// Unlike `remove_workspace`, performs no ownership check: admin
    /// override, still re-homes affected users atomically.
    #[tracing::instrument(skip(self))]
    pub fn soft_delete_workspace(&self, workspace_id: &str) -> GatewayResult<()> {
        self.soft_delete_and_rehome(workspace_id)
    }

    #[tracing::instrument(skip(self))]
    pub fn restore_workspace(&self, workspace_id: &str) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        conn.execute(
            "UPDATE workspaces SET deleted = 0, deleted_at = NULL WHERE id = ?1",
            params![workspace_id],
        )?;
        Ok(())
    }

    /// Case-insensitive search over email and display name.
    #[tracing::instrument(skip(self, query))]
    pub fn search_users(&self, query: &str, limit: i64) -> GatewayResult<Vec<User>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let conn = self.store().conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, email, display_name, active_workspace_id, created_at FROM users \
             WHERE (email LIKE ?1 ESCAPE '\\' OR display_name LIKE ?1 ESCAPE '\\') \
             ORDER BY created_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pattern, limit], row_to_user)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(GatewayError::from)
    }

    #[tracing::instrument(skip(self))]
    pub fn get_workspace_setting(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> GatewayResult<Option<serde_json::Value>> {
        let conn = self.store().conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value_json FROM workspace_settings WHERE workspace_id = ?1 AND key = ?2",
                params![workspace_id, key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, value))]
    pub fn set_workspace_setting(
        &self,
        workspace_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> GatewayResult<()> {
        let conn = self.store().conn()?;
        let now = self.clock().now();
        let value_json = serde_json::to_string(value)?;
        conn.execute(
            "INSERT INTO workspace_settings (workspace_id, key, value_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(workspace_id, key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![workspace_id, key, value_json, now],
        )?;
        Ok(())
    }
}
