//! Invite lifecycle: `pending → accepted | revoked | expired`.
//!
//! Token verification uses a constant-time comparison of the stored hash
//! rather than `==`, since an invite token is a bearer credential.

use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::IdentityStore;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Invite, InviteStatus, Role};

/// An invite plus the one-time plaintext token; only returned at creation.
/// Only `token_hash` is ever persisted.
#[derive(Debug, Clone)]
pub struct CreatedInvite {
    pub invite: Invite,
    pub token: String,
}

/// Result of successfully consuming an invite.
#[derive(Debug, Clone)]
pub struct ConsumedInvite {
    pub invite_id: String,
    pub workspace_id: String,
    pub role: Role,
}

impl IdentityStore {
    /// Creates a pending invite for `email` (lowercased, trimmed) in
    /// `workspace_id`, generating a random bearer token whose SHA-256
    /// hash is the only copy persisted.
    #[tracing::instrument(skip(self, invited_by))]
    pub fn create_invite(
        &self,
        workspace_id: &str,
        email: &str,
        role: Role,
        invited_by: &str,
        ttl_seconds: i64,
    ) -> GatewayResult<CreatedInvite> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Err(GatewayError::Validation("invite email must not be empty".into()));
        }
        if ttl_seconds <= 0 {
            return Err(GatewayError::Validation("ttl_seconds must be positive".into()));
        }

        let token = generate_token();
        let token_hash = hash_token(&token);

        let mut conn = self.store().conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock().now();
        let invite_id = Uuid::new_v4().to_string();
        let expires_at = now + ttl_seconds;

        tx.execute(
            "INSERT INTO invites \
                (id, workspace_id, email, role, status, invited_by, token_hash, \
                 expires_at, accepted_at, accepted_user_id, revoked_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, NULL, NULL, NULL, ?8, ?8)",
            params![
                invite_id,
                workspace_id,
                email,
                role.as_str(),
                invited_by,
                token_hash,
                expires_at,
                now,
            ],
        )?;
        tx.commit()?;

        Ok(CreatedInvite {
            invite: Invite {
                id: invite_id,
                workspace_id: workspace_id.to_string(),
                email,
                role,
                status: InviteStatus::Pending,
                invited_by: invited_by.to_string(),
                token_hash,
                expires_at,
                accepted_at: None,
                accepted_user_id: None,
                revoked_at: None,
                created_at: now,
                updated_at: now,
            },
            token,
        })
    }

    /// Lazily transitions pending invites past `expires_at` to `expired`
    /// before returning every invite in the workspace, newest first.
    #[tracing::instrument(skip(self))]
    pub fn list_invites(&self, workspace_id: &str) -> GatewayResult<Vec<Invite>> {
        let mut conn = self.store().conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock().now();

        tx.execute(
            "UPDATE invites SET status = 'expired', updated_at = ?2 \
             WHERE workspace_id = ?1 AND status = 'pending' AND expires_at <= ?2",
            params![workspace_id, now],
        )?;

        let invites = {
            let mut stmt = tx.prepare(
                "SELECT id, workspace_id, email, role, status, invited_by, token_hash, \
                        expires_at, accepted_at, accepted_user_id, revoked_at, created_at, updated_at \
                 FROM invites WHERE workspace_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![workspace_id], row_to_invite)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.commit()?;
        Ok(invites)
    }

    /// No-op if the invite is not currently pending.
    #[tracing::instrument(skip(self))]
    pub fn revoke_invite(&self, invite_id: &str) -> GatewayResult<()> {
        let mut conn = self.store().conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock().now();
        tx.execute(
            "UPDATE invites SET status = 'revoked', revoked_at = ?2, updated_at = ?2 \
             WHERE id = ?1 AND status = 'pending'",
            params![invite_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Lazily expires, fetches the oldest pending invite for
    /// `(workspace_id, lowercased email)`, verifies the token, marks it
    /// accepted, upserts `user_id`'s membership (overwriting any existing
    /// role with the invited role), and sets `user_id`'s active workspace.
    #[tracing::instrument(skip(self, token))]
    pub fn consume_invite(
        &self,
        workspace_id: &str,
        email: &str,
        token: &str,
        user_id: &str,
    ) -> GatewayResult<ConsumedInvite> {
        let email = email.trim().to_ascii_lowercase();

        let mut conn = self.store().conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock().now();

        tx.execute(
            "UPDATE invites SET status = 'expired', updated_at = ?3 \
             WHERE workspace_id = ?1 AND email = ?2 AND status = 'pending' AND expires_at <= ?3",
            params![workspace_id, email, now],
        )?;

        let pending: Option<Invite> = tx
            .query_row(
                "SELECT id, workspace_id, email, role, status, invited_by, token_hash, \
                        expires_at, accepted_at, accepted_user_id, revoked_at, created_at, updated_at \
                 FROM invites WHERE workspace_id = ?1 AND email = ?2 AND status = 'pending' \
                 ORDER BY created_at ASC LIMIT 1",
                params![workspace_id, email],
                row_to_invite,
            )
            .optional()?;

        let invite = match pending {
            Some(invite) => invite,
            None => {
                let most_recent: Option<Invite> = tx
                    .query_row(
                        "SELECT id, workspace_id, email, role, status, invited_by, token_hash, \
                                expires_at, accepted_at, accepted_user_id, revoked_at, created_at, updated_at \
                         FROM invites WHERE workspace_id = ?1 AND email = ?2 \
                         ORDER BY created_at DESC LIMIT 1",
                        params![workspace_id, email],
                        row_to_invite,
                    )
                    .optional()?;
                return Err(match most_recent.map(|i| i.status) {
                    None => GatewayError::NotFound("invite".into()),
                    Some(InviteStatus::Expired) => GatewayError::InviteExpired,
                    Some(InviteStatus::Revoked) => GatewayError::InviteRevoked,
                    Some(InviteStatus::Accepted) => GatewayError::InviteAlreadyUsed,
                    Some(InviteStatus::Pending) => {
                        GatewayError::Internal("pending invite disappeared mid-transaction".into())
                    }
                });
            }
        };

        if !constant_time_eq(invite.token_hash.as_bytes(), hash_token(token).as_bytes()) {
            return Err(GatewayError::InviteTokenMismatch);
        }

        tx.execute(
            "UPDATE invites SET status = 'accepted', accepted_at = ?2, accepted_user_id = ?3, updated_at = ?2 \
             WHERE id = ?1",
            params![invite.id, now, user_id],
        )?;

        let member_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role",
            params![member_id, workspace_id, user_id, invite.role.as_str(), now],
        )?;

        tx.execute(
            "UPDATE users SET active_workspace_id = ?1 WHERE id = ?2",
            params![workspace_id, user_id],
        )?;

        tx.commit()?;
        Ok(ConsumedInvite {
            invite_id: invite.id,
            workspace_id: invite.workspace_id,
            role: invite.role,
        })
    }
}

fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invite> {
    let role: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Invite {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        email: row.get(2)?,
        role: Role::parse(&role).unwrap_or(Role::Viewer),
        status: InviteStatus::parse(&status).unwrap_or(InviteStatus::Expired),
        invited_by: row.get(5)?,
        token_hash: row.get(6)?,
        expires_at: row.get(7)?,
        accepted_at: row.get(8)?,
        accepted_user_id: row.get(9)?,
        revoked_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn generate_token() -> String {
    use rand::RngCore;
    use zeroize::Zeroize;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = hex::encode(bytes);
    bytes.zeroize();
    encoded
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
