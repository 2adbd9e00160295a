//! Crate-wide error type.
//!
//! Each kind maps to a stable string code an upper layer (HTTP, RPC, …)
//! can translate into its own status vocabulary.

use thiserror::Error;

/// Errors produced by the identity/workspace store and sync gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unknown sync table, empty required field, or out-of-range parameter.
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller's role does not permit updating the workspace.
    #[error("forbidden: role does not permit this action")]
    ForbiddenRole,

    /// Caller is not the workspace owner.
    #[error("forbidden: only the workspace owner may do this")]
    ForbiddenOwner,

    /// Caller has no active membership in the workspace.
    #[error("not a member of this workspace")]
    NotMember,

    /// Requested workspace, invite, or member does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invite has already passed its `expires_at`.
    #[error("invite expired")]
    InviteExpired,

    /// Invite was revoked before it could be consumed.
    #[error("invite revoked")]
    InviteRevoked,

    /// Invite has already been accepted once.
    #[error("invite already used")]
    InviteAlreadyUsed,

    /// Supplied invite token does not match the stored hash.
    #[error("invite token mismatch")]
    InviteTokenMismatch,

    /// Storage failure, migration failure, or an unreachable invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code for upper layers to map to transport
    /// status codes.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::ForbiddenRole => "forbidden_role",
            GatewayError::ForbiddenOwner => "forbidden_owner",
            GatewayError::NotMember => "not_member",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InviteExpired => "expired",
            GatewayError::InviteRevoked => "revoked",
            GatewayError::InviteAlreadyUsed => "already_used",
            GatewayError::InviteTokenMismatch => "token_mismatch",
            GatewayError::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        GatewayError::Internal(format!("{e:#}"))
    }
}

impl From<r2d2::Error> for GatewayError {
    fn from(e: r2d2::Error) -> Self {
        GatewayError::Internal(format!("connection pool error: {e:#}"))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Internal(format!("serialization error: {e:#}"))
    }
}

impl From<refinery::Error> for GatewayError {
    fn from(e: refinery::Error) -> Self {
        GatewayError::Internal(format!("migration error: {e:#}"))
    }
}

/// Crate-wide result alias.
pub type GatewayResult<T> = Result<T, GatewayError>;
