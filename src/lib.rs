//! `syncgate`: the embedded sync engine and workspace/identity store behind
//! a multi-device chat/workspace application.
//!
//! This crate owns storage and invariants — contiguous server-version
//! allocation, op-level idempotency, last-writer-wins merge, workspace
//! lifecycle and role checks — but not transport, authentication, or the
//! client-side replica. Callers hand already-validated request data to
//! [`IdentityStore`] and [`SyncGateway`].

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod model;
pub mod sync;

pub use clock::{Clock, SystemClock};
pub use config::{StorageTarget, StoreConfig};
pub use db::Store;
pub use error::{GatewayError, GatewayResult};
pub use identity::IdentityStore;
pub use sync::SyncGateway;

/// Opt-in convenience for standalone tools and tests: installs a
/// `tracing-subscriber` `fmt` layer driven by `RUST_LOG`. A library does
/// not install a global subscriber on its own — the hosting binary owns
/// that decision — so this is never called from within the crate itself.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
