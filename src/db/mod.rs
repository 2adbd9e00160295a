//! Storage substrate: an embedded SQLite store reached through an r2d2 pool.
//!
//! WAL journaling, a short `busy_timeout` so a blocked writer fails fast
//! instead of hanging, and a pool handle cloned into every higher-level
//! store rather than a single shared connection.

mod migrations;
mod tx;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::{StorageTarget, StoreConfig};
use crate::error::GatewayResult;

pub use tx::immediate_transaction;

pub type SqlitePool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Owns the connection pool backing both the identity store and the sync
/// gateway. Cheaply cloneable (the pool itself is `Arc`-backed internally).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens a store per `config`, applying PRAGMAs and running pending
    /// migrations. `test_mode` controls whether a missing `DB_PATH` is
    /// tolerated (see [`StoreConfig::resolve`]).
    pub fn open(config: &StoreConfig, test_mode: bool) -> GatewayResult<Self> {
        let target = config.resolve(test_mode)?;
        if config.in_memory_warning(test_mode, &target) {
            tracing::warn!("opening an in-memory store outside test mode; data will not survive a restart");
        }

        let pool = Self::build_pool(&target, config)?;
        let store = Store { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Wraps an already-open pool (used by tests that need direct pool
    /// control, e.g. to inspect rows with a raw connection).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Store { pool }
    }

    fn build_pool(target: &StorageTarget, config: &StoreConfig) -> GatewayResult<SqlitePool> {
        let journal_mode = config.journal_mode.clone();
        let synchronous = config.synchronous.clone();

        let manager = match target {
            StorageTarget::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            crate::error::GatewayError::Internal(format!(
                                "failed to create database directory {parent:?}: {e}"
                            ))
                        })?;
                    }
                }
                SqliteConnectionManager::file(path)
            }
            StorageTarget::InMemory => SqliteConnectionManager::memory(),
        }
        .with_init(move |c| {
            c.pragma_update(None, "foreign_keys", &"ON")?;
            c.pragma_update(None, "journal_mode", &journal_mode)?;
            c.pragma_update(None, "synchronous", &synchronous)?;
            c.pragma_update(None, "busy_timeout", &3000i64)?;
            Ok(())
        });

        // In-memory SQLite databases are per-connection; cap the pool at one
        // connection so every caller shares the same in-memory database.
        let max_size = match target {
            StorageTarget::File(_) => 15,
            StorageTarget::InMemory => 1,
        };

        Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| {
                crate::error::GatewayError::Internal(format!("failed to build connection pool: {e}"))
            })
    }

    /// Borrows a pooled connection.
    pub fn conn(&self) -> GatewayResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> GatewayResult<()> {
        let mut conn = self.conn()?;
        migrations::runner()
            .run(&mut *conn)
            .map_err(|e| crate::error::GatewayError::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }
}

/// Convenience wrapper so call sites can hold an `Arc<Store>` without extra
/// ceremony; `Store` itself is already cheap to clone but some callers
/// (background GC loops) want a stable shared handle.
pub type SharedStore = Arc<Store>;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        let cfg = StoreConfig::default();
        Store::open(&cfg, true).expect("open in-memory store")
    }

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = test_store();
        let conn = store.conn().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='change_log'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn pragmas_applied() {
        let store = test_store();
        let conn = store.conn().unwrap();
        let fk: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
    }
}
