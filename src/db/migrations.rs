//! Forward-only migration registry.
//!
//! Versions are embedded at compile time from `src/db/migrations/*.sql` and
//! applied through `refinery`'s rusqlite runner. Migrations are never edited
//! after release; a bug in an already-shipped migration is fixed with a new,
//! higher-numbered migration.

refinery::embed_migrations!("src/db/migrations");

// `embed_migrations!` expands to a nested `mod migrations { pub fn runner() }`
// inside this module; re-export so callers just write `migrations::runner()`.
pub use migrations::runner;
