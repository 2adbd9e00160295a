//! Immediate-mode transaction helper shared by the identity store and sync
//! gateway.
//!
//! Acquires the writer lock up front via an IMMEDIATE begin so two
//! concurrent mutators never race on counter allocation or unique-index
//! conflicts, then commit-or-rollback as a single unit. rusqlite's
//! `Transaction` guard rolls back on drop if never committed, so an early
//! `?` return is enough to unwind cleanly.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::GatewayResult;

/// Opens a transaction that acquires SQLite's reserved writer lock
/// immediately, rather than lazily on the first write statement.
pub fn immediate_transaction(conn: &mut Connection) -> GatewayResult<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}
