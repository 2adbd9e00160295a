//! Last-writer-wins merge on materialized tables and the paired
//! tombstone upsert.
//!
//! Both are expressed as a single conditional `INSERT ... ON CONFLICT ...
//! DO UPDATE ... WHERE` statement rather than a read-then-compare-then-write
//! round trip, so concurrent pushes resolve without a lost-update window.

use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::error::GatewayResult;
use crate::model::SyncOp;

/// Applies one put/delete op to `table_name`'s materialized row for
/// `(workspace_id, pk)`. `table_name` must come from
/// `model::materialized_table_name` (a fixed allowlist of `'static`
/// strings) — it is interpolated into the SQL text, never attacker input.
///
/// Returns `true` if this op actually won LWW and was applied (either as
/// the first row or by beating the existing `(clock, hlc)`), `false` if an
/// existing row already dominates it.
pub(crate) fn apply_to_materialized(
    tx: &Transaction<'_>,
    table_name: &'static str,
    workspace_id: &str,
    pk: &str,
    op: SyncOp,
    data_json: &str,
    clock: i64,
    hlc: &str,
    device_id: &str,
    now: i64,
) -> GatewayResult<bool> {
    let deleted = matches!(op, SyncOp::Delete) as i64;
    let sql = format!(
        "INSERT INTO {table} (workspace_id, id, data_json, clock, hlc, device_id, deleted, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
         ON CONFLICT(workspace_id, id) DO UPDATE SET \
            data_json = excluded.data_json, \
            clock = excluded.clock, \
            hlc = excluded.hlc, \
            device_id = excluded.device_id, \
            deleted = excluded.deleted, \
            updated_at = excluded.updated_at \
         WHERE excluded.clock > {table}.clock \
            OR (excluded.clock = {table}.clock AND excluded.hlc > {table}.hlc)",
        table = table_name,
    );
    let changed = tx.execute(
        &sql,
        params![workspace_id, pk, data_json, clock, hlc, device_id, deleted, now],
    )?;
    Ok(changed > 0)
}

/// Deletes the tombstone for `(workspace_id, table_name, pk)`, if any.
/// Called after a winning put so tombstone presence keeps tracking the
/// overall LWW winner rather than surviving a delete that a later put beat.
pub(crate) fn clear_tombstone(
    tx: &Transaction<'_>,
    workspace_id: &str,
    table_name: &str,
    pk: &str,
) -> GatewayResult<()> {
    tx.execute(
        "DELETE FROM tombstones WHERE workspace_id = ?1 AND table_name = ?2 AND pk = ?3",
        params![workspace_id, table_name, pk],
    )?;
    Ok(())
}

/// Upserts a tombstone for `(workspace_id, table_name, pk)` so a winning
/// delete is visible to devices that were offline when it happened. Uses
/// `(clock, server_version)` lexicographic comparison, matching the change
/// log's allocation order rather than the client-supplied HLC.
pub(crate) fn upsert_tombstone(
    tx: &Transaction<'_>,
    workspace_id: &str,
    table_name: &str,
    pk: &str,
    clock: i64,
    server_version: i64,
    now: i64,
) -> GatewayResult<()> {
    tx.execute(
        "INSERT INTO tombstones (id, workspace_id, table_name, pk, deleted_at, clock, server_version, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?5) \
         ON CONFLICT(workspace_id, table_name, pk) DO UPDATE SET \
            deleted_at = excluded.deleted_at, \
            clock = excluded.clock, \
            server_version = excluded.server_version \
         WHERE excluded.clock > tombstones.clock \
            OR (excluded.clock = tombstones.clock AND excluded.server_version > tombstones.server_version)",
        params![Uuid::new_v4().to_string(), workspace_id, table_name, pk, now, clock, server_version],
    )?;
    Ok(())
}
