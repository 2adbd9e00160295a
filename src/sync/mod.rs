//! Sync gateway: `push`, `pull`, `updateCursor`, and retention-bounded GC.
//!
//! Every mutating call acquires the writer lock immediately and records
//! exactly one change-log row per applied op; conflicts on a shared key
//! are resolved by a clock/HLC comparison rather than a read-then-write
//! round trip (see `lww.rs`).

mod lww;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::Store;
use crate::error::GatewayResult;
use crate::model::{
    materialized_table_name, Change, ChangeStamp, PendingOp, PullResult, PushOpResult, PushResult,
    SyncOp,
};

/// Per-statement placeholder budget for `op_id IN (...)` idempotency
/// probes, kept well under SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`
/// regardless of how the bundled library was compiled.
const OP_ID_CHUNK_SIZE: usize = 500;

/// Pull never returns more than this many changes per call, regardless of
/// the caller's requested limit.
const MAX_PULL_LIMIT: i64 = 1000;

/// GC deletes in batches of this size to bound writer-lock hold time.
const GC_BATCH_SIZE: i64 = 1000;

#[derive(Clone)]
pub struct SyncGateway {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl SyncGateway {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Exposes the underlying [`Store`] for callers (and tests) that need
    /// to inspect materialized state directly.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Pushes a batch of ops to `workspace_id`. Empty batches and batches
    /// containing an unknown table are handled before any transaction is
    /// opened — neither touches state.
    #[tracing::instrument(skip(self, ops))]
    pub fn push(&self, workspace_id: &str, ops: Vec<PendingOp>) -> GatewayResult<PushResult> {
        if ops.is_empty() {
            let current = self.read_counter(workspace_id)?;
            return Ok(PushResult { results: vec![], server_version: current });
        }

        if let Some(invalid) = ops.iter().find(|op| materialized_table_name(&op.table_name).is_none()) {
            tracing::warn!(table = %invalid.table_name, "push batch rejected: unknown sync table");
            let current = self.read_counter(workspace_id)?;
            let results = ops
                .iter()
                .map(|op| PushOpResult {
                    op_id: op.stamp.op_id.clone(),
                    success: false,
                    server_version: None,
                    error: Some(format!("unknown sync table: {}", op.table_name)),
                    error_code: Some("VALIDATION_ERROR".to_string()),
                })
                .collect();
            return Ok(PushResult { results, server_version: current });
        }

        let mut conn = self.store.conn()?;
        let tx = crate::db::immediate_transaction(&mut conn)?;
        let now = self.clock.now();

        let all_op_ids: Vec<&str> = ops.iter().map(|op| op.stamp.op_id.as_str()).collect();
        let existing = probe_existing_op_ids(&tx, workspace_id, &all_op_ids)?;

        let mut distinct_new: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for op_id in &all_op_ids {
            if !existing.contains_key(*op_id) && seen.insert(*op_id) {
                distinct_new.push(op_id);
            }
        }

        let base = self.read_counter_tx(&tx, workspace_id)?;
        let new_counter = base + distinct_new.len() as i64;

        if !distinct_new.is_empty() {
            tx.execute(
                "INSERT INTO server_version_counters (workspace_id, value) VALUES (?1, ?2) \
                 ON CONFLICT(workspace_id) DO UPDATE SET value = excluded.value",
                params![workspace_id, new_counter],
            )?;
        }

        let mut version_for: HashMap<&str, i64> = HashMap::with_capacity(distinct_new.len());
        for (i, op_id) in distinct_new.iter().enumerate() {
            version_for.insert(op_id, base + 1 + i as i64);
        }

        let mut applied: HashSet<&str> = HashSet::new();
        let mut results = Vec::with_capacity(ops.len());

        for op in &ops {
            let op_id = op.stamp.op_id.as_str();
            if let Some(&version) = existing.get(op_id) {
                results.push(PushOpResult {
                    op_id: op_id.to_string(),
                    success: true,
                    server_version: Some(version),
                    error: None,
                    error_code: None,
                });
                continue;
            }

            let version = *version_for.get(op_id).expect("new op must have an allocated version");

            if !applied.insert(op_id) {
                // Same op_id appeared earlier in this batch; mirror the
                // result without reapplying state.
                results.push(PushOpResult {
                    op_id: op_id.to_string(),
                    success: true,
                    server_version: Some(version),
                    error: None,
                    error_code: None,
                });
                continue;
            }

            let payload_text = op.payload.as_ref().map(|v| v.to_string());
            let data_json = payload_text.clone().unwrap_or_else(|| "{}".to_string());

            tx.execute(
                "INSERT INTO change_log \
                    (id, workspace_id, server_version, table_name, pk, op, payload_json, \
                     clock, hlc, device_id, op_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    Uuid::new_v4().to_string(),
                    workspace_id,
                    version,
                    op.table_name,
                    op.pk,
                    op.operation.as_str(),
                    payload_text,
                    op.stamp.clock,
                    op.stamp.hlc,
                    op.stamp.device_id,
                    op.stamp.op_id,
                    now,
                ],
            )?;

            let table = materialized_table_name(&op.table_name)
                .expect("table_name validated against the allowlist above");
            let won = lww::apply_to_materialized(
                &tx,
                table,
                workspace_id,
                &op.pk,
                op.operation,
                &data_json,
                op.stamp.clock,
                &op.stamp.hlc,
                &op.stamp.device_id,
                now,
            )?;

            if won {
                match op.operation {
                    SyncOp::Delete => {
                        lww::upsert_tombstone(&tx, workspace_id, &op.table_name, &op.pk, op.stamp.clock, version, now)?;
                    }
                    SyncOp::Put => {
                        lww::clear_tombstone(&tx, workspace_id, &op.table_name, &op.pk)?;
                    }
                }
            }

            results.push(PushOpResult {
                op_id: op_id.to_string(),
                success: true,
                server_version: Some(version),
                error: None,
                error_code: None,
            });
        }

        tx.commit()?;
        Ok(PushResult { results, server_version: new_counter })
    }

    /// Reads change-log rows for `workspace_id` with `server_version >
    /// cursor`, ordered ascending, optionally filtered to `tables`. Never
    /// mutates state.
    #[tracing::instrument(skip(self, tables))]
    pub fn pull(
        &self,
        workspace_id: &str,
        cursor: i64,
        limit: i64,
        tables: Option<&[String]>,
    ) -> GatewayResult<PullResult> {
        let effective_limit = limit.clamp(0, MAX_PULL_LIMIT);
        let conn = self.store.conn()?;

        let table_filter = tables.filter(|t| !t.is_empty());
        let mut sql = String::from(
            "SELECT server_version, table_name, pk, op, payload_json, clock, hlc, device_id, op_id \
             FROM change_log WHERE workspace_id = ?1 AND server_version > ?2",
        );
        if let Some(tables) = table_filter {
            let placeholders = (0..tables.len())
                .map(|i| format!("?{}", i + 3))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND table_name IN ({placeholders})"));
        }
        let fetch_limit = effective_limit + 1;
        sql.push_str(&format!(" ORDER BY server_version ASC LIMIT {fetch_limit}"));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows: Vec<Change> = if let Some(tables) = table_filter {
            let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&workspace_id, &cursor];
            for t in tables {
                bound.push(t);
            }
            stmt.query_map(bound.as_slice(), row_to_change)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![workspace_id, cursor], row_to_change)?
                .collect::<Result<Vec<_>, _>>()?
        };

        let has_more = rows.len() as i64 > effective_limit;
        rows.truncate(effective_limit as usize);
        let next_cursor = rows.last().map(|c| c.server_version).unwrap_or(cursor);

        Ok(PullResult { changes: rows, has_more, next_cursor })
    }

    /// Forward-only upsert: `last_seen_version` becomes
    /// `max(existing, incoming)`; `updated_at` advances on every call.
    #[tracing::instrument(skip(self))]
    pub fn update_cursor(&self, workspace_id: &str, device_id: &str, version: i64) -> GatewayResult<()> {
        let conn = self.store.conn()?;
        let now = self.clock.now();
        conn.execute(
            "INSERT INTO device_cursors (id, workspace_id, device_id, last_seen_version, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(workspace_id, device_id) DO UPDATE SET \
                last_seen_version = MAX(device_cursors.last_seen_version, excluded.last_seen_version), \
                updated_at = excluded.updated_at",
            params![Uuid::new_v4().to_string(), workspace_id, device_id, version, now],
        )?;
        Ok(())
    }

    /// Deletes change-log rows older than `min_cursor` (the slowest
    /// device's high-water mark) and past `retention_seconds`, in batches
    /// of [`GC_BATCH_SIZE`]. Returns the total number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub fn gc_change_log(&self, workspace_id: &str, retention_seconds: i64) -> GatewayResult<u64> {
        self.gc_table(workspace_id, retention_seconds, "change_log")
    }

    #[tracing::instrument(skip(self))]
    pub fn gc_tombstones(&self, workspace_id: &str, retention_seconds: i64) -> GatewayResult<u64> {
        self.gc_table(workspace_id, retention_seconds, "tombstones")
    }

    fn gc_table(&self, workspace_id: &str, retention_seconds: i64, table: &'static str) -> GatewayResult<u64> {
        let now = self.clock.now();
        let cutoff = now - retention_seconds;
        let min_cursor = self.min_cursor(workspace_id)?;

        let mut total: u64 = 0;
        loop {
            let mut conn = self.store.conn()?;
            let tx = crate::db::immediate_transaction(&mut conn)?;
            let sql = format!(
                "DELETE FROM {table} WHERE id IN (\
                    SELECT id FROM {table} \
                    WHERE workspace_id = ?1 AND server_version < ?2 AND created_at < ?3 \
                    LIMIT {batch})",
                table = table,
                batch = GC_BATCH_SIZE,
            );
            let deleted = tx.execute(&sql, params![workspace_id, min_cursor, cutoff])?;
            tx.commit()?;
            total += deleted as u64;
            if (deleted as i64) < GC_BATCH_SIZE {
                break;
            }
        }
        Ok(total)
    }

    fn min_cursor(&self, workspace_id: &str) -> GatewayResult<i64> {
        let conn = self.store.conn()?;
        let min_cursor: i64 = conn.query_row(
            "SELECT COALESCE(MIN(last_seen_version), 0) FROM device_cursors WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )?;
        Ok(min_cursor)
    }

    fn read_counter(&self, workspace_id: &str) -> GatewayResult<i64> {
        let conn = self.store.conn()?;
        read_counter_from(&conn, workspace_id)
    }

    fn read_counter_tx(&self, tx: &Transaction<'_>, workspace_id: &str) -> GatewayResult<i64> {
        read_counter_from(tx, workspace_id)
    }
}

/// Shared by `read_counter`/`read_counter_tx`: both a pooled connection and
/// a transaction deref to `rusqlite::Connection`.
fn read_counter_from(conn: &rusqlite::Connection, workspace_id: &str) -> GatewayResult<i64> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT value FROM server_version_counters WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0))
}

fn row_to_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<Change> {
    let op: String = row.get(3)?;
    let payload_json: Option<String> = row.get(4)?;
    Ok(Change {
        server_version: row.get(0)?,
        table_name: row.get(1)?,
        pk: row.get(2)?,
        op: SyncOp::parse(&op).unwrap_or(SyncOp::Put),
        payload: payload_json.and_then(|raw| serde_json::from_str(&raw).ok()),
        stamp: ChangeStamp {
            clock: row.get(5)?,
            hlc: row.get(6)?,
            device_id: row.get(7)?,
            op_id: row.get(8)?,
        },
    })
}

/// Looks up `op_id`s already present in the change log, in chunks bounded
/// by [`OP_ID_CHUNK_SIZE`] placeholders per statement.
fn probe_existing_op_ids(
    tx: &Transaction<'_>,
    workspace_id: &str,
    op_ids: &[&str],
) -> GatewayResult<HashMap<String, i64>> {
    let mut existing = HashMap::new();
    let unique: Vec<&str> = {
        let mut seen = HashSet::new();
        op_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
    };

    for chunk in unique.chunks(OP_ID_CHUNK_SIZE) {
        let placeholders = (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT op_id, server_version FROM change_log WHERE workspace_id = ?1 AND op_id IN ({placeholders})"
        );
        let mut stmt = tx.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&workspace_id];
        for op_id in chunk {
            bound.push(op_id);
        }
        let rows = stmt.query_map(bound.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (op_id, version) = row?;
            existing.insert(op_id, version);
        }
    }

    Ok(existing)
}
