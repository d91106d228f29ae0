use super::ReconStore;
use crate::{
    error::ReconResult,
    model::{FailureCode, FailureRecord},
    types::TxnKey,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const FAILURE_COLUMNS: &str = "id, entry_id, account, reason, error_code, manual_customer_id,
     resolved, created_at, updated_at, resolved_at";

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<FailureRecord> {
    Ok(FailureRecord {
        failure_id:         row.get(0)?,
        entry_id:           row.get(1)?,
        account:            row.get(2)?,
        reason:             row.get(3)?,
        code:               FailureCode::from_label(&row.get::<_, String>(4)?),
        manual_customer_id: row.get(5)?,
        resolved:           row.get(6)?,
        created_at:         row.get(7)?,
        updated_at:         row.get(8)?,
        resolved_at:        row.get(9)?,
    })
}

impl ReconStore {
    /// Create the open failure for `key`, or refresh its reason and code if
    /// one is already open. Relies on the partial unique index so two
    /// racing writers converge on one row.
    pub fn upsert_failure(
        &self,
        key: &TxnKey,
        reason: &str,
        code: &FailureCode,
        at: DateTime<Utc>,
    ) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO failure_record
             (entry_id, account, reason, error_code, resolved, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
             ON CONFLICT (entry_id, account) WHERE resolved = 0
             DO UPDATE SET reason = excluded.reason,
                           error_code = excluded.error_code,
                           updated_at = excluded.updated_at",
            params![key.entry_id, key.account, reason, code.as_str(), at],
        )?;
        Ok(())
    }

    pub fn open_failure(&self, key: &TxnKey) -> ReconResult<Option<FailureRecord>> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM failure_record
             WHERE entry_id = ?1 AND account = ?2 AND resolved = 0"
        );
        let f = self
            .conn
            .query_row(&sql, params![key.entry_id, key.account], failure_from_row)
            .optional()?;
        Ok(f)
    }

    pub fn open_failures(&self) -> ReconResult<Vec<FailureRecord>> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM failure_record WHERE resolved = 0 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], failure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn failures_for(&self, key: &TxnKey) -> ReconResult<Vec<FailureRecord>> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM failure_record
             WHERE entry_id = ?1 AND account = ?2 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![key.entry_id, key.account], failure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Close the open failure. Returns false if nothing was open, which is
    /// what a second concurrent resolver sees.
    pub fn resolve_failure_record(
        &self,
        key: &TxnKey,
        manual_customer_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE failure_record
             SET resolved = 1, manual_customer_id = ?1, resolved_at = ?2, updated_at = ?2
             WHERE entry_id = ?3 AND account = ?4 AND resolved = 0",
            params![manual_customer_id, at, key.entry_id, key.account],
        )?;
        Ok(changed == 1)
    }

    /// Most recent failure of this kind a human already closed.
    pub fn last_resolved_failure(
        &self,
        key: &TxnKey,
        code: &FailureCode,
    ) -> ReconResult<Option<FailureRecord>> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM failure_record
             WHERE entry_id = ?1 AND account = ?2 AND error_code = ?3 AND resolved = 1
             ORDER BY id DESC LIMIT 1"
        );
        let f = self
            .conn
            .query_row(&sql, params![key.entry_id, key.account, code.as_str()], failure_from_row)
            .optional()?;
        Ok(f)
    }
}
