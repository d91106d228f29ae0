//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Pipeline stages call store methods — they never execute SQL directly.
//! RULE: Multi-statement mutations of one transaction go through
//! `ReconStore::atomically` so a crash leaves every record consistent.

use crate::{
    error::ReconResult,
    event::EventLogEntry,
    model::RunSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

mod failure;
mod ledger;
mod risk;
mod transaction;

pub struct ReconStore {
    conn: Connection,
}

/// One row of `recon_run`.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id:       String,
    pub started_at:   DateTime<Utc>,
    pub finished_at:  Option<DateTime<Utc>>,
    pub status:       String,
    pub message:      Option<String>,
    pub processed:    i64,
    pub failed:       i64,
    pub total_amount: f64,
}

impl ReconStore {
    pub fn open(path: &str) -> ReconResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order. Safe to call on every start.
    pub fn migrate(&self) -> ReconResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_transactions.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_ledger_cache.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_suspension.sql"))?;
        Ok(())
    }

    /// Run `f` inside a savepoint. Any error rolls back every statement
    /// `f` issued. Savepoints nest, so callers may compose.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> ReconResult<T>) -> ReconResult<T> {
        self.conn.execute_batch("SAVEPOINT recon_record;")?;
        match f(self) {
            Ok(out) => {
                self.conn.execute_batch("RELEASE recon_record;")?;
                Ok(out)
            }
            Err(e) => {
                if let Err(rb) = self
                    .conn
                    .execute_batch("ROLLBACK TO recon_record; RELEASE recon_record;")
                {
                    log::error!("store: rollback failed after {e}: {rb}");
                }
                Err(e)
            }
        }
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, started_at: DateTime<Utc>) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO recon_run (run_id, started_at, status) VALUES (?1, ?2, 'running')",
            params![run_id, started_at],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        status: &str,
        message: Option<&str>,
        summary: &RunSummary,
    ) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE recon_run
             SET finished_at = ?1, status = ?2, message = ?3,
                 processed = ?4, failed = ?5, total_amount = ?6, summary_json = ?7
             WHERE run_id = ?8",
            params![
                finished_at,
                status,
                message,
                summary.processed() as i64,
                summary.failed() as i64,
                summary.posted_amount,
                serde_json::to_string(summary)?,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> ReconResult<Option<RunRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, started_at, finished_at, status, message,
                        processed, failed, total_amount
                 FROM recon_run WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        run_id:       row.get(0)?,
                        started_at:   row.get(1)?,
                        finished_at:  row.get(2)?,
                        status:       row.get(3)?,
                        message:      row.get(4)?,
                        processed:    row.get(5)?,
                        failed:       row.get(6)?,
                        total_amount: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, stage, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.stage,
                entry.event_type,
                entry.payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> ReconResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload, created_at
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    stage:      row.get(2)?,
                    event_type: row.get(3)?,
                    payload:    row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
