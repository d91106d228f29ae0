use super::ReconStore;
use crate::{
    error::ReconResult,
    model::{PaymentPatternSummary, SuspensionRecord},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const SUSPENSION_COLUMNS: &str = "id, customer_id, service_id, reason, note, is_active,
     suspended_at, suspended_by, reactivated_at, reactivated_by";

fn suspension_from_row(row: &Row<'_>) -> rusqlite::Result<SuspensionRecord> {
    Ok(SuspensionRecord {
        suspension_id:  row.get(0)?,
        customer_id:    row.get(1)?,
        service_id:     row.get(2)?,
        reason:         row.get(3)?,
        note:           row.get(4)?,
        is_active:      row.get(5)?,
        suspended_at:   row.get(6)?,
        suspended_by:   row.get(7)?,
        reactivated_at: row.get(8)?,
        reactivated_by: row.get(9)?,
    })
}

impl ReconStore {
    // ── Payment patterns ───────────────────────────────────────

    /// Replace the customer's summary wholesale.
    pub fn upsert_payment_pattern(&self, p: &PaymentPatternSummary) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO payment_pattern
             (customer_id, missed_count, late_count, on_time_count, avg_days_late,
              avg_payment_amount, last_payment_at, is_risky, period_start, period_end,
              calculated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT (customer_id) DO UPDATE SET
                missed_count = excluded.missed_count,
                late_count = excluded.late_count,
                on_time_count = excluded.on_time_count,
                avg_days_late = excluded.avg_days_late,
                avg_payment_amount = excluded.avg_payment_amount,
                last_payment_at = excluded.last_payment_at,
                is_risky = excluded.is_risky,
                period_start = excluded.period_start,
                period_end = excluded.period_end,
                calculated_at = excluded.calculated_at",
            params![
                p.customer_id,
                p.missed_count,
                p.late_count,
                p.on_time_count,
                p.avg_days_late,
                p.avg_payment_amount,
                p.last_payment_at,
                p.is_risky,
                p.period_start,
                p.period_end,
                p.calculated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_payment_pattern(&self, customer_id: &str) -> ReconResult<Option<PaymentPatternSummary>> {
        let p = self
            .conn
            .query_row(
                "SELECT customer_id, missed_count, late_count, on_time_count, avg_days_late,
                        avg_payment_amount, last_payment_at, is_risky, period_start,
                        period_end, calculated_at
                 FROM payment_pattern WHERE customer_id = ?1",
                params![customer_id],
                |row| {
                    Ok(PaymentPatternSummary {
                        customer_id:        row.get(0)?,
                        missed_count:       row.get(1)?,
                        late_count:         row.get(2)?,
                        on_time_count:      row.get(3)?,
                        avg_days_late:      row.get(4)?,
                        avg_payment_amount: row.get(5)?,
                        last_payment_at:    row.get(6)?,
                        is_risky:           row.get(7)?,
                        period_start:       row.get(8)?,
                        period_end:         row.get(9)?,
                        calculated_at:      row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(p)
    }

    pub fn risky_pattern_count(&self) -> ReconResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM payment_pattern WHERE is_risky = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ── Suspensions ────────────────────────────────────────────

    /// Open a suspension. Returns `None` when the pair already has an active
    /// one; the partial unique index makes this the serialisation point.
    pub fn insert_suspension(
        &self,
        customer_id: &str,
        service_id: &str,
        reason: &str,
        note: Option<&str>,
        suspended_by: &str,
        at: DateTime<Utc>,
    ) -> ReconResult<Option<i64>> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO suspension
             (customer_id, service_id, reason, note, is_active, suspended_at, suspended_by)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            params![customer_id, service_id, reason, note, at, suspended_by],
        )?;
        if changed == 1 {
            Ok(Some(self.conn.last_insert_rowid()))
        } else {
            Ok(None)
        }
    }

    pub fn get_suspension(&self, suspension_id: i64) -> ReconResult<Option<SuspensionRecord>> {
        let sql = format!("SELECT {SUSPENSION_COLUMNS} FROM suspension WHERE id = ?1");
        let s = self
            .conn
            .query_row(&sql, params![suspension_id], suspension_from_row)
            .optional()?;
        Ok(s)
    }

    pub fn active_suspension_for(
        &self,
        customer_id: &str,
        service_id: &str,
    ) -> ReconResult<Option<SuspensionRecord>> {
        let sql = format!(
            "SELECT {SUSPENSION_COLUMNS} FROM suspension
             WHERE customer_id = ?1 AND service_id = ?2 AND is_active = 1"
        );
        let s = self
            .conn
            .query_row(&sql, params![customer_id, service_id], suspension_from_row)
            .optional()?;
        Ok(s)
    }

    pub fn suspensions_for(&self, customer_id: &str) -> ReconResult<Vec<SuspensionRecord>> {
        let sql = format!(
            "SELECT {SUSPENSION_COLUMNS} FROM suspension WHERE customer_id = ?1 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![customer_id], suspension_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Close an active suspension. Returns false if it was not active.
    pub fn deactivate_suspension(
        &self,
        suspension_id: i64,
        reactivated_by: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE suspension
             SET is_active = 0, reactivated_at = ?1, reactivated_by = ?2,
                 note = CASE
                     WHEN ?3 IS NULL THEN note
                     WHEN note IS NULL OR note = '' THEN '[Reactivated] ' || ?3
                     ELSE note || char(10) || '[Reactivated] ' || ?3
                 END
             WHERE id = ?4 AND is_active = 1",
            params![at, reactivated_by, note, suspension_id],
        )?;
        Ok(changed == 1)
    }

    pub fn suspension_count(&self, active: bool) -> ReconResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM suspension WHERE is_active = ?1",
            params![active],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn suspensions_since(&self, since: DateTime<Utc>) -> ReconResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM suspension WHERE suspended_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
