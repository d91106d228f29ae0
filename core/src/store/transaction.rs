use super::ReconStore;
use crate::{
    error::ReconResult,
    lifecycle::TxnStatus,
    model::{AuditEntry, TransactionRecord},
    types::{TxnKey, UNALLOCATED},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

const TXN_COLUMNS: &str = "entry_id, account, amount, value_date, reference, remittance,
     original_reference, original_remittance, customer_id, original_customer_id,
     status, ledger_payment_id, posted_at, note, ingested_at";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        entry_id:             row.get(0)?,
        account:              row.get(1)?,
        amount:               row.get(2)?,
        value_date:           row.get(3)?,
        reference:            row.get(4)?,
        remittance:           row.get(5)?,
        original_reference:   row.get(6)?,
        original_remittance:  row.get(7)?,
        customer_id:          row.get(8)?,
        original_customer_id: row.get(9)?,
        status:               TxnStatus::from_label(&row.get::<_, String>(10)?),
        ledger_payment_id:    row.get(11)?,
        posted_at:            row.get(12)?,
        note:                 row.get(13)?,
        ingested_at:          row.get(14)?,
    })
}

impl ReconStore {
    // ── Transactions ───────────────────────────────────────────

    /// Insert a freshly ingested record. Returns false when the
    /// (entry id, account) pair already exists; that is not an error.
    pub fn insert_transaction(&self, t: &TransactionRecord) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO bank_transaction
             (entry_id, account, amount, value_date, reference, remittance,
              original_reference, original_remittance, customer_id, original_customer_id,
              status, ledger_payment_id, posted_at, note, ingested_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?15)",
            params![
                t.entry_id,
                t.account,
                t.amount,
                t.value_date,
                t.reference,
                t.remittance,
                t.original_reference,
                t.original_remittance,
                t.customer_id,
                t.original_customer_id,
                t.status.as_str(),
                t.ledger_payment_id,
                t.posted_at,
                t.note,
                t.ingested_at,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn transaction_exists(&self, key: &TxnKey) -> ReconResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bank_transaction WHERE entry_id = ?1 AND account = ?2",
            params![key.entry_id, key.account],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Weaker duplicate guard: same account, amount and value date under
    /// any entry id.
    pub fn transaction_triple_exists(
        &self,
        account: &str,
        amount: f64,
        value_date: NaiveDate,
    ) -> ReconResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bank_transaction
             WHERE account = ?1 AND ABS(amount - ?2) < 0.005 AND value_date = ?3",
            params![account, amount, value_date],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn get_transaction(&self, key: &TxnKey) -> ReconResult<Option<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM bank_transaction WHERE entry_id = ?1 AND account = ?2"
        );
        let t = self
            .conn
            .query_row(&sql, params![key.entry_id, key.account], txn_from_row)
            .optional()?;
        Ok(t)
    }

    /// Every record carrying `entry_id`, in ingest order.
    pub fn transactions_by_entry_id(&self, entry_id: &str) -> ReconResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM bank_transaction WHERE entry_id = ?1 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![entry_id], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn transactions_with_status(&self, status: TxnStatus) -> ReconResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM bank_transaction WHERE status = ?1 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str()], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records not yet posted by any route.
    pub fn open_transactions(&self) -> ReconResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM bank_transaction
             WHERE status NOT IN ('posted', 'posted_manual') ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn posted_transactions(&self) -> ReconResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM bank_transaction
             WHERE status IN ('posted', 'posted_manual') ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records whose identifier was corrected away from what was first
    /// extracted, excluding ones still unallocated.
    pub fn corrected_transactions(&self) -> ReconResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM bank_transaction
             WHERE customer_id != original_customer_id AND customer_id != ?1
             ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![UNALLOCATED], txn_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn transaction_count(&self) -> ReconResult<i64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM bank_transaction", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Compare-and-set on status. Returns false when the record is no longer
    /// in `from` (another caller got there first).
    pub fn update_transaction_status(
        &self,
        key: &TxnKey,
        from: TxnStatus,
        to: TxnStatus,
        at: DateTime<Utc>,
    ) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE bank_transaction SET status = ?1, updated_at = ?2
             WHERE entry_id = ?3 AND account = ?4 AND status = ?5",
            params![to.as_str(), at, key.entry_id, key.account, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    /// Set the resolved customer. When `first_extraction` is true the value
    /// is also recorded as the originally extracted identifier.
    pub fn update_transaction_customer(
        &self,
        key: &TxnKey,
        customer_id: &str,
        first_extraction: bool,
        at: DateTime<Utc>,
    ) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE bank_transaction
             SET customer_id = ?1,
                 original_customer_id = CASE WHEN ?2 = 1 THEN ?1 ELSE original_customer_id END,
                 updated_at = ?3
             WHERE entry_id = ?4 AND account = ?5",
            params![customer_id, first_extraction, at, key.entry_id, key.account],
        )?;
        Ok(())
    }

    /// Stamp a successful posting. Guarded on `from` like status updates.
    pub fn mark_transaction_posted(
        &self,
        key: &TxnKey,
        from: TxnStatus,
        to: TxnStatus,
        ledger_payment_id: &str,
        posted_at: DateTime<Utc>,
    ) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE bank_transaction
             SET status = ?1, ledger_payment_id = ?2, posted_at = ?3, updated_at = ?3
             WHERE entry_id = ?4 AND account = ?5 AND status = ?6",
            params![
                to.as_str(),
                ledger_payment_id,
                posted_at,
                key.entry_id,
                key.account,
                from.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn set_transaction_note(&self, key: &TxnKey, note: &str, at: DateTime<Utc>) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE bank_transaction SET note = ?1, updated_at = ?2
             WHERE entry_id = ?3 AND account = ?4",
            params![note, at, key.entry_id, key.account],
        )?;
        Ok(())
    }

    // ── Audit ──────────────────────────────────────────────────

    pub fn insert_audit(&self, a: &AuditEntry) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO audit_entry
             (entry_id, account, action, field_name, old_value, new_value, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                a.entry_id,
                a.account,
                a.action,
                a.field_name,
                a.old_value,
                a.new_value,
                a.actor,
                a.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn audit_for(&self, key: &TxnKey) -> ReconResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entry_id, account, action, field_name, old_value, new_value,
                    actor, created_at
             FROM audit_entry WHERE entry_id = ?1 AND account = ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![key.entry_id, key.account], |row| {
                Ok(AuditEntry {
                    audit_id:   Some(row.get(0)?),
                    entry_id:   row.get(1)?,
                    account:    row.get(2)?,
                    action:     row.get(3)?,
                    field_name: row.get(4)?,
                    old_value:  row.get(5)?,
                    new_value:  row.get(6)?,
                    actor:      row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn audit_count(&self) -> ReconResult<i64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_entry", [], |row| row.get(0))?;
        Ok(n)
    }
}
