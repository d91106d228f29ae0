use super::ReconStore;
use crate::{
    error::ReconResult,
    model::{CustomerAccount, InvoiceRecord, InvoiceStatus, LedgerPayment, ServiceAccount, ServiceStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const CUSTOMER_COLUMNS: &str = "customer_id, display_name, is_vip, grace_day, is_archived,
     is_active, is_lead, has_overdue_invoice, balance, outstanding, credit, refreshed_at";

const SERVICE_COLUMNS: &str = "service_id, customer_id, name, status, price,
     suspension_count, latest_suspension_at, refreshed_at";

const INVOICE_COLUMNS: &str = "invoice_id, customer_id, number, total, remaining,
     created_at, due_at, status";

const PAYMENT_COLUMNS: &str = "payment_id, customer_id, amount, created_at, method, note,
     provider_payment_id, currency";

/// Mapping lookups are case-insensitive on the trimmed text.
pub(crate) fn mapping_key(text: &str) -> String {
    text.trim().to_lowercase()
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<CustomerAccount> {
    Ok(CustomerAccount {
        customer_id:         row.get(0)?,
        display_name:        row.get(1)?,
        is_vip:              row.get(2)?,
        grace_day:           row.get(3)?,
        is_archived:         row.get(4)?,
        is_active:           row.get(5)?,
        is_lead:             row.get(6)?,
        has_overdue_invoice: row.get(7)?,
        balance:             row.get(8)?,
        outstanding:         row.get(9)?,
        credit:              row.get(10)?,
        payment_references:  Vec::new(), // filled from identifier_mapping
        refreshed_at:        row.get(11)?,
    })
}

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceAccount> {
    Ok(ServiceAccount {
        service_id:           row.get(0)?,
        customer_id:          row.get(1)?,
        name:                 row.get(2)?,
        status:               ServiceStatus::from_label(&row.get::<_, String>(3)?),
        price:                row.get(4)?,
        suspension_count:     row.get(5)?,
        latest_suspension_at: row.get(6)?,
        refreshed_at:         row.get(7)?,
    })
}

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<InvoiceRecord> {
    Ok(InvoiceRecord {
        invoice_id:  row.get(0)?,
        customer_id: row.get(1)?,
        number:      row.get(2)?,
        total:       row.get(3)?,
        remaining:   row.get(4)?,
        created_at:  row.get(5)?,
        due_at:      row.get(6)?,
        status:      InvoiceStatus::from_code(&row.get::<_, String>(7)?),
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerPayment> {
    Ok(LedgerPayment {
        payment_id:          row.get(0)?,
        customer_id:         row.get(1)?,
        amount:              row.get(2)?,
        created_at:          row.get(3)?,
        method:              row.get(4)?,
        note:                row.get(5)?,
        provider_payment_id: row.get(6)?,
        currency:            row.get(7)?,
    })
}

impl ReconStore {
    // ── Customers ──────────────────────────────────────────────

    /// Overwrite every field except the id, and replace the customer's
    /// identifier mappings.
    pub fn upsert_customer(&self, c: &CustomerAccount) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO customer_account
             (customer_id, display_name, is_vip, grace_day, is_archived, is_active, is_lead,
              has_overdue_invoice, balance, outstanding, credit, refreshed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT (customer_id) DO UPDATE SET
                display_name = excluded.display_name,
                is_vip = excluded.is_vip,
                grace_day = excluded.grace_day,
                is_archived = excluded.is_archived,
                is_active = excluded.is_active,
                is_lead = excluded.is_lead,
                has_overdue_invoice = excluded.has_overdue_invoice,
                balance = excluded.balance,
                outstanding = excluded.outstanding,
                credit = excluded.credit,
                refreshed_at = excluded.refreshed_at",
            params![
                c.customer_id,
                c.display_name,
                c.is_vip,
                c.grace_day,
                c.is_archived,
                c.is_active,
                c.is_lead,
                c.has_overdue_invoice,
                c.balance,
                c.outstanding,
                c.credit,
                c.refreshed_at,
            ],
        )?;
        self.conn.execute(
            "DELETE FROM identifier_mapping WHERE customer_id = ?1",
            params![c.customer_id],
        )?;
        for text in &c.payment_references {
            if text.trim().is_empty() {
                continue;
            }
            self.conn.execute(
                "INSERT OR IGNORE INTO identifier_mapping (mapping_key, mapping_text, customer_id)
                 VALUES (?1, ?2, ?3)",
                params![mapping_key(text), text, c.customer_id],
            )?;
        }
        Ok(())
    }

    pub fn get_customer(&self, customer_id: &str) -> ReconResult<Option<CustomerAccount>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customer_account WHERE customer_id = ?1");
        let customer = self
            .conn
            .query_row(&sql, params![customer_id], customer_from_row)
            .optional()?;
        match customer {
            Some(mut c) => {
                c.payment_references = self.references_for(&c.customer_id)?;
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    pub fn customers(&self, active_only: bool) -> ReconResult<Vec<CustomerAccount>> {
        let sql = if active_only {
            format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customer_account
                 WHERE is_active = 1 AND is_archived = 0 ORDER BY customer_id ASC"
            )
        } else {
            format!("SELECT {CUSTOMER_COLUMNS} FROM customer_account ORDER BY customer_id ASC")
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map([], customer_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for c in rows.iter_mut() {
            c.payment_references = self.references_for(&c.customer_id)?;
        }
        Ok(rows)
    }

    fn references_for(&self, customer_id: &str) -> ReconResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT mapping_text FROM identifier_mapping WHERE customer_id = ?1
             ORDER BY mapping_key ASC",
        )?;
        let rows = stmt
            .query_map(params![customer_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// (normalised text, customer id) pairs for the identity resolver.
    pub fn identifier_mappings(&self) -> ReconResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT mapping_key, customer_id FROM identifier_mapping
             ORDER BY mapping_key ASC, customer_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn vip_customer_count(&self) -> ReconResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM customer_account WHERE is_vip = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn overdue_customer_count(&self) -> ReconResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM customer_account WHERE has_overdue_invoice = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ── Services ───────────────────────────────────────────────

    pub fn upsert_service(&self, s: &ServiceAccount) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO service_account
             (service_id, customer_id, name, status, price, suspension_count,
              latest_suspension_at, refreshed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT (service_id) DO UPDATE SET
                customer_id = excluded.customer_id,
                name = excluded.name,
                status = excluded.status,
                price = excluded.price,
                suspension_count = excluded.suspension_count,
                latest_suspension_at = excluded.latest_suspension_at,
                refreshed_at = excluded.refreshed_at",
            params![
                s.service_id,
                s.customer_id,
                s.name,
                s.status.as_str(),
                s.price,
                s.suspension_count,
                s.latest_suspension_at,
                s.refreshed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_service(&self, service_id: &str) -> ReconResult<Option<ServiceAccount>> {
        let sql = format!("SELECT {SERVICE_COLUMNS} FROM service_account WHERE service_id = ?1");
        let s = self
            .conn
            .query_row(&sql, params![service_id], service_from_row)
            .optional()?;
        Ok(s)
    }

    pub fn services_for(&self, customer_id: &str) -> ReconResult<Vec<ServiceAccount>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM service_account
             WHERE customer_id = ?1 ORDER BY service_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![customer_id], service_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_service_status(
        &self,
        service_id: &str,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE service_account SET status = ?1, refreshed_at = ?2 WHERE service_id = ?3",
            params![status.as_str(), at, service_id],
        )?;
        Ok(())
    }

    pub fn service_count_with_status(&self, status: ServiceStatus) -> ReconResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM service_account WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ── Invoices ───────────────────────────────────────────────

    pub fn upsert_invoice(&self, inv: &InvoiceRecord) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO invoice
             (invoice_id, customer_id, number, total, remaining, created_at, due_at, status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT (invoice_id) DO UPDATE SET
                customer_id = excluded.customer_id,
                number = excluded.number,
                total = excluded.total,
                remaining = excluded.remaining,
                created_at = excluded.created_at,
                due_at = excluded.due_at,
                status = excluded.status",
            params![
                inv.invoice_id,
                inv.customer_id,
                inv.number,
                inv.total,
                inv.remaining,
                inv.created_at,
                inv.due_at,
                inv.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn invoices_for(&self, customer_id: &str) -> ReconResult<Vec<InvoiceRecord>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice WHERE customer_id = ?1
             ORDER BY created_at ASC, invoice_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![customer_id], invoice_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Ledger payments ────────────────────────────────────────

    /// Append to the cache. Returns false if the payment id is already known.
    pub fn insert_ledger_payment(&self, p: &LedgerPayment) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO ledger_payment
             (payment_id, customer_id, amount, created_at, method, note,
              provider_payment_id, currency)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                p.payment_id,
                p.customer_id,
                p.amount,
                p.created_at,
                p.method,
                p.note,
                p.provider_payment_id,
                p.currency,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn ledger_payments(&self) -> ReconResult<Vec<LedgerPayment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM ledger_payment ORDER BY payment_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn ledger_payments_for(&self, customer_id: &str) -> ReconResult<Vec<LedgerPayment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM ledger_payment WHERE customer_id = ?1
             ORDER BY payment_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![customer_id], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn ledger_payments_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> ReconResult<Vec<LedgerPayment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM ledger_payment WHERE provider_payment_id = ?1
             ORDER BY payment_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![provider_payment_id], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
