//! Ledger snapshot — the cached copy of ledger data a run works from.
//!
//! RULE: Refresh happens at the start of a phase, never mid-computation.
//! Customers are overwritten wholesale; payments are append-only.
//! RULE: A failed customer or payment fetch aborts the refresh (and the
//! phases that need it). A failed per-customer billing fetch is counted
//! and skipped.

use crate::{
    error::ReconResult,
    ledger::LedgerGateway,
    store::ReconStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotReport {
    pub customers:    u32,
    pub new_payments: u32,
    /// Records skipped because they could not be mapped.
    pub errors:       u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BillingReport {
    pub customers: u32,
    pub services:  u32,
    pub invoices:  u32,
    pub errors:    u32,
}

pub struct LedgerSnapshot<'a> {
    store:    &'a ReconStore,
    currency: &'a str,
}

impl<'a> LedgerSnapshot<'a> {
    pub fn new(store: &'a ReconStore, default_currency: &'a str) -> Self {
        Self { store, currency: default_currency }
    }

    /// Customers (with identifier mappings) and payments since `since`.
    pub fn refresh(
        &self,
        ledger: &dyn LedgerGateway,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ReconResult<SnapshotReport> {
        let clients = ledger.fetch_customers()?;
        let payments = ledger.fetch_payments(since)?;

        let mut report = SnapshotReport::default();
        self.store.atomically(|s| {
            for client in &clients {
                s.upsert_customer(&client.to_account(now))?;
                report.customers += 1;
            }
            for raw in &payments {
                match raw.to_payment(self.currency) {
                    Some(p) => {
                        if s.insert_ledger_payment(&p)? {
                            report.new_payments += 1;
                        }
                    }
                    None => {
                        log::warn!("snapshot: payment {} has no creation date, skipped", raw.id);
                        report.errors += 1;
                    }
                }
            }
            Ok(())
        })?;

        log::info!(
            "snapshot: {} customers, {} new payments, {} skipped",
            report.customers, report.new_payments, report.errors
        );
        Ok(report)
    }

    /// Services and invoices for each customer, for risk analysis.
    pub fn refresh_billing(
        &self,
        ledger: &dyn LedgerGateway,
        customer_ids: &[String],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ReconResult<BillingReport> {
        let mut report = BillingReport::default();
        for customer_id in customer_ids {
            let services = match ledger.fetch_services(customer_id) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("snapshot: services for {customer_id} unavailable: {e}");
                    report.errors += 1;
                    continue;
                }
            };
            let invoices = match ledger.fetch_invoices(customer_id, since) {
                Ok(i) => i,
                Err(e) => {
                    log::warn!("snapshot: invoices for {customer_id} unavailable: {e}");
                    report.errors += 1;
                    continue;
                }
            };

            self.store.atomically(|s| {
                for svc in &services {
                    s.upsert_service(&svc.to_account(now))?;
                    report.services += 1;
                }
                for inv in &invoices {
                    match inv.to_record() {
                        Some(rec) => {
                            s.upsert_invoice(&rec)?;
                            report.invoices += 1;
                        }
                        None => report.errors += 1,
                    }
                }
                Ok(())
            })?;
            report.customers += 1;
        }
        log::info!(
            "snapshot: billing for {} customers ({} services, {} invoices, {} errors)",
            report.customers, report.services, report.invoices, report.errors
        );
        Ok(report)
    }
}
