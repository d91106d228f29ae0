//! Read-only reports over the reconciliation store.
//!
//! None of these write. They can run at any time, including mid-run from a
//! second connection.

use crate::{
    duplicates::{DuplicateCluster, DuplicateDetector, DuplicateSummary},
    error::ReconResult,
    model::TransactionRecord,
    store::ReconStore,
    types::{CustomerId, TxnKey, AMOUNT_EPSILON},
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Customers whose bank references pointed somewhere else and had to be
/// corrected, most frequent offenders first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncorrectReference {
    pub customer_id:  CustomerId,
    pub transactions: Vec<TransactionRecord>,
}

impl IncorrectReference {
    pub fn count(&self) -> usize {
        self.transactions.len()
    }
}

pub fn incorrect_references(store: &ReconStore) -> ReconResult<Vec<IncorrectReference>> {
    let mut by_customer: HashMap<CustomerId, Vec<TransactionRecord>> = HashMap::new();
    for t in store.corrected_transactions()? {
        by_customer.entry(t.customer_id.clone()).or_default().push(t);
    }
    let mut out: Vec<IncorrectReference> = by_customer
        .into_iter()
        .map(|(customer_id, transactions)| IncorrectReference { customer_id, transactions })
        .collect();
    out.sort_by(|a, b| {
        b.count()
            .cmp(&a.count())
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });
    Ok(out)
}

/// A posted record whose ledger payment carries a different amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmountMismatch {
    pub key:               TxnKey,
    pub customer_id:       CustomerId,
    pub ledger_payment_id: String,
    pub bank_amount:       f64,
    pub ledger_amount:     f64,
}

impl AmountMismatch {
    pub fn difference(&self) -> f64 {
        self.ledger_amount - self.bank_amount
    }
}

/// Entry ids repeat across accounts, so a record is only compared with the
/// payment it was stamped with, never with another account's namesake.
pub fn amount_mismatches(store: &ReconStore) -> ReconResult<Vec<AmountMismatch>> {
    let mut out = Vec::new();
    for t in store.posted_transactions()? {
        let Some(stamped) = t.ledger_payment_id.as_deref() else {
            continue;
        };
        let payment = store
            .ledger_payments_by_provider_id(&t.entry_id)?
            .into_iter()
            .find(|p| p.payment_id == stamped);
        if let Some(p) = payment {
            if (p.amount - t.amount).abs() > AMOUNT_EPSILON {
                out.push(AmountMismatch {
                    key:               t.key(),
                    customer_id:       t.customer_id.clone(),
                    ledger_payment_id: p.payment_id,
                    bank_amount:       t.amount,
                    ledger_amount:     p.amount,
                });
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateReport {
    pub window_days: i64,
    pub clusters:    BTreeMap<CustomerId, Vec<DuplicateCluster>>,
    /// Counts at 1x, 3x and 6x the window.
    pub summaries:   Vec<DuplicateSummary>,
}

impl DuplicateReport {
    pub fn total_clusters(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    pub fn total_amount(&self) -> f64 {
        self.clusters
            .values()
            .flatten()
            .map(|c| c.amount * c.match_count() as f64)
            .sum()
    }
}

/// Historical duplicate clusters over every cached ledger payment.
pub fn duplicate_report(store: &ReconStore, window_days: i64) -> ReconResult<DuplicateReport> {
    let payments = store.ledger_payments()?;
    let detector = DuplicateDetector::new(window_days);
    let clusters = detector.detect(&payments);
    log::info!(
        "reports: {} duplicate clusters across {} customers ({window_days}d window)",
        clusters.values().map(Vec::len).sum::<usize>(),
        clusters.len()
    );
    Ok(DuplicateReport {
        window_days,
        summaries: detector.summarize(&payments),
        clusters,
    })
}
