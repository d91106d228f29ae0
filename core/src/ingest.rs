//! Ingest normaliser — raw bank entries in, `pending` transactions out.
//!
//! RULE: Sign and exclusion filtering happen here once. Nothing downstream
//! re-applies them.
//! RULE: Malformed entries are logged and dropped, never persisted.

use crate::{
    bank::RawBankEntry,
    config::IngestConfig,
    error::ReconResult,
    event::{DiscardReason, ReconEvent},
    lifecycle::TxnStatus,
    model::TransactionRecord,
    store::ReconStore,
    types::{TxnKey, UNALLOCATED},
};
use chrono::{DateTime, NaiveDate, Utc};

/// Outcome of normalising one raw entry.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Inserted(TransactionRecord),
    Discarded(DiscardReason),
}

pub struct IngestNormalizer<'a> {
    /// Upper-cased once so every entry is matched the same way.
    terms: Vec<String>,
    store: &'a ReconStore,
}

impl<'a> IngestNormalizer<'a> {
    pub fn new(config: &IngestConfig, store: &'a ReconStore) -> Self {
        let terms = config
            .exclusion_terms
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms, store }
    }

    /// True when any exclusion term occurs in either free-text field.
    pub fn is_excluded(&self, reference: &str, remittance: &str) -> bool {
        let reference = reference.to_uppercase();
        let remittance = remittance.to_uppercase();
        self.terms
            .iter()
            .any(|t| reference.contains(t.as_str()) || remittance.contains(t.as_str()))
    }

    /// Normalise and persist one entry fetched for `account`.
    pub fn ingest_entry(
        &self,
        account: &str,
        raw: &RawBankEntry,
        now: DateTime<Utc>,
    ) -> ReconResult<IngestOutcome> {
        let entry_id = match raw.entry_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                log::warn!("ingest: entry on {account} has no id, skipped");
                return Ok(IngestOutcome::Discarded(DiscardReason::Malformed));
            }
        };
        let Some(amount) = raw.parsed_amount() else {
            log::warn!("ingest: entry {entry_id}@{account} has unparseable amount {:?}, skipped", raw.amount);
            return Ok(IngestOutcome::Discarded(DiscardReason::Malformed));
        };
        let value_date = match raw.value_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => match parse_value_date(s) {
                Some(d) => Some(d),
                None => {
                    log::warn!("ingest: entry {entry_id}@{account} has unparseable value date {s:?}, skipped");
                    return Ok(IngestOutcome::Discarded(DiscardReason::Malformed));
                }
            },
        };

        if amount < 0.0 {
            log::debug!("ingest: {entry_id}@{account} is outgoing ({amount:.2}), discarded");
            return Ok(IngestOutcome::Discarded(DiscardReason::Outgoing));
        }

        let reference = raw.reference.clone().unwrap_or_default();
        let remittance = raw.remittance.clone().unwrap_or_default();
        if self.is_excluded(&reference, &remittance) {
            log::debug!("ingest: {entry_id}@{account} matches an exclusion term, discarded");
            return Ok(IngestOutcome::Discarded(DiscardReason::Excluded));
        }

        let key = TxnKey::new(entry_id.clone(), account);
        if self.store.transaction_exists(&key)? {
            return Ok(IngestOutcome::Discarded(DiscardReason::DuplicateEntry));
        }
        if let Some(date) = value_date {
            if self.store.transaction_triple_exists(account, amount, date)? {
                log::info!(
                    "ingest: {key} repeats an existing ({account}, {amount:.2}, {date}) entry, discarded"
                );
                return Ok(IngestOutcome::Discarded(DiscardReason::DuplicateTriple));
            }
        }

        let record = TransactionRecord {
            entry_id,
            account:              account.to_string(),
            amount,
            value_date,
            original_reference:   reference.clone(),
            original_remittance:  remittance.clone(),
            reference,
            remittance,
            customer_id:          UNALLOCATED.to_string(),
            original_customer_id: UNALLOCATED.to_string(),
            status:               TxnStatus::Pending,
            ledger_payment_id:    None,
            posted_at:            None,
            note:                 None,
            ingested_at:          now,
        };

        // Losing an insert race to a concurrent ingest is the same as a duplicate.
        if !self.store.insert_transaction(&record)? {
            return Ok(IngestOutcome::Discarded(DiscardReason::DuplicateEntry));
        }
        Ok(IngestOutcome::Inserted(record))
    }

    /// Normalise a whole fetch for one account. One bad entry never stops
    /// the rest.
    pub fn ingest_batch(
        &self,
        account: &str,
        entries: &[RawBankEntry],
        now: DateTime<Utc>,
    ) -> Vec<ReconEvent> {
        let mut events = Vec::with_capacity(entries.len());
        for raw in entries {
            match self.ingest_entry(account, raw, now) {
                Ok(IngestOutcome::Inserted(t)) => events.push(ReconEvent::EntryIngested {
                    entry_id: t.entry_id,
                    account:  t.account,
                    amount:   t.amount,
                }),
                Ok(IngestOutcome::Discarded(reason)) => events.push(ReconEvent::EntryDiscarded {
                    entry_id: raw.entry_id.clone(),
                    account:  account.to_string(),
                    reason,
                }),
                Err(e) => {
                    log::error!("ingest: entry {:?} on {account} failed: {e}", raw.entry_id);
                }
            }
        }
        events
    }
}

/// Banks send plain dates; some feeds send a full timestamp.
fn parse_value_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| crate::ledger::parse_ledger_datetime(s).map(|dt| dt.date_naive()))
}
