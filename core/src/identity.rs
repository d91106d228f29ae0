//! Identity resolver — customer identifier from free-text payment detail.
//!
//! Strategies, first match wins:
//!   1. marker token + digits in the reference      ("PAYMENT CID 4821")
//!   2. marker token + digits in the remittance
//!   3. whole reference, then whole remittance, against the ledger's
//!      identifier mappings (case-insensitive, trimmed)
//!
//! RULE: Resolution never fails on input. Anything unrecognised is simply
//! not found and the record stays `unallocated`.

use crate::{
    config::IdentityConfig,
    error::ReconResult,
    event::{ReconEvent, ResolutionMethod},
    lifecycle::{self, TxnStatus},
    model::{AuditAction, AuditEntry, TransactionRecord},
    store::ReconStore,
    types::CustomerId,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;

/// Finds `<marker><separators><digits>` where the marker starts a word.
#[derive(Debug, Clone)]
pub struct MarkerExtractor {
    pattern: Regex,
}

impl MarkerExtractor {
    pub fn new(marker: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(r"(?i)\b{}[\s:#\-]*(\d+)", regex::escape(marker.trim())))?;
        Ok(Self { pattern })
    }

    /// The digit run after the first marker, without leading zeros.
    pub fn extract(&self, text: &str) -> Option<CustomerId> {
        let digits = self.pattern.captures(text)?.get(1)?.as_str();
        let trimmed = digits.trim_start_matches('0');
        Some(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
    }
}

/// Snapshot of ledger identifier mappings, keyed by normalised text.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    by_text: HashMap<String, Vec<CustomerId>>,
}

impl IdentifierMap {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, CustomerId)>) -> Self {
        let mut by_text: HashMap<String, Vec<CustomerId>> = HashMap::new();
        for (text, customer) in pairs {
            let ids = by_text.entry(normalise(&text)).or_default();
            if !ids.contains(&customer) {
                ids.push(customer);
            }
        }
        Self { by_text }
    }

    pub fn load(store: &ReconStore) -> ReconResult<Self> {
        Ok(Self::from_pairs(store.identifier_mappings()?))
    }

    /// A text shared by several customers resolves to nobody.
    pub fn lookup(&self, text: &str) -> Option<&CustomerId> {
        let key = normalise(text);
        if key.is_empty() {
            return None;
        }
        match self.by_text.get(&key)?.as_slice() {
            [only] => Some(only),
            many => {
                log::warn!("identity: mapping {key:?} is shared by {} customers, ignored", many.len());
                None
            }
        }
    }
}

fn normalise(text: &str) -> String {
    text.trim().to_lowercase()
}

pub struct IdentityResolver {
    extractor: MarkerExtractor,
    mappings:  IdentifierMap,
}

impl IdentityResolver {
    pub fn new(config: &IdentityConfig, mappings: IdentifierMap) -> Result<Self, regex::Error> {
        Ok(Self {
            extractor: MarkerExtractor::new(&config.marker)?,
            mappings,
        })
    }

    /// Pure resolution over the two text fields.
    pub fn resolve_text(&self, reference: &str, remittance: &str) -> Option<(CustomerId, ResolutionMethod)> {
        if let Some(id) = self.extractor.extract(reference) {
            return Some((id, ResolutionMethod::ReferenceMarker));
        }
        if let Some(id) = self.extractor.extract(remittance) {
            return Some((id, ResolutionMethod::RemittanceMarker));
        }
        if let Some(id) = self.mappings.lookup(reference) {
            return Some((id.clone(), ResolutionMethod::ReferenceMapping));
        }
        if let Some(id) = self.mappings.lookup(remittance) {
            return Some((id.clone(), ResolutionMethod::RemittanceMapping));
        }
        None
    }

    /// Resolve a `pending` record and move it to `ready_to_post`.
    ///
    /// Records that already carry an identifier are only advanced; no
    /// identifier audit is written for them. Records in any other status
    /// are left alone and produce no event.
    pub fn apply(
        &self,
        store: &ReconStore,
        record: &TransactionRecord,
        actor: &str,
        now: DateTime<Utc>,
    ) -> ReconResult<Option<ReconEvent>> {
        if record.status != TxnStatus::Pending {
            return Ok(None);
        }
        let key = record.key();

        if !record.is_unallocated() {
            lifecycle::transition(store, &key, TxnStatus::Pending, TxnStatus::ReadyToPost, actor, now)?;
            return Ok(None);
        }

        let Some((customer_id, method)) = self.resolve_text(&record.reference, &record.remittance) else {
            log::debug!("identity: {key} unresolved");
            return Ok(Some(ReconEvent::IdentityUnresolved {
                entry_id: key.entry_id,
                account:  key.account,
            }));
        };

        let moved = store.atomically(|s| {
            if !lifecycle::transition(s, &key, TxnStatus::Pending, TxnStatus::ReadyToPost, actor, now)? {
                return Ok(false);
            }
            s.update_transaction_customer(&key, &customer_id, true, now)?;
            s.insert_audit(&AuditEntry::new(
                &key,
                AuditAction::IdentityResolved,
                "customer_id",
                Some(&record.customer_id),
                Some(&customer_id),
                &format!("{actor}:{}", method.as_str()),
                now,
            ))?;
            Ok(true)
        })?;
        if !moved {
            return Ok(None);
        }

        log::info!("identity: {key} -> customer {customer_id} via {}", method.as_str());
        Ok(Some(ReconEvent::IdentityResolved {
            entry_id: key.entry_id,
            account:  key.account,
            customer_id,
            method,
        }))
    }
}
