//! Shared primitive types used across the reconciliation engine.

use serde::{Deserialize, Serialize};

/// A ledger customer identifier (the ledger's own id, kept as text).
pub type CustomerId = String;

/// The bank's per-account identifier for a single transaction.
pub type EntryId = String;

/// A bank account the feed is queried for.
pub type AccountId = String;

/// The canonical run identifier.
pub type RunId = String;

/// Sentinel identifier meaning "customer not yet resolved".
pub const UNALLOCATED: &str = "unallocated";

/// Amounts closer than this are the same payment.
pub const AMOUNT_EPSILON: f64 = 0.01;

/// The full identity of a transaction. Entry ids are only unique within
/// one source account, so every lookup carries both halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnKey {
    pub entry_id: EntryId,
    pub account:  AccountId,
}

impl TxnKey {
    pub fn new(entry_id: impl Into<EntryId>, account: impl Into<AccountId>) -> Self {
        Self {
            entry_id: entry_id.into(),
            account:  account.into(),
        }
    }
}

impl std::fmt::Display for TxnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.entry_id, self.account)
    }
}

/// How a bare entry id is narrowed to one record when it exists on
/// several accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// More than one match is an error.
    Strict,
    /// Prefer the record still `unallocated`, else the earliest ingested.
    PreferUnallocated,
}
