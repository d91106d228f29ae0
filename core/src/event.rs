//! Run events — the structured record of what each pipeline stage did.
//!
//! RULE: Stages return events; only the engine persists them.
//! RULE: Events describe outcomes. State lives in the store, never here.

use crate::types::{AccountId, CustomerId, EntryId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an incoming entry never became a `TransactionRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    Outgoing,
    Excluded,
    DuplicateEntry,
    DuplicateTriple,
    Malformed,
}

/// Which strategy produced a customer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    ReferenceMarker,
    RemittanceMarker,
    ReferenceMapping,
    RemittanceMapping,
    Manual,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::ReferenceMarker   => "reference_marker",
            ResolutionMethod::RemittanceMarker  => "remittance_marker",
            ResolutionMethod::ReferenceMapping  => "reference_mapping",
            ResolutionMethod::RemittanceMapping => "remittance_mapping",
            ResolutionMethod::Manual            => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconEvent {
    // ── Engine ─────────────────────────────────────
    RunStarted {
        run_id: RunId,
    },
    RunCompleted {
        run_id: RunId,
        processed: u32,
        failed: u32,
    },

    // ── Ledger snapshot ────────────────────────────
    SnapshotRefreshed {
        customers: u32,
        payments: u32,
        errors: u32,
    },
    SnapshotUnavailable {
        reason: String,
    },

    // ── Ingest ─────────────────────────────────────
    FeedUnavailable {
        account: AccountId,
        reason: String,
    },
    EntryIngested {
        entry_id: EntryId,
        account: AccountId,
        amount: f64,
    },
    EntryDiscarded {
        entry_id: Option<EntryId>,
        account: AccountId,
        reason: DiscardReason,
    },

    // ── Identity ───────────────────────────────────
    IdentityResolved {
        entry_id: EntryId,
        account: AccountId,
        customer_id: CustomerId,
        method: ResolutionMethod,
    },
    IdentityUnresolved {
        entry_id: EntryId,
        account: AccountId,
    },

    // ── Posting ────────────────────────────────────
    LedgerSynced {
        entry_id: EntryId,
        account: AccountId,
        payment_id: String,
    },
    DuplicateFlagged {
        entry_id: EntryId,
        account: AccountId,
        customer_id: CustomerId,
        matched_payment_id: String,
        days_apart: i64,
    },
    PaymentPosted {
        entry_id: EntryId,
        account: AccountId,
        customer_id: CustomerId,
        payment_id: String,
        amount: f64,
    },
    PostingRejected {
        entry_id: EntryId,
        account: AccountId,
        code: String,
        reason: String,
    },
    PostingDeferred {
        entry_id: EntryId,
        account: AccountId,
        reason: String,
    },
    PostingSkipped {
        entry_id: EntryId,
        account: AccountId,
        reason: String,
    },
}

impl ReconEvent {
    /// The snake_case tag, used as the `event_type` column.
    pub fn event_type(&self) -> &'static str {
        match self {
            ReconEvent::RunStarted { .. }          => "run_started",
            ReconEvent::RunCompleted { .. }        => "run_completed",
            ReconEvent::SnapshotRefreshed { .. }   => "snapshot_refreshed",
            ReconEvent::SnapshotUnavailable { .. } => "snapshot_unavailable",
            ReconEvent::FeedUnavailable { .. }     => "feed_unavailable",
            ReconEvent::EntryIngested { .. }       => "entry_ingested",
            ReconEvent::EntryDiscarded { .. }      => "entry_discarded",
            ReconEvent::IdentityResolved { .. }    => "identity_resolved",
            ReconEvent::IdentityUnresolved { .. }  => "identity_unresolved",
            ReconEvent::LedgerSynced { .. }        => "ledger_synced",
            ReconEvent::DuplicateFlagged { .. }    => "duplicate_flagged",
            ReconEvent::PaymentPosted { .. }       => "payment_posted",
            ReconEvent::PostingRejected { .. }     => "posting_rejected",
            ReconEvent::PostingDeferred { .. }     => "posting_deferred",
            ReconEvent::PostingSkipped { .. }      => "posting_skipped",
        }
    }
}

/// A persisted event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub stage:      String,
    pub event_type: String,
    pub payload:    String, // JSON-serialised ReconEvent
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn from_event(
        run_id: &str,
        stage: &str,
        event: &ReconEvent,
        at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id:         None,
            run_id:     run_id.to_string(),
            stage:      stage.to_string(),
            event_type: event.event_type().to_string(),
            payload:    serde_json::to_string(event)?,
            created_at: at,
        })
    }
}
