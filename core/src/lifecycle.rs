//! Transaction lifecycle state machine.
//!
//! ```text
//! pending ──resolve──▶ ready_to_post ──post──▶ posted
//!    │                     │  │  └──duplicate──▶ duplicate_manual_review ─┐
//!    │                     │  └──rejected────▶ failed_rejected ──────────┤
//!    │                     │                                             │
//!    │                     ◀──────────── failure resolved ───────────────┘
//!    └──────── mark posted / ledger sync ──────────────▶ posted_manual | posted
//! ```
//!
//! RULE: Every status write goes through `TxnStatus::can_transition_to`.
//! RULE: `posted` and `posted_manual` are terminal.

use crate::{
    error::{ReconError, ReconResult},
    model::{AuditAction, AuditEntry},
    store::ReconStore,
    types::TxnKey,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Pending,
    ReadyToPost,
    Posted,
    PostedManual,
    DuplicateManualReview,
    FailedRejected,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Pending               => "pending",
            TxnStatus::ReadyToPost           => "ready_to_post",
            TxnStatus::Posted                => "posted",
            TxnStatus::PostedManual          => "posted_manual",
            TxnStatus::DuplicateManualReview => "duplicate_manual_review",
            TxnStatus::FailedRejected        => "failed_rejected",
        }
    }

    /// Unknown strings only appear if the database was edited by hand;
    /// they are parked as `pending` so the record is re-examined.
    pub fn from_label(s: &str) -> Self {
        match s {
            "ready_to_post"           => TxnStatus::ReadyToPost,
            "posted"                  => TxnStatus::Posted,
            "posted_manual"           => TxnStatus::PostedManual,
            "duplicate_manual_review" => TxnStatus::DuplicateManualReview,
            "failed_rejected"         => TxnStatus::FailedRejected,
            _                         => TxnStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnStatus::Posted | TxnStatus::PostedManual)
    }

    pub fn can_transition_to(&self, next: TxnStatus) -> bool {
        use TxnStatus::*;
        match (self, next) {
            (Pending, ReadyToPost) => true,
            (ReadyToPost, Posted | DuplicateManualReview | FailedRejected) => true,
            (DuplicateManualReview | FailedRejected, ReadyToPost) => true,
            // Operator override and ledger sync may short-circuit any open state.
            (Pending | ReadyToPost | DuplicateManualReview | FailedRejected, PostedManual) => true,
            (Pending | DuplicateManualReview | FailedRejected, Posted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Guarded writes ──────────────────────────────────────────────

/// Move `key` from `from` to `to` and audit it.
///
/// Returns false (and writes nothing) when the record is no longer in
/// `from`; a concurrent caller already moved it.
pub fn transition(
    store: &ReconStore,
    key: &TxnKey,
    from: TxnStatus,
    to: TxnStatus,
    actor: &str,
    at: DateTime<Utc>,
) -> ReconResult<bool> {
    if !from.can_transition_to(to) {
        return Err(ReconError::InvalidTransition {
            key:  key.clone(),
            from: from.to_string(),
            to:   to.to_string(),
        });
    }
    store.atomically(|s| {
        if !s.update_transaction_status(key, from, to, at)? {
            log::debug!("lifecycle: {key} left {from} before {to} could be applied");
            return Ok(false);
        }
        s.insert_audit(&AuditEntry::new(
            key,
            AuditAction::StatusChange,
            "status",
            Some(from.as_str()),
            Some(to.as_str()),
            actor,
            at,
        ))?;
        Ok(true)
    })
}

/// Stamp a posting (automatic, manual, or discovered in the ledger).
pub fn record_posting(
    store: &ReconStore,
    key: &TxnKey,
    from: TxnStatus,
    to: TxnStatus,
    ledger_payment_id: &str,
    action: AuditAction,
    actor: &str,
    at: DateTime<Utc>,
) -> ReconResult<bool> {
    if !matches!(to, TxnStatus::Posted | TxnStatus::PostedManual) || !from.can_transition_to(to) {
        return Err(ReconError::InvalidTransition {
            key:  key.clone(),
            from: from.to_string(),
            to:   to.to_string(),
        });
    }
    store.atomically(|s| {
        if !s.mark_transaction_posted(key, from, to, ledger_payment_id, at)? {
            log::debug!("lifecycle: {key} left {from} before it could be posted");
            return Ok(false);
        }
        s.insert_audit(&AuditEntry::new(
            key,
            action,
            "ledger_payment_id",
            None,
            Some(ledger_payment_id),
            actor,
            at,
        ))?;
        s.insert_audit(&AuditEntry::new(
            key,
            AuditAction::StatusChange,
            "status",
            Some(from.as_str()),
            Some(to.as_str()),
            actor,
            at,
        ))?;
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::TxnStatus::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [Pending, ReadyToPost, Posted, PostedManual, DuplicateManualReview, FailedRejected] {
            assert!(!Posted.can_transition_to(next), "posted -> {next}");
            assert!(!PostedManual.can_transition_to(next), "posted_manual -> {next}");
        }
    }

    #[test]
    fn review_states_reenter_at_ready_to_post() {
        assert!(DuplicateManualReview.can_transition_to(ReadyToPost));
        assert!(FailedRejected.can_transition_to(ReadyToPost));
        assert!(!FailedRejected.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(DuplicateManualReview));
    }

    #[test]
    fn labels_round_trip_and_unknown_parks_as_pending() {
        for status in [Pending, ReadyToPost, Posted, PostedManual, DuplicateManualReview, FailedRejected] {
            assert_eq!(super::TxnStatus::from_label(status.as_str()), status);
        }
        assert_eq!(super::TxnStatus::from_label("on_hold"), Pending);
    }
}
