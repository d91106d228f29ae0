//! Persisted records shared by every stage of the pipeline.
//!
//! RULE: Status-like fields coming from the ledger are closed enums with an
//! explicit `Unknown` variant. Unrecognised codes never fail a refresh.

use crate::{
    lifecycle::TxnStatus,
    types::{AccountId, CustomerId, EntryId, TxnKey, UNALLOCATED},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Transactions ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub entry_id:            EntryId,
    pub account:             AccountId,
    pub amount:              f64,
    pub value_date:          Option<NaiveDate>,
    pub reference:           String,
    pub remittance:          String,
    pub original_reference:  String,
    pub original_remittance: String,
    pub customer_id:         CustomerId,
    /// Identifier as first extracted; `customer_id` may later be corrected.
    pub original_customer_id: CustomerId,
    pub status:              TxnStatus,
    pub ledger_payment_id:   Option<String>,
    pub posted_at:           Option<DateTime<Utc>>,
    pub note:                Option<String>,
    pub ingested_at:         DateTime<Utc>,
}

impl TransactionRecord {
    pub fn key(&self) -> TxnKey {
        TxnKey::new(self.entry_id.clone(), self.account.clone())
    }

    pub fn is_unallocated(&self) -> bool {
        self.customer_id == UNALLOCATED
    }
}

// ── Ledger snapshot ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAccount {
    pub customer_id:         CustomerId,
    pub display_name:        String,
    pub is_vip:              bool,
    /// Day of month before which the customer may not be suspended.
    pub grace_day:           Option<u32>,
    pub is_archived:         bool,
    pub is_active:           bool,
    pub is_lead:             bool,
    pub has_overdue_invoice: bool,
    pub balance:             f64,
    pub outstanding:         f64,
    pub credit:              f64,
    /// Free-text references the customer is known to pay with.
    pub payment_references:  Vec<String>,
    pub refreshed_at:        DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Prepared,
    Suspended,
    Quoted,
    Unknown,
}

impl ServiceStatus {
    /// Ledger numeric status codes.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ServiceStatus::Active,
            2 => ServiceStatus::Prepared,
            3 => ServiceStatus::Suspended,
            4 => ServiceStatus::Quoted,
            _ => ServiceStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active    => "active",
            ServiceStatus::Prepared  => "prepared",
            ServiceStatus::Suspended => "suspended",
            ServiceStatus::Quoted    => "quoted",
            ServiceStatus::Unknown   => "unknown",
        }
    }

    pub fn from_label(s: &str) -> Self {
        match s {
            "active"    => ServiceStatus::Active,
            "prepared"  => ServiceStatus::Prepared,
            "suspended" => ServiceStatus::Suspended,
            "quoted"    => ServiceStatus::Quoted,
            _           => ServiceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub service_id:           String,
    pub customer_id:          CustomerId,
    pub name:                 String,
    pub status:               ServiceStatus,
    pub price:                f64,
    pub suspension_count:     u32,
    pub latest_suspension_at: Option<DateTime<Utc>>,
    pub refreshed_at:         DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPayment {
    pub payment_id:          String,
    pub customer_id:         CustomerId,
    pub amount:              f64,
    pub created_at:          DateTime<Utc>,
    pub method:              Option<String>,
    pub note:                Option<String>,
    /// Correlates back to a `TransactionRecord::entry_id` when we posted it.
    pub provider_payment_id: Option<String>,
    pub currency:            String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Unpaid,
    Overdue,
    Paid,
    Cancelled,
    Unknown,
}

impl InvoiceStatus {
    /// Ledger invoices report either a numeric code or a label.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "1" | "unpaid"   => InvoiceStatus::Unpaid,
            "2" | "3" | "paid" => InvoiceStatus::Paid,
            "draft"          => InvoiceStatus::Draft,
            "issued"         => InvoiceStatus::Issued,
            "overdue"        => InvoiceStatus::Overdue,
            "cancelled"      => InvoiceStatus::Cancelled,
            _                => InvoiceStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft     => "draft",
            InvoiceStatus::Issued    => "issued",
            InvoiceStatus::Unpaid    => "unpaid",
            InvoiceStatus::Overdue   => "overdue",
            InvoiceStatus::Paid      => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Unknown   => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_id:  String,
    pub customer_id: CustomerId,
    pub number:      Option<String>,
    pub total:       f64,
    pub remaining:   Option<f64>,
    pub created_at:  DateTime<Utc>,
    pub due_at:      Option<DateTime<Utc>>,
    pub status:      InvoiceStatus,
}

impl InvoiceRecord {
    /// Remaining amount is authoritative; the status label is not.
    pub fn is_paid(&self) -> bool {
        match self.remaining {
            None => true,
            Some(r) => r.abs() < crate::types::AMOUNT_EPSILON,
        }
    }

    /// Unpaid, billable and past its due date at `now`.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_paid()
            && !matches!(self.status, InvoiceStatus::Draft | InvoiceStatus::Cancelled)
            && self.due_at.map(|d| d < now).unwrap_or(false)
    }
}

// ── Risk ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPatternSummary {
    pub customer_id:        CustomerId,
    pub missed_count:       u32,
    pub late_count:         u32,
    pub on_time_count:      u32,
    pub avg_days_late:      Option<f64>,
    pub avg_payment_amount: Option<f64>,
    pub last_payment_at:    Option<DateTime<Utc>>,
    pub is_risky:           bool,
    pub period_start:       DateTime<Utc>,
    pub period_end:         DateTime<Utc>,
    pub calculated_at:      DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub suspension_id:  i64,
    pub customer_id:    CustomerId,
    pub service_id:     String,
    pub reason:         String,
    pub note:           Option<String>,
    pub is_active:      bool,
    pub suspended_at:   DateTime<Utc>,
    pub suspended_by:   String,
    pub reactivated_at: Option<DateTime<Utc>>,
    pub reactivated_by: Option<String>,
}

// ── Failures and audit ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    DuplicateManualReview,
    AccountArchived,
    AccountInactive,
    LeadConversionFailed,
    CustomerNotFound,
    /// Any other rejection code reported by the ledger.
    Other(String),
}

impl FailureCode {
    pub fn as_str(&self) -> &str {
        match self {
            FailureCode::DuplicateManualReview => "DUPLICATE_MANUAL_REVIEW",
            FailureCode::AccountArchived       => "ACCOUNT_ARCHIVED",
            FailureCode::AccountInactive       => "ACCOUNT_INACTIVE",
            FailureCode::LeadConversionFailed  => "LEAD_CONVERSION_FAILED",
            FailureCode::CustomerNotFound      => "CUSTOMER_NOT_FOUND",
            FailureCode::Other(code)           => code.as_str(),
        }
    }

    pub fn from_label(s: &str) -> Self {
        match s {
            "DUPLICATE_MANUAL_REVIEW" => FailureCode::DuplicateManualReview,
            "ACCOUNT_ARCHIVED"        => FailureCode::AccountArchived,
            "ACCOUNT_INACTIVE"        => FailureCode::AccountInactive,
            "LEAD_CONVERSION_FAILED"  => FailureCode::LeadConversionFailed,
            "CUSTOMER_NOT_FOUND"      => FailureCode::CustomerNotFound,
            other                     => FailureCode::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure_id:         i64,
    pub entry_id:           EntryId,
    pub account:            AccountId,
    pub reason:             String,
    pub code:               FailureCode,
    pub manual_customer_id: Option<CustomerId>,
    pub resolved:           bool,
    pub created_at:         DateTime<Utc>,
    pub updated_at:         DateTime<Utc>,
    pub resolved_at:        Option<DateTime<Utc>>,
}

/// What an audit row records. Stored as its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    IdentityResolved,
    CustomerUpdate,
    StatusChange,
    PaymentPosted,
    MarkedPosted,
    LedgerSync,
    FailureResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::IdentityResolved => "IDENTITY_RESOLVED",
            AuditAction::CustomerUpdate   => "CID_UPDATE",
            AuditAction::StatusChange     => "STATUS_CHANGE",
            AuditAction::PaymentPosted    => "PAYMENT_POSTED",
            AuditAction::MarkedPosted     => "MARKED_AS_POSTED",
            AuditAction::LedgerSync       => "LEDGER_SYNC",
            AuditAction::FailureResolved  => "FAILURE_RESOLVED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id:   Option<i64>,
    pub entry_id:   EntryId,
    pub account:    AccountId,
    pub action:     String,
    pub field_name: String,
    pub old_value:  Option<String>,
    pub new_value:  Option<String>,
    pub actor:      String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        key: &TxnKey,
        action: AuditAction,
        field_name: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Self {
        AuditEntry {
            audit_id:   None,
            entry_id:   key.entry_id.clone(),
            account:    key.account.clone(),
            action:     action.as_str().to_string(),
            field_name: field_name.to_string(),
            old_value:  old_value.map(str::to_string),
            new_value:  new_value.map(str::to_string),
            actor:      actor.to_string(),
            created_at: at,
        }
    }
}

// ── Run log ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ingested:           u32,
    pub discarded_outgoing: u32,
    pub discarded_excluded: u32,
    pub discarded_duplicate: u32,
    pub malformed:          u32,
    pub resolved:           u32,
    pub unresolved:         u32,
    pub synced:             u32,
    pub posted:             u32,
    pub duplicates_flagged: u32,
    pub rejected:           u32,
    pub deferred:           u32,
    pub stale_skipped:      u32,
    pub posted_amount:      f64,
    /// Set when the ledger snapshot could not be refreshed this run.
    pub snapshot_error:     Option<String>,
}

impl RunSummary {
    pub fn processed(&self) -> u32 {
        self.posted + self.synced + self.duplicates_flagged + self.rejected
    }

    pub fn failed(&self) -> u32 {
        self.duplicates_flagged + self.rejected + self.deferred
    }
}
