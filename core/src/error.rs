use thiserror::Error;

use crate::types::TxnKey;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transaction {entry_id} not found")]
    TransactionNotFound { entry_id: String },

    #[error("Entry id {entry_id} exists on {count} accounts; specify the account")]
    AmbiguousEntry { entry_id: String, count: usize },

    #[error("Transaction {key} cannot move from {from} to {to}")]
    InvalidTransition { key: TxnKey, from: String, to: String },

    #[error("Customer {customer_id} is not in the ledger snapshot")]
    CustomerNotFound { customer_id: String },

    #[error("A customer id is required for {key}, got {given:?}")]
    CustomerRequired { key: TxnKey, given: String },

    #[error("No unresolved failure for {key}")]
    FailureNotFound { key: TxnKey },

    #[error("Suspension {suspension_id} not found or not active")]
    SuspensionNotFound { suspension_id: i64 },

    #[error("Suspension refused for customer {customer_id}: {reason}")]
    SuspensionNotAllowed { customer_id: String, reason: String },

    #[error("Ledger gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ReconResult<T> = Result<T, ReconError>;

/// Faults reported by the bank or ledger collaborators.
///
/// The split matters to the orchestrator: a transient fault leaves the
/// record where it was for the next run, a rejection parks it for a human.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("transient upstream fault: {0}")]
    Transient(String),

    #[error("rejected ({code}): {reason}")]
    Rejected { code: String, reason: String },
}

impl GatewayError {
    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::Rejected {
            code:   code.into(),
            reason: reason.into(),
        }
    }
}
