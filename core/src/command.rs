use crate::{
    model::{SuspensionRecord, TransactionRecord},
    suspension::SuspendOutcome,
    types::TieBreak,
};
use serde::{Deserialize, Serialize};

fn default_tie_break() -> TieBreak {
    TieBreak::Strict
}

/// Operator actions on records the pipeline parked for a human.
///
/// `account` may be omitted; the record is then chosen by `tie_break`
/// among every record carrying `entry_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Close the open failure and send the record back to `ready_to_post`,
    /// optionally with a corrected customer.
    ResolveFailure {
        entry_id: String,
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        manual_customer_id: Option<String>,
        actor: String,
        #[serde(default = "default_tie_break")]
        tie_break: TieBreak,
    },
    /// Give an `unallocated` record a customer by hand.
    AssignCustomer {
        entry_id: String,
        #[serde(default)]
        account: Option<String>,
        customer_id: String,
        actor: String,
        #[serde(default = "default_tie_break")]
        tie_break: TieBreak,
    },
    /// The payment was captured in the ledger by hand.
    MarkPosted {
        entry_id: String,
        #[serde(default)]
        account: Option<String>,
        actor: String,
        #[serde(default)]
        note: Option<String>,
        #[serde(default = "default_tie_break")]
        tie_break: TieBreak,
    },
    Suspend {
        customer_id: String,
        service_id: String,
        actor: String,
        #[serde(default)]
        note: Option<String>,
        #[serde(default)]
        grace_override: bool,
    },
    Reactivate {
        suspension_id: i64,
        actor: String,
        #[serde(default)]
        note: Option<String>,
    },
}

impl OperatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::ResolveFailure { .. } => "resolve_failure",
            OperatorCommand::AssignCustomer { .. } => "assign_customer",
            OperatorCommand::MarkPosted { .. }     => "mark_posted",
            OperatorCommand::Suspend { .. }        => "suspend",
            OperatorCommand::Reactivate { .. }     => "reactivate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Transaction(TransactionRecord),
    Suspension(SuspendOutcome),
    Reactivated(SuspensionRecord),
}
