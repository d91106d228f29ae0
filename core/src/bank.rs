//! Bank feed collaborator.
//!
//! The feed hands over a fully materialised list of entries per account.
//! Fields stay loosely typed here; the ingest normaliser decides what is
//! malformed.

use crate::{error::GatewayError, types::AccountId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBankEntry {
    #[serde(default)]
    pub entry_id:   Option<String>,
    /// Number or numeric string, as the bank sends it.
    #[serde(default)]
    pub amount:     Option<serde_json::Value>,
    #[serde(default)]
    pub value_date: Option<String>,
    #[serde(default)]
    pub reference:  Option<String>,
    #[serde(default, alias = "remittanceInformation")]
    pub remittance: Option<String>,
}

impl RawBankEntry {
    pub fn parsed_amount(&self) -> Option<f64> {
        let v = match self.amount.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        v.is_finite().then_some(v)
    }
}

pub trait BankFeed {
    fn fetch_entries(&self, account: &str) -> Result<Vec<RawBankEntry>, GatewayError>;
}

/// A feed over entries already in memory (fixtures, replays, tests).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticBankFeed {
    #[serde(default)]
    entries: HashMap<AccountId, Vec<RawBankEntry>>,
    #[serde(skip)]
    unavailable: HashSet<AccountId>,
}

impl StaticBankFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(mut self, account: &str, entries: Vec<RawBankEntry>) -> Self {
        self.entries.entry(account.to_string()).or_default().extend(entries);
        self
    }

    pub fn push(&mut self, account: &str, entry: RawBankEntry) {
        self.entries.entry(account.to_string()).or_default().push(entry);
    }

    /// Make every fetch for `account` fail transiently.
    pub fn set_unavailable(&mut self, account: &str, unavailable: bool) {
        if unavailable {
            self.unavailable.insert(account.to_string());
        } else {
            self.unavailable.remove(account);
        }
    }
}

impl BankFeed for StaticBankFeed {
    fn fetch_entries(&self, account: &str) -> Result<Vec<RawBankEntry>, GatewayError> {
        if self.unavailable.contains(account) {
            return Err(GatewayError::Transient(format!("bank feed for {account} unavailable")));
        }
        Ok(self.entries.get(account).cloned().unwrap_or_default())
    }
}
