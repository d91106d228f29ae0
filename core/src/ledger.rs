//! Billing ledger collaborator.
//!
//! Wire shapes (`Ledger*`) mirror the ledger's JSON loosely: ids may be
//! numbers or strings, dates may carry `+0000` offsets, status codes may be
//! numeric or labels. They are mapped into the closed types of
//! `crate::model` at the edge and nowhere else.

use crate::{
    error::GatewayError,
    model::{CustomerAccount, InvoiceRecord, InvoiceStatus, LedgerPayment, ServiceAccount, ServiceStatus},
    types::CustomerId,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};

// ── Lenient field decoding ──────────────────────────────────────

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected id, got {other}"))),
    }
}

/// RFC 3339, `+0000`-style offsets, or a bare date at midnight UTC.
pub fn parse_ledger_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn lenient_datetime<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_ledger_datetime))
}

fn status_code<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn default_true() -> bool {
    true
}

// ── Customers ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAttribute {
    pub key:   String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Known custom attributes. Anything else is carried as `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerAttribute {
    Vip(bool),
    GraceDay(Option<u32>),
    PaymentReference(String),
    Unknown { key: String, value: Option<String> },
}

impl CustomerAttribute {
    pub fn parse(attr: &LedgerAttribute) -> Self {
        let value = attr.value.as_deref().map(str::trim);
        match attr.key.as_str() {
            "vip" => CustomerAttribute::Vip(matches!(
                value.map(str::to_ascii_lowercase).as_deref(),
                Some("1" | "true" | "yes")
            )),
            "gracePaymentDate" => CustomerAttribute::GraceDay(
                value
                    .and_then(|v| v.parse::<u32>().ok())
                    .filter(|d| (1..=31).contains(d)),
            ),
            "paymentReference" => match value {
                Some(v) if !v.is_empty() => CustomerAttribute::PaymentReference(v.to_string()),
                _ => CustomerAttribute::Unknown {
                    key:   attr.key.clone(),
                    value: attr.value.clone(),
                },
            },
            _ => CustomerAttribute::Unknown {
                key:   attr.key.clone(),
                value: attr.value.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerClient {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_lead: bool,
    #[serde(default)]
    pub has_overdue_invoice: bool,
    #[serde(default)]
    pub account_balance: f64,
    #[serde(default)]
    pub account_outstanding: f64,
    #[serde(default)]
    pub account_credit: f64,
    #[serde(default)]
    pub attributes: Vec<LedgerAttribute>,
}

impl LedgerClient {
    pub fn display_name(&self) -> String {
        if let Some(company) = self.company_name.as_deref().filter(|c| !c.trim().is_empty()) {
            return company.trim().to_string();
        }
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        parts.join(" ")
    }

    pub fn to_account(&self, now: DateTime<Utc>) -> CustomerAccount {
        let mut account = CustomerAccount {
            customer_id:         self.id.clone(),
            display_name:        self.display_name(),
            is_vip:              false,
            grace_day:           None,
            is_archived:         self.is_archived,
            is_active:           self.is_active,
            is_lead:             self.is_lead,
            has_overdue_invoice: self.has_overdue_invoice,
            balance:             self.account_balance,
            outstanding:         self.account_outstanding,
            credit:              self.account_credit,
            payment_references:  Vec::new(),
            refreshed_at:        now,
        };
        for attr in &self.attributes {
            match CustomerAttribute::parse(attr) {
                CustomerAttribute::Vip(v) => account.is_vip = v,
                CustomerAttribute::GraceDay(d) => account.grace_day = d,
                CustomerAttribute::PaymentReference(r) => account.payment_references.push(r),
                CustomerAttribute::Unknown { .. } => {}
            }
        }
        account
    }
}

// ── Services ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionPeriod {
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerService {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub suspension_periods: Vec<SuspensionPeriod>,
}

impl LedgerService {
    pub fn to_account(&self, now: DateTime<Utc>) -> ServiceAccount {
        ServiceAccount {
            service_id:           self.id.clone(),
            customer_id:          self.client_id.clone(),
            name:                 self.name.clone(),
            status:               self.status.map(ServiceStatus::from_code).unwrap_or(ServiceStatus::Unknown),
            price:                self.price,
            suspension_count:     self.suspension_periods.len() as u32,
            latest_suspension_at: self.suspension_periods.iter().filter_map(|p| p.start_date).max(),
            refreshed_at:         now,
        }
    }
}

// ── Invoices ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerInvoice {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub client_id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub amount_to_pay: Option<f64>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "status_code")]
    pub status: Option<String>,
}

impl LedgerInvoice {
    /// `None` when the invoice has no creation date to anchor it.
    pub fn to_record(&self) -> Option<InvoiceRecord> {
        Some(InvoiceRecord {
            invoice_id:  self.id.clone(),
            customer_id: self.client_id.clone(),
            number:      self.number.clone(),
            total:       self.total,
            remaining:   self.amount_to_pay,
            created_at:  self.created_date?,
            due_at:      self.due_date,
            status:      self
                .status
                .as_deref()
                .map(InvoiceStatus::from_code)
                .unwrap_or(InvoiceStatus::Unknown),
        })
    }
}

// ── Payments ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPaymentRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub client_id: String,
    pub amount: f64,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub provider_payment_id: Option<String>,
    #[serde(default)]
    pub currency_code: Option<String>,
}

impl LedgerPaymentRecord {
    pub fn to_payment(&self, default_currency: &str) -> Option<LedgerPayment> {
        Some(LedgerPayment {
            payment_id:          self.id.clone(),
            customer_id:         self.client_id.clone(),
            amount:              self.amount,
            created_at:          self.created_date?,
            method:              self.method.as_ref().and_then(|m| m.name.clone()),
            note:                self.note.clone(),
            provider_payment_id: self.provider_payment_id.clone(),
            currency:            self
                .currency_code
                .clone()
                .unwrap_or_else(|| default_currency.to_string()),
        })
    }
}

// ── Outbound requests ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPaymentRequest {
    pub client_id:                       CustomerId,
    pub amount:                          f64,
    pub currency_code:                   String,
    pub provider_name:                   String,
    /// The bank entry id. The ledger treats it as the idempotency key.
    pub provider_payment_id:             String,
    pub provider_payment_time:           DateTime<Utc>,
    pub note:                            String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_id:                       Option<String>,
    pub apply_to_invoices_automatically: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedPayment {
    pub payment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Suspend,
    Reactivate,
}

impl ServiceAction {
    /// Status code the ledger expects for this action.
    pub fn status_code(&self) -> i64 {
        match self {
            ServiceAction::Suspend    => 3,
            ServiceAction::Reactivate => 1,
        }
    }

    pub fn resulting_status(&self) -> ServiceStatus {
        ServiceStatus::from_code(self.status_code())
    }
}

pub trait LedgerGateway {
    fn fetch_customers(&self) -> Result<Vec<LedgerClient>, GatewayError>;
    fn fetch_services(&self, customer_id: &str) -> Result<Vec<LedgerService>, GatewayError>;
    fn fetch_invoices(
        &self,
        customer_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerInvoice>, GatewayError>;
    fn fetch_payments(&self, since: DateTime<Utc>) -> Result<Vec<LedgerPaymentRecord>, GatewayError>;

    /// Turn a lead into a billable client before money is posted to it.
    fn convert_lead(&mut self, customer_id: &str) -> Result<(), GatewayError>;
    fn post_payment(&mut self, request: &PostPaymentRequest) -> Result<PostedPayment, GatewayError>;
    fn update_service_status(
        &mut self,
        service_id: &str,
        action: ServiceAction,
    ) -> Result<(), GatewayError>;
}

// ── In-memory ledger ────────────────────────────────────────────

/// Injected failures for the in-memory ledger.
#[derive(Debug, Clone, Default)]
pub struct LedgerFaults {
    pub offline:              bool,
    pub transient_customers:  HashSet<CustomerId>,
    pub rejected_customers:   HashMap<CustomerId, (String, String)>,
    pub failing_conversions:  HashSet<CustomerId>,
    pub failing_service_ids:  HashSet<String>,
}

/// A ledger held entirely in memory. Loaded from fixture JSON by the runner
/// and driven directly by tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryLedger {
    #[serde(default)]
    pub clients:  Vec<LedgerClient>,
    #[serde(default)]
    pub services: Vec<LedgerService>,
    #[serde(default)]
    pub invoices: Vec<LedgerInvoice>,
    #[serde(default)]
    pub payments: Vec<LedgerPaymentRecord>,
    #[serde(skip)]
    pub faults:   LedgerFaults,
    #[serde(skip)]
    pub posted:   Vec<PostPaymentRequest>,
    #[serde(skip)]
    pub status_updates: Vec<(String, ServiceAction)>,
    #[serde(skip)]
    next_payment_id: u64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.faults.offline {
            return Err(GatewayError::Transient("ledger unreachable".into()));
        }
        Ok(())
    }

    fn client(&self, customer_id: &str) -> Option<&LedgerClient> {
        self.clients.iter().find(|c| c.id == customer_id)
    }
}

impl LedgerGateway for InMemoryLedger {
    fn fetch_customers(&self) -> Result<Vec<LedgerClient>, GatewayError> {
        self.check_online()?;
        Ok(self.clients.clone())
    }

    fn fetch_services(&self, customer_id: &str) -> Result<Vec<LedgerService>, GatewayError> {
        self.check_online()?;
        Ok(self
            .services
            .iter()
            .filter(|s| s.client_id == customer_id)
            .cloned()
            .collect())
    }

    fn fetch_invoices(
        &self,
        customer_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerInvoice>, GatewayError> {
        self.check_online()?;
        Ok(self
            .invoices
            .iter()
            .filter(|i| i.client_id == customer_id)
            .filter(|i| i.created_date.map(|d| d >= since).unwrap_or(false))
            .cloned()
            .collect())
    }

    fn fetch_payments(&self, since: DateTime<Utc>) -> Result<Vec<LedgerPaymentRecord>, GatewayError> {
        self.check_online()?;
        Ok(self
            .payments
            .iter()
            .filter(|p| p.created_date.map(|d| d >= since).unwrap_or(false))
            .cloned()
            .collect())
    }

    fn convert_lead(&mut self, customer_id: &str) -> Result<(), GatewayError> {
        self.check_online()?;
        if self.faults.failing_conversions.contains(customer_id) {
            return Err(GatewayError::rejected("422", "lead conversion refused"));
        }
        match self.clients.iter_mut().find(|c| c.id == customer_id) {
            Some(c) => {
                c.is_lead = false;
                Ok(())
            }
            None => Err(GatewayError::rejected("404", format!("client {customer_id} not found"))),
        }
    }

    fn post_payment(&mut self, request: &PostPaymentRequest) -> Result<PostedPayment, GatewayError> {
        self.check_online()?;
        let cid = request.client_id.as_str();
        if self.faults.transient_customers.contains(cid) {
            return Err(GatewayError::Transient(format!("timeout posting for client {cid}")));
        }
        if let Some((code, reason)) = self.faults.rejected_customers.get(cid) {
            return Err(GatewayError::rejected(code.clone(), reason.clone()));
        }
        let client = self
            .client(cid)
            .ok_or_else(|| GatewayError::rejected("404", format!("client {cid} not found")))?;
        if client.is_archived {
            return Err(GatewayError::rejected("422", format!("client {cid} is archived")));
        }

        self.next_payment_id += 1;
        let payment_id = format!("PAY-{}", self.next_payment_id);
        self.payments.push(LedgerPaymentRecord {
            id:                  payment_id.clone(),
            client_id:           request.client_id.clone(),
            amount:              request.amount,
            created_date:        Some(request.provider_payment_time),
            method:              Some(PaymentMethod { name: Some(request.provider_name.clone()) }),
            note:                Some(request.note.clone()),
            provider_payment_id: Some(request.provider_payment_id.clone()),
            currency_code:       Some(request.currency_code.clone()),
        });
        self.posted.push(request.clone());
        Ok(PostedPayment { payment_id })
    }

    fn update_service_status(
        &mut self,
        service_id: &str,
        action: ServiceAction,
    ) -> Result<(), GatewayError> {
        self.check_online()?;
        if self.faults.failing_service_ids.contains(service_id) {
            return Err(GatewayError::rejected("422", format!("service {service_id} refused {action:?}")));
        }
        let service = self
            .services
            .iter_mut()
            .find(|s| s.id == service_id)
            .ok_or_else(|| GatewayError::rejected("404", format!("service {service_id} not found")))?;
        service.status = Some(action.status_code());
        self.status_updates.push((service_id.to_string(), action));
        Ok(())
    }
}
