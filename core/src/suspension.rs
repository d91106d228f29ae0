//! Suspension decision engine and the actions that act on its verdict.
//!
//! RULE ORDER (first decisive rule wins, never reordered):
//!   1. VIP                       → keep
//!   2. inside grace period       → keep (unless overridden)
//!   3. flagged overdue + an unpaid invoice past due → suspend
//!   4. risky pattern with missed/late over threshold → suspend
//!   5. otherwise                 → keep
//!
//! RULE: `SuspensionPolicy::decide` is pure. Ledger calls and
//! `SuspensionRecord` writes happen only in `SuspensionManager`.
//! RULE: At most one active suspension per (customer, service).

use crate::{
    config::RiskConfig,
    error::{ReconError, ReconResult},
    ledger::{LedgerGateway, ServiceAction},
    model::{CustomerAccount, InvoiceRecord, PaymentPatternSummary, ServiceStatus, SuspensionRecord},
    store::ReconStore,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    Vip,
    GracePeriod,
    OverdueInvoices,
    RiskyPattern,
    NoCriteria,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspensionDecision {
    pub should_suspend: bool,
    pub reason:         String,
    pub rule:           DecisionRule,
}

impl SuspensionDecision {
    fn keep(rule: DecisionRule, reason: impl Into<String>) -> Self {
        Self { should_suspend: false, reason: reason.into(), rule }
    }

    fn suspend(rule: DecisionRule, reason: impl Into<String>) -> Self {
        Self { should_suspend: true, reason: reason.into(), rule }
    }
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

fn plural(n: u32, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

pub struct SuspensionPolicy<'a> {
    config: &'a RiskConfig,
}

impl<'a> SuspensionPolicy<'a> {
    pub fn new(config: &'a RiskConfig) -> Self {
        Self { config }
    }

    pub fn decide(
        &self,
        customer: &CustomerAccount,
        pattern: Option<&PaymentPatternSummary>,
        invoices: &[InvoiceRecord],
        grace_override: bool,
        now: DateTime<Utc>,
    ) -> SuspensionDecision {
        if customer.is_vip {
            return SuspensionDecision::keep(DecisionRule::Vip, "VIP customer");
        }

        if let Some(grace_day) = customer.grace_day {
            if !grace_override && now.day() <= grace_day {
                return SuspensionDecision::keep(
                    DecisionRule::GracePeriod,
                    format!("within grace period (due by the {})", ordinal(grace_day)),
                );
            }
        }

        if customer.has_overdue_invoice {
            let overdue = invoices
                .iter()
                .filter(|i| i.customer_id == customer.customer_id && i.is_overdue_at(now))
                .count() as u32;
            if overdue > 0 {
                return SuspensionDecision::suspend(
                    DecisionRule::OverdueInvoices,
                    format!("{} past due", plural(overdue, "overdue invoice")),
                );
            }
        }

        if let Some(p) = pattern.filter(|p| p.is_risky) {
            if p.missed_count >= self.config.missed_threshold {
                return SuspensionDecision::suspend(
                    DecisionRule::RiskyPattern,
                    plural(p.missed_count, "missed payment"),
                );
            }
            if p.late_count >= self.config.late_threshold {
                return SuspensionDecision::suspend(
                    DecisionRule::RiskyPattern,
                    plural(p.late_count, "late payment"),
                );
            }
        }

        SuspensionDecision::keep(DecisionRule::NoCriteria, "no suspension criteria met")
    }
}

// ── Actions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SuspendOutcome {
    Suspended(SuspensionRecord),
    /// The pair already had an active suspension. Nothing was changed.
    AlreadySuspended(SuspensionRecord),
}

/// A customer the policy would suspend today.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspensionCandidate {
    pub customer_id:  String,
    pub display_name: String,
    pub service_ids:  Vec<String>,
    pub decision:     SuspensionDecision,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuspensionStats {
    pub active_suspensions:     i64,
    pub resolved_suspensions:   i64,
    pub recent_suspensions:     i64,
    pub vip_customers:          i64,
    pub customers_with_overdue: i64,
    pub risky_patterns:         i64,
    pub active_services:        i64,
    pub suspended_services:     i64,
}

pub struct SuspensionManager<'a> {
    store:  &'a ReconStore,
    config: &'a RiskConfig,
}

impl<'a> SuspensionManager<'a> {
    pub fn new(store: &'a ReconStore, config: &'a RiskConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate the policy from cached ledger data.
    pub fn evaluate(
        &self,
        customer_id: &str,
        grace_override: bool,
        now: DateTime<Utc>,
    ) -> ReconResult<(CustomerAccount, SuspensionDecision)> {
        let customer = self
            .store
            .get_customer(customer_id)?
            .ok_or_else(|| ReconError::CustomerNotFound { customer_id: customer_id.to_string() })?;
        let pattern = self.store.get_payment_pattern(customer_id)?;
        let invoices = self.store.invoices_for(customer_id)?;
        let decision = SuspensionPolicy::new(self.config).decide(
            &customer,
            pattern.as_ref(),
            &invoices,
            grace_override,
            now,
        );
        Ok((customer, decision))
    }

    /// Suspend one service. Refused unless the policy agrees or the caller
    /// overrides; an override also bypasses the grace period.
    pub fn suspend(
        &self,
        ledger: &mut dyn LedgerGateway,
        customer_id: &str,
        service_id: &str,
        actor: &str,
        note: Option<&str>,
        grace_override: bool,
        now: DateTime<Utc>,
    ) -> ReconResult<SuspendOutcome> {
        let (_, decision) = self.evaluate(customer_id, grace_override, now)?;
        if !decision.should_suspend && !grace_override {
            return Err(ReconError::SuspensionNotAllowed {
                customer_id: customer_id.to_string(),
                reason:      decision.reason,
            });
        }
        let reason = if decision.should_suspend {
            decision.reason
        } else {
            format!("manual override ({})", decision.reason)
        };

        if let Some(existing) = self.store.active_suspension_for(customer_id, service_id)? {
            log::info!("suspension: {customer_id}/{service_id} already suspended (#{})", existing.suspension_id);
            return Ok(SuspendOutcome::AlreadySuspended(existing));
        }

        // The insert claims the pair; the ledger call inside the same
        // savepoint rolls it back if the ledger refuses.
        let claimed = self.store.atomically(|s| {
            let Some(id) = s.insert_suspension(customer_id, service_id, &reason, note, actor, now)? else {
                return Ok(None);
            };
            ledger.update_service_status(service_id, ServiceAction::Suspend)?;
            s.set_service_status(service_id, ServiceAction::Suspend.resulting_status(), now)?;
            Ok(Some(id))
        })?;

        match claimed {
            Some(id) => {
                log::info!("suspension: {customer_id}/{service_id} suspended by {actor}: {reason}");
                let record = self
                    .store
                    .get_suspension(id)?
                    .ok_or(ReconError::SuspensionNotFound { suspension_id: id })?;
                Ok(SuspendOutcome::Suspended(record))
            }
            None => {
                let existing = self
                    .store
                    .active_suspension_for(customer_id, service_id)?
                    .ok_or_else(|| ReconError::SuspensionNotAllowed {
                        customer_id: customer_id.to_string(),
                        reason:      "suspension changed concurrently".into(),
                    })?;
                Ok(SuspendOutcome::AlreadySuspended(existing))
            }
        }
    }

    pub fn reactivate(
        &self,
        ledger: &mut dyn LedgerGateway,
        suspension_id: i64,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> ReconResult<SuspensionRecord> {
        let record = self
            .store
            .get_suspension(suspension_id)?
            .filter(|s| s.is_active)
            .ok_or(ReconError::SuspensionNotFound { suspension_id })?;

        self.store.atomically(|s| {
            if !s.deactivate_suspension(suspension_id, actor, note, now)? {
                return Err(ReconError::SuspensionNotFound { suspension_id });
            }
            ledger.update_service_status(&record.service_id, ServiceAction::Reactivate)?;
            s.set_service_status(&record.service_id, ServiceAction::Reactivate.resulting_status(), now)?;
            Ok(())
        })?;

        log::info!(
            "suspension: {}/{} reactivated by {actor}",
            record.customer_id, record.service_id
        );
        self.store
            .get_suspension(suspension_id)?
            .ok_or(ReconError::SuspensionNotFound { suspension_id })
    }

    /// Active customers the policy would suspend, with the services that
    /// are neither suspended in the ledger nor under an active record.
    pub fn candidates(&self, now: DateTime<Utc>) -> ReconResult<Vec<SuspensionCandidate>> {
        let mut out = Vec::new();
        for customer in self.store.customers(true)? {
            let mut service_ids = Vec::new();
            for svc in self.store.services_for(&customer.customer_id)? {
                if svc.status == ServiceStatus::Suspended {
                    continue;
                }
                if self
                    .store
                    .active_suspension_for(&customer.customer_id, &svc.service_id)?
                    .is_some()
                {
                    continue;
                }
                service_ids.push(svc.service_id);
            }
            if service_ids.is_empty() {
                continue;
            }
            let (_, decision) = self.evaluate(&customer.customer_id, false, now)?;
            if decision.should_suspend {
                out.push(SuspensionCandidate {
                    customer_id: customer.customer_id,
                    display_name: customer.display_name,
                    service_ids,
                    decision,
                });
            }
        }
        Ok(out)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> ReconResult<SuspensionStats> {
        Ok(SuspensionStats {
            active_suspensions:     self.store.suspension_count(true)?,
            resolved_suspensions:   self.store.suspension_count(false)?,
            recent_suspensions:     self
                .store
                .suspensions_since(now - Duration::days(self.config.recent_suspension_days))?,
            vip_customers:          self.store.vip_customer_count()?,
            customers_with_overdue: self.store.overdue_customer_count()?,
            risky_patterns:         self.store.risky_pattern_count()?,
            active_services:        self.store.service_count_with_status(ServiceStatus::Active)?,
            suspended_services:     self.store.service_count_with_status(ServiceStatus::Suspended)?,
        })
    }
}
