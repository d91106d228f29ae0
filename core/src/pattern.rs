//! Payment pattern analyzer.
//!
//! Per invoice in the window:
//!   - paid (remaining zero or null) with a due date:
//!       on time if any payment landed on or before the due date,
//!       otherwise late by (latest payment − due date) days
//!   - paid with no payments at all: on time
//!   - unpaid and past due: missed
//!
//! RULE: Full recompute from inputs. No state carries between calls.

use crate::{
    config::RiskConfig,
    model::{InvoiceRecord, LedgerPayment, PaymentPatternSummary},
};
use chrono::{DateTime, Duration, Utc};

pub struct PatternAnalyzer<'a> {
    config: &'a RiskConfig,
}

impl<'a> PatternAnalyzer<'a> {
    pub fn new(config: &'a RiskConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        customer_id: &str,
        invoices: &[InvoiceRecord],
        payments: &[LedgerPayment],
        now: DateTime<Utc>,
    ) -> PaymentPatternSummary {
        let period_start = now - Duration::days(self.config.analysis_lookback_days);

        let payments: Vec<&LedgerPayment> = payments
            .iter()
            .filter(|p| p.customer_id == customer_id && p.created_at >= period_start)
            .collect();
        let latest_payment = payments.iter().map(|p| p.created_at).max();
        let total_paid: f64 = payments.iter().map(|p| p.amount).sum();

        let mut missed = 0u32;
        let mut late = 0u32;
        let mut on_time = 0u32;
        let mut total_days_late = 0i64;

        for inv in invoices
            .iter()
            .filter(|i| i.customer_id == customer_id && i.created_at >= period_start)
        {
            if inv.is_paid() {
                let Some(due) = inv.due_at else { continue };
                match latest_payment {
                    None => on_time += 1,
                    Some(latest) => {
                        if payments.iter().any(|p| p.created_at <= due) {
                            on_time += 1;
                        } else {
                            late += 1;
                            total_days_late += (latest - due).num_days();
                        }
                    }
                }
            } else if inv.due_at.map(|due| due < now).unwrap_or(false) {
                missed += 1;
            }
        }

        let avg_days_late = (late > 0).then(|| total_days_late as f64 / late as f64);
        let avg_payment_amount = (!payments.is_empty()).then(|| total_paid / payments.len() as f64);

        let is_risky = missed >= self.config.missed_threshold
            || late >= self.config.late_threshold
            || avg_days_late
                .map(|d| d > self.config.avg_days_late_threshold)
                .unwrap_or(false);

        PaymentPatternSummary {
            customer_id:        customer_id.to_string(),
            missed_count:       missed,
            late_count:         late,
            on_time_count:      on_time,
            avg_days_late,
            avg_payment_amount,
            last_payment_at:    latest_payment,
            is_risky,
            period_start,
            period_end:         now,
            calculated_at:      now,
        }
    }
}
