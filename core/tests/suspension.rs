//! Integration tests for the suspension decision engine and its actions.
//!
//! Tests verify:
//! 1. VIP short-circuits every other rule
//! 2. Grace period blocks suspension unless overridden
//! 3. Flagged overdue with unpaid past-due invoices suspends
//! 4. Risky pattern suspends with missed-count phrasing preferred
//! 5. Risk analysis lists candidates from the ledger snapshot
//! 6. Suspend is refused without policy agreement or override
//! 7. At most one active suspension per (customer, service)
//! 8. Reactivation closes the record and restores the service
//! 9. A ledger refusal leaves no suspension behind

use chrono::{DateTime, Duration, TimeZone, Utc};
use eftrecon_core::{
    command::{CommandOutcome, OperatorCommand},
    config::ReconConfig,
    engine::ReconEngine,
    error::ReconError,
    ledger::{InMemoryLedger, ServiceAction},
    model::{
        CustomerAccount, InvoiceRecord, InvoiceStatus, PaymentPatternSummary, ServiceStatus,
    },
    suspension::{DecisionRule, SuspendOutcome, SuspensionManager, SuspensionPolicy},
};
use serde_json::json;

fn at_day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

fn customer(id: &str) -> CustomerAccount {
    CustomerAccount {
        customer_id:         id.into(),
        display_name:        format!("Customer {id}"),
        is_vip:              false,
        grace_day:           None,
        is_archived:         false,
        is_active:           true,
        is_lead:             false,
        has_overdue_invoice: false,
        balance:             0.0,
        outstanding:         0.0,
        credit:              0.0,
        payment_references:  vec![],
        refreshed_at:        at_day(10),
    }
}

fn pattern(id: &str, missed: u32, late: u32, avg_days_late: Option<f64>) -> PaymentPatternSummary {
    PaymentPatternSummary {
        customer_id:        id.into(),
        missed_count:       missed,
        late_count:         late,
        on_time_count:      0,
        avg_days_late,
        avg_payment_amount: None,
        last_payment_at:    None,
        is_risky:           missed >= 2 || late >= 3 || avg_days_late.map(|d| d > 30.0).unwrap_or(false),
        period_start:       at_day(10) - Duration::days(180),
        period_end:         at_day(10),
        calculated_at:      at_day(10),
    }
}

fn overdue_invoice(id: &str, customer_id: &str) -> InvoiceRecord {
    InvoiceRecord {
        invoice_id:  id.into(),
        customer_id: customer_id.into(),
        number:      None,
        total:       349.0,
        remaining:   Some(349.0),
        created_at:  at_day(1) - Duration::days(40),
        due_at:      Some(at_day(1) - Duration::days(25)),
        status:      InvoiceStatus::Unpaid,
    }
}

/// Customer 7: overdue, two missed invoices. 8: same but VIP. 9: same with
/// a grace day of the 5th.
fn ledger() -> InMemoryLedger {
    let invoices = |cid: u32| {
        vec![
            json!({"id": cid * 10 + 1, "clientId": cid, "total": 349.0, "amountToPay": 349.0,
                   "createdDate": "2026-01-01", "dueDate": "2026-01-15", "status": 1}),
            json!({"id": cid * 10 + 2, "clientId": cid, "total": 349.0, "amountToPay": 349.0,
                   "createdDate": "2026-02-01", "dueDate": "2026-02-15", "status": 1}),
        ]
    };
    let mut all_invoices = invoices(7);
    all_invoices.extend(invoices(8));
    all_invoices.extend(invoices(9));

    serde_json::from_value(json!({
        "clients": [
            {"id": 7, "firstName": "Ann", "lastName": "Arrears", "hasOverdueInvoice": true},
            {"id": 8, "companyName": "Big Client", "hasOverdueInvoice": true,
             "attributes": [{"key": "vip", "value": "yes"}]},
            {"id": 9, "firstName": "Gus", "lastName": "Grace", "hasOverdueInvoice": true,
             "attributes": [{"key": "gracePaymentDate", "value": "5"}]}
        ],
        "services": [
            {"id": 701, "clientId": 7, "name": "Fibre 50", "status": 1, "price": 349.0},
            {"id": 801, "clientId": 8, "name": "Fibre 50", "status": 1, "price": 349.0},
            {"id": 901, "clientId": 9, "name": "Fibre 50", "status": 1, "price": 349.0}
        ],
        "invoices": all_invoices
    }))
    .expect("ledger fixture")
}

fn suspend_cmd(customer_id: &str, service_id: &str, grace_override: bool) -> OperatorCommand {
    OperatorCommand::Suspend {
        customer_id:    customer_id.into(),
        service_id:     service_id.into(),
        actor:          "ops.lead".into(),
        note:           Some("arrears".into()),
        grace_override,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1–4: pure rule chain
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn vip_is_never_suspended() {
    let config = ReconConfig::default_test();
    let mut c = customer("8");
    c.is_vip = true;
    c.has_overdue_invoice = true;
    let p = pattern("8", 3, 0, None);
    let invoices = vec![overdue_invoice("1", "8")];

    let d = SuspensionPolicy::new(&config.risk).decide(&c, Some(&p), &invoices, true, at_day(10));
    assert!(!d.should_suspend);
    assert_eq!(d.rule, DecisionRule::Vip);
    assert!(d.reason.contains("VIP"), "reason: {}", d.reason);
}

#[test]
fn grace_period_blocks_unless_overridden() {
    let config = ReconConfig::default_test();
    let mut c = customer("9");
    c.grace_day = Some(5);
    c.has_overdue_invoice = true;
    let invoices = vec![overdue_invoice("1", "9")];
    let policy = SuspensionPolicy::new(&config.risk);

    let d = policy.decide(&c, None, &invoices, false, at_day(3));
    assert!(!d.should_suspend);
    assert_eq!(d.rule, DecisionRule::GracePeriod);
    assert!(d.reason.contains("5th"), "reason cites the cutoff: {}", d.reason);

    let overridden = policy.decide(&c, None, &invoices, true, at_day(3));
    assert!(overridden.should_suspend);
    assert_eq!(overridden.rule, DecisionRule::OverdueInvoices);

    let on_grace_day = policy.decide(&c, None, &invoices, false, at_day(5));
    assert!(!on_grace_day.should_suspend, "the grace day itself is still protected");
    assert_eq!(on_grace_day.rule, DecisionRule::GracePeriod);

    let after_grace = policy.decide(&c, None, &invoices, false, at_day(6));
    assert!(after_grace.should_suspend);
}

#[test]
fn overdue_flag_needs_an_actual_past_due_invoice() {
    let config = ReconConfig::default_test();
    let policy = SuspensionPolicy::new(&config.risk);
    let mut c = customer("7");
    c.has_overdue_invoice = true;

    let d = policy.decide(&c, None, &[overdue_invoice("1", "7"), overdue_invoice("2", "7")], false, at_day(10));
    assert!(d.should_suspend);
    assert_eq!(d.reason, "2 overdue invoices past due");

    let mut paid = overdue_invoice("1", "7");
    paid.remaining = Some(0.0);
    let d = policy.decide(&c, None, &[paid], false, at_day(10));
    assert!(!d.should_suspend);
    assert_eq!(d.reason, "no suspension criteria met");
}

#[test]
fn risky_pattern_prefers_missed_phrasing() {
    let config = ReconConfig::default_test();
    let policy = SuspensionPolicy::new(&config.risk);
    let c = customer("7");

    let both = pattern("7", 2, 4, None);
    let d = policy.decide(&c, Some(&both), &[], false, at_day(10));
    assert!(d.should_suspend);
    assert_eq!(d.reason, "2 missed payments");

    let late_only = pattern("7", 0, 3, None);
    let d = policy.decide(&c, Some(&late_only), &[], false, at_day(10));
    assert_eq!(d.reason, "3 late payments");

    // Risky on average lateness alone does not meet rule 4.
    let slow = pattern("7", 1, 1, Some(45.0));
    assert!(slow.is_risky);
    let d = policy.decide(&c, Some(&slow), &[], false, at_day(10));
    assert!(!d.should_suspend);
    assert_eq!(d.rule, DecisionRule::NoCriteria);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: candidates from risk analysis
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn risk_analysis_lists_candidates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = ReconEngine::build_test(at_day(10)).unwrap();
    let ledger = ledger();

    let report = engine.analyze_risk(&ledger).unwrap();
    assert_eq!(report.analyzed, 3);
    assert_eq!(report.risky, 3, "two missed invoices each");
    assert_eq!(report.billing.errors, 0);

    let ids: Vec<&str> = report.candidates.iter().map(|c| c.customer_id.as_str()).collect();
    assert_eq!(ids, vec!["7", "9"], "VIP 8 is never a candidate");
    assert_eq!(report.candidates[0].service_ids, vec!["701".to_string()]);

    let p = engine.store.get_payment_pattern("7").unwrap().expect("pattern persisted");
    assert_eq!(p.missed_count, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: refusal and override
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn suspend_refused_without_policy_or_override() {
    let mut engine = ReconEngine::build_test(at_day(10)).unwrap();
    let mut ledger = ledger();
    engine.analyze_risk(&ledger).unwrap();

    let err = engine.apply_command(&suspend_cmd("8", "801", false), &mut ledger).unwrap_err();
    assert!(matches!(err, ReconError::SuspensionNotAllowed { .. }), "got {err:?}");
    assert!(ledger.status_updates.is_empty());

    let out = engine.apply_command(&suspend_cmd("8", "801", true), &mut ledger).unwrap();
    match out {
        CommandOutcome::Suspension(SuspendOutcome::Suspended(s)) => {
            assert!(s.reason.starts_with("manual override"), "reason: {}", s.reason);
        }
        other => panic!("expected suspension, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7–8: one active record per pair, then reactivation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn suspend_once_then_reactivate() {
    let mut engine = ReconEngine::build_test(at_day(10)).unwrap();
    let mut ledger = ledger();
    engine.analyze_risk(&ledger).unwrap();

    let first = engine.apply_command(&suspend_cmd("7", "701", false), &mut ledger).unwrap();
    let CommandOutcome::Suspension(SuspendOutcome::Suspended(record)) = first else {
        panic!("expected a new suspension, got {first:?}");
    };
    assert!(record.is_active);
    assert_eq!(record.reason, "2 overdue invoices past due");
    assert_eq!(record.suspended_by, "ops.lead");
    assert_eq!(ledger.status_updates, vec![("701".to_string(), ServiceAction::Suspend)]);
    assert_eq!(
        engine.store.get_service("701").unwrap().unwrap().status,
        ServiceStatus::Suspended
    );

    let second = engine.apply_command(&suspend_cmd("7", "701", false), &mut ledger).unwrap();
    assert!(
        matches!(&second, CommandOutcome::Suspension(SuspendOutcome::AlreadySuspended(s)) if s.suspension_id == record.suspension_id),
        "second suspend must be a no-op, got {second:?}"
    );
    assert_eq!(engine.store.suspension_count(true).unwrap(), 1);
    assert_eq!(ledger.status_updates.len(), 1, "ledger called once");

    let manager = SuspensionManager::new(&engine.store, &engine.config().risk);
    let ids: Vec<String> = manager
        .candidates(at_day(10))
        .unwrap()
        .into_iter()
        .map(|c| c.customer_id)
        .collect();
    assert!(!ids.contains(&"7".to_string()), "suspended service is no longer a candidate");

    let reactivate = OperatorCommand::Reactivate {
        suspension_id: record.suspension_id,
        actor:         "ops.lead".into(),
        note:          Some("paid in full".into()),
    };
    let out = engine.apply_command(&reactivate, &mut ledger).unwrap();
    let CommandOutcome::Reactivated(closed) = out else {
        panic!("expected reactivation, got {out:?}");
    };
    assert!(!closed.is_active);
    assert_eq!(closed.reactivated_by.as_deref(), Some("ops.lead"));
    assert!(closed.note.unwrap_or_default().contains("[Reactivated] paid in full"));
    assert_eq!(
        engine.store.get_service("701").unwrap().unwrap().status,
        ServiceStatus::Active
    );

    // Reactivating twice fails; a fresh suspension is allowed again.
    assert!(matches!(
        engine.apply_command(&reactivate, &mut ledger),
        Err(ReconError::SuspensionNotFound { .. })
    ));
    let again = engine.apply_command(&suspend_cmd("7", "701", false), &mut ledger).unwrap();
    assert!(matches!(again, CommandOutcome::Suspension(SuspendOutcome::Suspended(_))));

    let stats = SuspensionManager::new(&engine.store, &engine.config().risk)
        .stats(at_day(10))
        .unwrap();
    assert_eq!(stats.active_suspensions, 1);
    assert_eq!(stats.resolved_suspensions, 1);
    assert_eq!(stats.recent_suspensions, 2);
    assert_eq!(stats.vip_customers, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 9: ledger refusal
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn ledger_refusal_leaves_no_suspension() {
    let mut engine = ReconEngine::build_test(at_day(10)).unwrap();
    let mut ledger = ledger();
    engine.analyze_risk(&ledger).unwrap();
    ledger.faults.failing_service_ids.insert("701".into());

    let err = engine.apply_command(&suspend_cmd("7", "701", false), &mut ledger).unwrap_err();
    assert!(matches!(err, ReconError::Gateway(_)), "got {err:?}");
    assert!(engine.store.active_suspension_for("7", "701").unwrap().is_none());
    assert_eq!(engine.store.suspension_count(true).unwrap(), 0);
}
