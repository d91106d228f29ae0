//! Integration tests for the read-only reports.
//!
//! Tests verify:
//! 1. Corrected references group by the customer they were corrected to
//! 2. A ledger payment that disagrees with the bank amount is reported
//! 3. Duplicate clusters over cached ledger payments, with wider summaries
//! 4. The same entry id posted on two accounts is never cross-compared

use chrono::{DateTime, TimeZone, Utc};
use eftrecon_core::{
    bank::{RawBankEntry, StaticBankFeed},
    command::OperatorCommand,
    config::ReconConfig,
    engine::ReconEngine,
    ledger::InMemoryLedger,
    reports::{amount_mismatches, duplicate_report, incorrect_references},
    types::{TieBreak, TxnKey},
};
use serde_json::json;

const ACC: &str = "62000000001";
const ACC2: &str = "62000000002";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn build() -> ReconEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    ReconEngine::build_test(now()).expect("build_test failed")
}

fn entry(id: &str, amount: f64, reference: &str) -> RawBankEntry {
    RawBankEntry {
        entry_id:   Some(id.into()),
        amount:     Some(json!(amount)),
        value_date: Some("2026-03-09".into()),
        reference:  Some(reference.into()),
        remittance: None,
    }
}

fn ledger(payments: serde_json::Value) -> InMemoryLedger {
    serde_json::from_value(json!({
        "clients": [
            {"id": 1001, "firstName": "Thandi", "lastName": "Mokoena"},
            {"id": 1004, "firstName": "Pieter", "lastName": "van Wyk"},
            {"id": 1005, "firstName": "Lerato", "lastName": "Dlamini", "isArchived": true}
        ],
        "payments": payments
    }))
    .expect("ledger fixture")
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: incorrect references
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn corrected_references_grouped_by_new_customer() {
    let mut engine = build();
    let mut ledger = ledger(json!([]));
    let feed = StaticBankFeed::new().with_entries(
        ACC,
        vec![
            entry("E1", 349.0, "CID 1005"),
            entry("E2", 350.0, "CID 1005"),
            entry("E3", 120.0, "NO REFERENCE"),
            entry("E4", 99.0, "CID 1004"),
        ],
    );
    engine.run(&feed, &mut ledger).unwrap();

    for id in ["E1", "E2"] {
        engine
            .resolve_failure(&TxnKey::new(id, ACC), Some("1001"), "ops.anna")
            .unwrap();
    }
    let assign = OperatorCommand::AssignCustomer {
        entry_id:    "E3".into(),
        account:     None,
        customer_id: "1004".into(),
        actor:       "ops.anna".into(),
        tie_break:   TieBreak::Strict,
    };
    engine.apply_command(&assign, &mut ledger).unwrap();

    let report = incorrect_references(&engine.store).unwrap();
    let summary: Vec<(&str, usize)> =
        report.iter().map(|r| (r.customer_id.as_str(), r.count())).collect();
    assert_eq!(summary, vec![("1001", 2), ("1004", 1)]);
    assert_eq!(report[0].transactions[0].original_customer_id, "1005");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: amount mismatch
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn synced_payment_with_different_amount_is_reported() {
    let mut engine = build();
    let mut ledger = ledger(json!([
        {"id": 7200, "clientId": 1001, "amount": 450.0,
         "createdDate": "2026-03-09T10:00:00+0000", "providerPaymentId": "E5"},
        {"id": 7201, "clientId": 1004, "amount": 99.0,
         "createdDate": "2026-03-09T10:00:00+0000", "providerPaymentId": "E6"}
    ]));
    let feed = StaticBankFeed::new().with_entries(
        ACC,
        vec![entry("E5", 500.0, "CID 1001"), entry("E6", 99.0, "CID 1004")],
    );
    let report = engine.run(&feed, &mut ledger).unwrap();
    assert_eq!(report.summary.synced, 2);
    assert!(ledger.posted.is_empty());

    let mismatches = amount_mismatches(&engine.store).unwrap();
    assert_eq!(mismatches.len(), 1);
    let m = &mismatches[0];
    assert_eq!(m.key, TxnKey::new("E5", ACC));
    assert_eq!(m.ledger_payment_id, "7200");
    assert_eq!(m.bank_amount, 500.0);
    assert_eq!(m.difference(), -50.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: duplicate report
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn duplicate_report_covers_cached_payments() {
    let mut engine = build();
    let mut ledger = ledger(json!([
        {"id": 7001, "clientId": 1004, "amount": 499.0, "createdDate": "2026-03-04T09:15:00+0000"},
        {"id": 7002, "clientId": 1004, "amount": 499.0, "createdDate": "2026-03-01T09:15:00+0000"},
        {"id": 7003, "clientId": 1001, "amount": 200.0, "createdDate": "2026-02-01T09:15:00+0000"},
        {"id": 7004, "clientId": 1001, "amount": 200.0, "createdDate": "2026-02-15T09:15:00+0000"}
    ]));
    engine.run(&StaticBankFeed::new(), &mut ledger).unwrap();

    let report = duplicate_report(&engine.store, 6).unwrap();
    assert_eq!(report.window_days, 6);
    assert_eq!(report.total_clusters(), 1);
    let cluster = &report.clusters["1004"][0];
    assert_eq!(cluster.anchor.payment_id, "7001");
    assert_eq!(cluster.matches[0].days_apart, 3);
    assert_eq!(report.total_amount(), 499.0);

    // 14 days apart only shows up at the 3x and 6x summaries.
    let customers: Vec<usize> = report.summaries.iter().map(|s| s.customers_affected).collect();
    assert_eq!(customers, vec![1, 2, 2]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: shared entry id across accounts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn shared_entry_id_compares_only_its_own_payment() {
    let mut engine = build();
    let mut config = ReconConfig::default_test();
    config.ingest.accounts.push(ACC2.into());
    engine.set_config(config).unwrap();
    let mut ledger = ledger(json!([]));
    let feed = StaticBankFeed::new()
        .with_entries(ACC, vec![entry("E1", 100.0, "CID 1001")])
        .with_entries(ACC2, vec![entry("E1", 250.0, "CID 1004")]);

    let report = engine.run(&feed, &mut ledger).unwrap();
    assert_eq!(report.summary.posted, 2);
    assert_eq!(engine.store.ledger_payments_by_provider_id("E1").unwrap().len(), 2);

    let mismatches = amount_mismatches(&engine.store).unwrap();
    assert!(mismatches.is_empty(), "spurious mismatches: {mismatches:?}");
}
