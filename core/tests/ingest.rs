//! Integration tests for the ingest normaliser.
//!
//! Tests verify:
//! 1. Outgoing (negative) entries are discarded and never persisted
//! 2. Exclusion terms match case-insensitively in reference or remittance
//! 3. Re-ingesting the same (entry id, account) is a no-op
//! 4. Same (account, amount, value date) under a new id is a data-level duplicate
//! 5. The same entry id on a second account is a distinct transaction
//! 6. Malformed entries are skipped without aborting the batch
//! 7. Original reference/remittance text is preserved verbatim

use chrono::{DateTime, TimeZone, Utc};
use eftrecon_core::{
    bank::RawBankEntry,
    config::ReconConfig,
    event::{DiscardReason, ReconEvent},
    ingest::{IngestNormalizer, IngestOutcome},
    lifecycle::TxnStatus,
    store::ReconStore,
    types::{TxnKey, UNALLOCATED},
};

const ACC: &str = "62000000001";

fn build() -> ReconStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = ReconStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn entry(id: &str, amount: f64, date: &str, reference: &str, remittance: &str) -> RawBankEntry {
    RawBankEntry {
        entry_id:   Some(id.into()),
        amount:     Some(serde_json::json!(amount)),
        value_date: Some(date.into()),
        reference:  Some(reference.into()),
        remittance: Some(remittance.into()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: negative amounts never become transactions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn outgoing_entry_is_discarded() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);

    let out = ingest
        .ingest_entry(ACC, &entry("E1", -250.0, "2026-03-09", "CID 12", ""), now())
        .unwrap();

    assert_eq!(out, IngestOutcome::Discarded(DiscardReason::Outgoing));
    assert!(store.get_transaction(&TxnKey::new("E1", ACC)).unwrap().is_none());
    assert_eq!(store.transaction_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: exclusion terms
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn exclusion_terms_match_either_field_case_insensitively() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);

    let a = ingest
        .ingest_entry(ACC, &entry("E1", 99.0, "2026-03-09", "app transfer from subscriptions", ""), now())
        .unwrap();
    let b = ingest
        .ingest_entry(ACC, &entry("E2", 99.0, "2026-03-08", "CID 5", "Monthly Subscription"), now())
        .unwrap();

    assert_eq!(a, IngestOutcome::Discarded(DiscardReason::Excluded));
    assert_eq!(b, IngestOutcome::Discarded(DiscardReason::Excluded));
    assert_eq!(store.transaction_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: same pair twice
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reingesting_same_entry_is_a_noop() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);
    let raw = entry("E1", 500.0, "2026-03-09", "CID 7", "");

    let first = ingest.ingest_entry(ACC, &raw, now()).unwrap();
    let second = ingest.ingest_entry(ACC, &raw, now()).unwrap();

    assert!(matches!(first, IngestOutcome::Inserted(_)));
    assert_eq!(second, IngestOutcome::Discarded(DiscardReason::DuplicateEntry));
    assert_eq!(store.transaction_count().unwrap(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: triple fallback
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn same_account_amount_and_date_with_new_id_is_discarded() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);

    ingest
        .ingest_entry(ACC, &entry("E1", 500.0, "2026-03-09", "CID 7", ""), now())
        .unwrap();
    // The id check alone would let this through.
    let out = ingest
        .ingest_entry(ACC, &entry("E1-REFETCH", 500.0, "2026-03-09", "CID 7", ""), now())
        .unwrap();

    assert_eq!(out, IngestOutcome::Discarded(DiscardReason::DuplicateTriple));
    assert!(store.get_transaction(&TxnKey::new("E1-REFETCH", ACC)).unwrap().is_none());

    // A different date is a different payment.
    let other_day = ingest
        .ingest_entry(ACC, &entry("E2", 500.0, "2026-03-10", "CID 7", ""), now())
        .unwrap();
    assert!(matches!(other_day, IngestOutcome::Inserted(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: entry ids are per account
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn same_entry_id_on_two_accounts_is_two_transactions() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);

    ingest
        .ingest_entry("62000000001", &entry("E1", 100.0, "2026-03-09", "CID 1", ""), now())
        .unwrap();
    let out = ingest
        .ingest_entry("62000000002", &entry("E1", 100.0, "2026-03-09", "CID 1", ""), now())
        .unwrap();

    assert!(matches!(out, IngestOutcome::Inserted(_)));
    assert_eq!(store.transactions_by_entry_id("E1").unwrap().len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: malformed entries
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn malformed_entries_are_skipped_and_batch_continues() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);

    let no_id = RawBankEntry { entry_id: None, ..entry("x", 10.0, "2026-03-09", "", "") };
    let bad_amount = RawBankEntry {
        amount: Some(serde_json::json!("twelve rand")),
        ..entry("E2", 0.0, "2026-03-09", "", "")
    };
    let bad_date = entry("E3", 10.0, "09/03/2026", "", "");
    let good = entry("E4", 10.0, "2026-03-09", "CID 4", "");

    let events = ingest.ingest_batch(ACC, &[no_id, bad_amount, bad_date, good], now());

    let malformed = events
        .iter()
        .filter(|e| matches!(e, ReconEvent::EntryDiscarded { reason: DiscardReason::Malformed, .. }))
        .count();
    assert_eq!(malformed, 3, "three malformed entries expected, events: {events:?}");
    assert_eq!(store.transaction_count().unwrap(), 1);
    assert!(store.get_transaction(&TxnKey::new("E4", ACC)).unwrap().is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: new records start pending and unallocated with the original text
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn inserted_record_is_pending_with_original_text() {
    let store = build();
    let config = ReconConfig::default_test();
    let ingest = IngestNormalizer::new(&config.ingest, &store);

    let raw = RawBankEntry {
        amount: Some(serde_json::json!("  1234.50 ")),
        ..entry("E1", 0.0, "2026-03-09", "  Mixed Case REF ", "remit")
    };
    ingest.ingest_entry(ACC, &raw, now()).unwrap();

    let t = store.get_transaction(&TxnKey::new("E1", ACC)).unwrap().unwrap();
    assert_eq!(t.status, TxnStatus::Pending);
    assert_eq!(t.customer_id, UNALLOCATED);
    assert_eq!(t.original_customer_id, UNALLOCATED);
    assert!((t.amount - 1234.50).abs() < 1e-9);
    assert_eq!(t.original_reference, "  Mixed Case REF ");
    assert_eq!(t.original_remittance, "remit");
    assert_eq!(t.ingested_at, now());
}
