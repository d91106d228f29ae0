//! Integration tests for the identity resolver.
//!
//! Tests verify:
//! 1. Marker in the reference resolves to the digit run
//! 2. Remittance marker is used when the reference has none
//! 3. Whole-text mapping lookup: reference first, then remittance
//! 4. Resolution moves the record to ready_to_post and writes one audit entry
//! 5. Re-running resolution is a no-op (no identifier change, no new audit)
//! 6. Unresolvable records stay pending and unallocated
//! 7. Mappings are loaded from the ledger snapshot in the store

use chrono::{DateTime, TimeZone, Utc};
use eftrecon_core::{
    bank::RawBankEntry,
    config::{IdentityConfig, ReconConfig},
    event::{ReconEvent, ResolutionMethod},
    identity::{IdentifierMap, IdentityResolver},
    ingest::{IngestNormalizer, IngestOutcome},
    lifecycle::TxnStatus,
    model::{AuditAction, CustomerAccount, TransactionRecord},
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

fn resolver(pairs: &[(&str, &str)]) -> IdentityResolver {
    let map = IdentifierMap::from_pairs(pairs.iter().map(|(t, c)| (t.to_string(), c.to_string())));
    IdentityResolver::new(&IdentityConfig { marker: "CID".into() }, map).unwrap()
}

fn ingest(store: &ReconStore, id: &str, reference: &str, remittance: &str) -> TransactionRecord {
    let config = ReconConfig::default_test();
    let raw = RawBankEntry {
        entry_id:   Some(id.into()),
        amount:     Some(serde_json::json!(500.0)),
        value_date: Some("2026-03-09".into()),
        reference:  Some(reference.into()),
        remittance: Some(remittance.into()),
    };
    match IngestNormalizer::new(&config.ingest, store).ingest_entry(ACC, &raw, now()).unwrap() {
        IngestOutcome::Inserted(t) => t,
        other => panic!("expected insert, got {other:?}"),
    }
}

fn customer(id: &str, references: &[&str]) -> CustomerAccount {
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
        payment_references:  references.iter().map(|r| r.to_string()).collect(),
        refreshed_at:        now(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1–3: resolution order
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reference_marker_resolves_digit_run() {
    let r = resolver(&[]);
    assert_eq!(
        r.resolve_text("PAYMENT CID 4821 THANKS", ""),
        Some(("4821".to_string(), ResolutionMethod::ReferenceMarker))
    );
}

#[test]
fn remittance_marker_used_when_reference_has_none() {
    let r = resolver(&[("CID 77", "999")]);
    assert_eq!(
        r.resolve_text("INTERNET", "for cid:1003"),
        Some(("1003".to_string(), ResolutionMethod::RemittanceMarker))
    );
}

#[test]
fn mapping_lookup_on_whole_text() {
    let r = resolver(&[("REF99", "310"), ("JOHN SMITH", "55")]);

    assert_eq!(
        r.resolve_text("NO MARKER HERE", "REF99"),
        Some(("310".to_string(), ResolutionMethod::RemittanceMapping))
    );
    assert_eq!(
        r.resolve_text("  john smith ", "REF99"),
        Some(("55".to_string(), ResolutionMethod::ReferenceMapping)),
        "reference mapping wins over remittance mapping"
    );
    // Substrings of a mapping do not count.
    assert_eq!(r.resolve_text("REF999", "PAY REF99"), None);
    // A marker anywhere wins over any mapping.
    assert_eq!(
        r.resolve_text("REF99", "CID 12").map(|(c, _)| c),
        Some("12".to_string())
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: apply writes the identifier, the audit and the transition
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn apply_resolves_and_advances_record() {
    let store = build();
    let record = ingest(&store, "E1", "PAYMENT CID 4821 THANKS", "");
    let r = resolver(&[]);

    let event = r.apply(&store, &record, "system", now()).unwrap();
    assert!(
        matches!(&event, Some(ReconEvent::IdentityResolved { customer_id, .. }) if customer_id == "4821"),
        "unexpected event {event:?}"
    );

    let t = store.get_transaction(&record.key()).unwrap().unwrap();
    assert_eq!(t.customer_id, "4821");
    assert_eq!(t.original_customer_id, "4821");
    assert_eq!(t.status, TxnStatus::ReadyToPost);

    let audit = store.audit_for(&record.key()).unwrap();
    let identity: Vec<_> = audit
        .iter()
        .filter(|a| a.action == AuditAction::IdentityResolved.as_str())
        .collect();
    assert_eq!(identity.len(), 1);
    assert_eq!(identity[0].old_value.as_deref(), Some(UNALLOCATED));
    assert_eq!(identity[0].new_value.as_deref(), Some("4821"));
    assert!(identity[0].actor.ends_with("reference_marker"), "actor records method: {}", identity[0].actor);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: idempotent
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn resolving_twice_is_a_noop() {
    let store = build();
    let record = ingest(&store, "E1", "CID 4821", "");
    let r = resolver(&[]);

    r.apply(&store, &record, "system", now()).unwrap();
    let audits_after_first = store.audit_count().unwrap();

    // Stale copy of the record and a fresh copy: neither does anything.
    let again_stale = r.apply(&store, &record, "system", now()).unwrap();
    let fresh = store.get_transaction(&record.key()).unwrap().unwrap();
    let again_fresh = r.apply(&store, &fresh, "system", now()).unwrap();

    assert!(again_stale.is_none());
    assert!(again_fresh.is_none());
    assert_eq!(store.audit_count().unwrap(), audits_after_first);
    assert_eq!(store.get_transaction(&record.key()).unwrap().unwrap().customer_id, "4821");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: unresolved stays put
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unresolved_record_stays_pending() {
    let store = build();
    let record = ingest(&store, "E1", "ACIDIC 123", "THANK YOU");
    let r = resolver(&[]);

    let event = r.apply(&store, &record, "system", now()).unwrap();
    assert!(matches!(event, Some(ReconEvent::IdentityUnresolved { .. })));

    let t = store.get_transaction(&TxnKey::new("E1", ACC)).unwrap().unwrap();
    assert_eq!(t.status, TxnStatus::Pending);
    assert_eq!(t.customer_id, UNALLOCATED);
    assert_eq!(store.audit_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: mappings from the snapshot
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn mappings_load_from_snapshot_and_shared_text_is_ambiguous() {
    let store = build();
    store.upsert_customer(&customer("310", &["REF99"])).unwrap();
    store.upsert_customer(&customer("411", &["FAMILY ACCOUNT"])).unwrap();
    store.upsert_customer(&customer("412", &["family account"])).unwrap();

    let map = IdentifierMap::load(&store).unwrap();
    assert_eq!(map.lookup("ref99").map(String::as_str), Some("310"));
    assert_eq!(map.lookup("Family Account"), None, "shared mapping must not resolve");

    let record = ingest(&store, "E1", "", "REF99");
    let r = IdentityResolver::new(&IdentityConfig { marker: "CID".into() }, map).unwrap();
    r.apply(&store, &record, "system", now()).unwrap();
    assert_eq!(store.get_transaction(&record.key()).unwrap().unwrap().customer_id, "310");
}
