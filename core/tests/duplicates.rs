//! Integration tests for the duplicate payment detector.
//!
//! Tests verify:
//! 1. Two same-amount payments inside the window form exactly one cluster
//! 2. Payments outside the window never cluster; the window edge is inclusive
//! 3. Each unordered pair is reported once regardless of input order
//! 4. Amount equality uses a one-cent epsilon
//! 5. Customers are never mixed
//! 6. Pre-post lookup finds the most recent match inside the window
//! 7. Summary counts grow with the window multiple

use chrono::{DateTime, Duration, TimeZone, Utc};
use eftrecon_core::{duplicates::DuplicateDetector, model::LedgerPayment};

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap() + Duration::days(n)
}

fn payment(id: &str, customer: &str, amount: f64, at: DateTime<Utc>) -> LedgerPayment {
    LedgerPayment {
        payment_id:          id.into(),
        customer_id:         customer.into(),
        amount,
        created_at:          at,
        method:              Some("EFT".into()),
        note:                None,
        provider_payment_id: None,
        currency:            "ZAR".into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: day 0 and day 4 with a 6-day window
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pair_inside_window_is_one_cluster() {
    let payments = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "7", 500.00, day(4)),
    ];
    let clusters = DuplicateDetector::new(6).detect(&payments);

    let for_7 = clusters.get("7").expect("customer 7 has a cluster");
    assert_eq!(for_7.len(), 1);
    let c = &for_7[0];
    assert_eq!(c.anchor.payment_id, "P2", "newest payment anchors the cluster");
    assert_eq!(c.match_count(), 1);
    assert_eq!(c.group_size(), 2);
    assert_eq!(c.matches[0].payment.payment_id, "P1");
    assert_eq!(c.matches[0].days_apart, 4);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: day 0 and day 9 with a 6-day window
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pair_outside_window_is_not_a_cluster() {
    let payments = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "7", 500.00, day(9)),
    ];
    assert!(DuplicateDetector::new(6).detect(&payments).is_empty());
}

#[test]
fn pair_exactly_at_window_edge_clusters() {
    let payments = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "7", 500.00, day(6)),
    ];
    let clusters = DuplicateDetector::new(6).detect(&payments);
    assert_eq!(clusters["7"].len(), 1);
    assert_eq!(clusters["7"][0].matches[0].days_apart, 6);

    let one_second_late = vec![
        payment("P1", "7", 500.00, day(0) - Duration::seconds(1)),
        payment("P2", "7", 500.00, day(6)),
    ];
    assert!(DuplicateDetector::new(6).detect(&one_second_late).is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: pair counted once whichever way the input is ordered
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn each_pair_reported_once_in_any_order() {
    let forward = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "7", 500.00, day(2)),
        payment("P3", "7", 500.00, day(4)),
    ];
    let mut reversed = forward.clone();
    reversed.reverse();

    let detector = DuplicateDetector::new(6);
    for input in [forward, reversed] {
        let clusters = detector.detect(&input);
        let pairs: usize = clusters["7"].iter().map(|c| c.match_count()).sum();
        // P3-P2, P3-P1, P2-P1: three distinct pairs, none repeated.
        assert_eq!(pairs, 3, "clusters: {clusters:?}");
        assert_eq!(clusters["7"][0].anchor.payment_id, "P3");
        assert_eq!(clusters["7"][0].match_count(), 2);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: epsilon
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rounding_noise_still_matches_but_two_cents_do_not() {
    let detector = DuplicateDetector::new(6);

    let noisy = vec![
        payment("P1", "7", 0.1 + 0.2, day(0)),
        payment("P2", "7", 0.3, day(1)),
    ];
    assert_eq!(detector.detect(&noisy).len(), 1);

    let two_cents_apart = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "7", 500.02, day(1)),
    ];
    assert!(detector.detect(&two_cents_apart).is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: customers are independent
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn different_customers_never_cluster() {
    let payments = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "8", 500.00, day(1)),
    ];
    assert!(DuplicateDetector::new(6).detect(&payments).is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: pre-post lookup
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn prior_match_picks_most_recent_inside_window() {
    let payments = vec![
        payment("OLD", "7", 499.00, day(-20)),
        payment("P1", "7", 499.00, day(-10)),
        payment("P2", "7", 499.00, day(-3)),
        payment("OTHER", "8", 499.00, day(-1)),
        payment("DIFF", "7", 299.00, day(-1)),
    ];
    let detector = DuplicateDetector::new(15);

    let m = detector
        .find_prior_match(&payments, "7", 499.00, day(0))
        .expect("a match inside 15 days");
    assert_eq!(m.payment.payment_id, "P2");
    assert_eq!(m.days_apart, 3);

    assert!(detector.find_prior_match(&payments, "7", 100.00, day(0)).is_none());
    assert!(DuplicateDetector::new(2)
        .find_prior_match(&payments, "7", 499.00, day(0))
        .is_none());
}

#[test]
fn prior_match_at_window_start_still_counts() {
    let detector = DuplicateDetector::new(15);
    let edge = vec![payment("EDGE", "7", 499.00, day(-15))];
    let m = detector
        .find_prior_match(&edge, "7", 499.00, day(0))
        .expect("payment exactly 15 days back is inside the window");
    assert_eq!(m.days_apart, 15);

    let past_edge = vec![payment("OLD", "7", 499.00, day(-15) - Duration::seconds(1))];
    assert!(detector.find_prior_match(&past_edge, "7", 499.00, day(0)).is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: summary multiples
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn summary_reports_wider_windows() {
    let payments = vec![
        payment("P1", "7", 500.00, day(0)),
        payment("P2", "7", 500.00, day(10)),
        payment("Q1", "8", 200.00, day(0)),
        payment("Q2", "8", 200.00, day(3)),
    ];
    let summaries = DuplicateDetector::new(6).summarize(&payments);

    let windows: Vec<i64> = summaries.iter().map(|s| s.window_days).collect();
    assert_eq!(windows, vec![6, 18, 36]);
    assert_eq!(summaries[0].customers_affected, 1);
    assert_eq!(summaries[1].customers_affected, 2);
    assert_eq!(summaries[2].clusters, 2);
}
