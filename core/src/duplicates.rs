//! Duplicate payment detector.
//!
//! Two payments of one customer are duplicate candidates when their amounts
//! differ by less than a cent and the older one falls inside the look-back
//! window of the newer one. Recurring billing produces exactly this shape
//! legitimately, so a cluster is only ever a review flag.
//!
//! RULE: Each unordered pair is reported once per detection pass.
//! RULE: The detector is read-only over the payments it is handed.

use crate::{
    model::LedgerPayment,
    types::{CustomerId, AMOUNT_EPSILON},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub payment:    LedgerPayment,
    /// Whole days between the anchor and this match.
    pub days_apart: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub customer_id: CustomerId,
    pub anchor:      LedgerPayment,
    pub matches:     Vec<DuplicateMatch>,
    pub amount:      f64,
}

impl DuplicateCluster {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Anchor plus matches.
    pub fn group_size(&self) -> usize {
        self.matches.len() + 1
    }
}

/// Cluster counts for one window size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateSummary {
    pub window_days:        i64,
    pub customers_affected: usize,
    pub clusters:           usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector {
    window_days: i64,
}

impl DuplicateDetector {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    pub fn window_days(&self) -> i64 {
        self.window_days
    }

    fn window(&self) -> Duration {
        Duration::days(self.window_days)
    }

    /// Cluster every customer's same-amount payments.
    pub fn detect(&self, payments: &[LedgerPayment]) -> BTreeMap<CustomerId, Vec<DuplicateCluster>> {
        let mut by_customer: BTreeMap<&str, Vec<&LedgerPayment>> = BTreeMap::new();
        for p in payments {
            by_customer.entry(p.customer_id.as_str()).or_default().push(p);
        }

        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        let mut out: BTreeMap<CustomerId, Vec<DuplicateCluster>> = BTreeMap::new();

        for (customer_id, mut group) in by_customer {
            // Newest first; ids break timestamp ties so output is stable.
            group.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.payment_id.cmp(&a.payment_id))
            });

            for p in &group {
                let window_start = p.created_at - self.window();
                let mut matches = Vec::new();
                for o in &group {
                    if o.payment_id == p.payment_id {
                        continue;
                    }
                    if o.created_at >= p.created_at || o.created_at < window_start {
                        continue;
                    }
                    if (o.amount - p.amount).abs() >= AMOUNT_EPSILON {
                        continue;
                    }
                    if !seen_pairs.insert(pair_key(&p.payment_id, &o.payment_id)) {
                        continue;
                    }
                    matches.push(DuplicateMatch {
                        payment:    (*o).clone(),
                        days_apart: (p.created_at - o.created_at).num_days(),
                    });
                }
                if !matches.is_empty() {
                    out.entry(customer_id.to_string())
                        .or_default()
                        .push(DuplicateCluster {
                            customer_id: customer_id.to_string(),
                            anchor:      (*p).clone(),
                            matches,
                            amount:      p.amount,
                        });
                }
            }
        }
        out
    }

    /// The most recent same-amount payment for `customer_id` inside the
    /// window ending at `at`. Used right before posting.
    pub fn find_prior_match(
        &self,
        payments: &[LedgerPayment],
        customer_id: &str,
        amount: f64,
        at: DateTime<Utc>,
    ) -> Option<DuplicateMatch> {
        let window_start = at - self.window();
        payments
            .iter()
            .filter(|p| p.customer_id == customer_id)
            .filter(|p| p.created_at >= window_start && p.created_at <= at)
            .filter(|p| (p.amount - amount).abs() < AMOUNT_EPSILON)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.payment_id.cmp(&b.payment_id))
            })
            .map(|p| DuplicateMatch {
                payment:    p.clone(),
                days_apart: (at - p.created_at).num_days(),
            })
    }

    /// Counts at 1x, 3x and 6x the configured window.
    pub fn summarize(&self, payments: &[LedgerPayment]) -> Vec<DuplicateSummary> {
        [1, 3, 6]
            .into_iter()
            .map(|multiple| {
                let detector = DuplicateDetector::new(self.window_days * multiple);
                let clusters = detector.detect(payments);
                DuplicateSummary {
                    window_days:        detector.window_days,
                    customers_affected: clusters.len(),
                    clusters:           clusters.values().map(Vec::len).sum(),
                }
            })
            .collect()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
