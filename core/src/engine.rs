//! The reconciliation engine — one batch run over the bank feed and ledger.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Ledger snapshot   customers, identifier mappings, payments
//!   2. Ingest            every configured account
//!   3. Ledger sync       open records the ledger already holds
//!   4. Identity          pending → ready_to_post
//!   5. Posting           cutoff, duplicate check, pre-flight, post
//!
//! RULES:
//!   - No per-record error escapes its stage. The loop always continues.
//!   - Each record's state change commits on its own, so a crash mid-run
//!     leaves a state the next run resumes from.
//!   - Sync and posting need a fresh snapshot and are skipped without one.
//!     Identity still runs against the last cached mappings.
//!   - Risk analysis is a separate entry point (`analyze_risk`).

use crate::{
    bank::BankFeed,
    clock::RunClock,
    command::{CommandOutcome, OperatorCommand},
    config::ReconConfig,
    duplicates::DuplicateDetector,
    error::{GatewayError, ReconError, ReconResult},
    event::{DiscardReason, EventLogEntry, ReconEvent},
    identity::{IdentifierMap, IdentityResolver},
    ingest::IngestNormalizer,
    ledger::{LedgerGateway, PostPaymentRequest},
    lifecycle::{self, TxnStatus},
    model::{AuditAction, AuditEntry, FailureCode, LedgerPayment, RunSummary, TransactionRecord},
    pattern::PatternAnalyzer,
    snapshot::{BillingReport, LedgerSnapshot},
    store::ReconStore,
    suspension::{SuspensionCandidate, SuspensionManager},
    types::{RunId, TieBreak, TxnKey, UNALLOCATED},
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// What one `run` did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id:  RunId,
    pub summary: RunSummary,
    pub events:  Vec<ReconEvent>,
}

/// What one `analyze_risk` did.
#[derive(Debug, Clone)]
pub struct RiskReport {
    pub billing:    BillingReport,
    pub analyzed:   u32,
    pub risky:      u32,
    pub candidates: Vec<SuspensionCandidate>,
}

pub struct ReconEngine {
    pub store: ReconStore,
    pub clock: RunClock,
    config:    ReconConfig,
}

impl ReconEngine {
    pub fn new(config: ReconConfig, store: ReconStore, clock: RunClock) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self { store, clock, config })
    }

    /// In-memory store, test config, frozen clock.
    pub fn build_test(now: DateTime<Utc>) -> ReconResult<Self> {
        let store = ReconStore::in_memory()?;
        store.migrate()?;
        Self::new(ReconConfig::default_test(), store, RunClock::fixed(now))
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Replace the configuration between runs.
    pub fn set_config(&mut self, config: ReconConfig) -> ReconResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn actor(&self) -> &str {
        &self.config.posting.actor
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn run(
        &mut self,
        feed: &dyn BankFeed,
        ledger: &mut dyn LedgerGateway,
    ) -> ReconResult<RunReport> {
        self.clock.tick();
        let now = self.clock.now();
        let run_id = format!("run-{}", Uuid::new_v4());
        self.store.insert_run(&run_id, now)?;
        log::info!("run={run_id} engine: started at {now}");

        let mut summary = RunSummary::default();
        let mut all = Vec::new();
        self.record(&run_id, "engine", vec![ReconEvent::RunStarted { run_id: run_id.clone() }], &mut summary, &mut all)?;

        // 1. Snapshot
        let since = self.clock.days_ago(
            self.config
                .risk
                .analysis_lookback_days
                .max(self.config.duplicates.post_window_days),
        );
        let snapshot_event = match LedgerSnapshot::new(&self.store, &self.config.posting.currency)
            .refresh(&*ledger, since, now)
        {
            Ok(r) => ReconEvent::SnapshotRefreshed {
                customers: r.customers,
                payments:  r.new_payments,
                errors:    r.errors,
            },
            Err(e) => {
                log::error!("run={run_id} snapshot: unavailable, sync and posting skipped: {e}");
                summary.snapshot_error = Some(e.to_string());
                ReconEvent::SnapshotUnavailable { reason: e.to_string() }
            }
        };
        let snapshot_ok = matches!(snapshot_event, ReconEvent::SnapshotRefreshed { .. });
        self.record(&run_id, "snapshot", vec![snapshot_event], &mut summary, &mut all)?;

        // 2. Ingest
        let events = self.ingest(feed, now);
        self.record(&run_id, "ingest", events, &mut summary, &mut all)?;

        // 3. Ledger sync
        if snapshot_ok {
            let events = self.sync_with_ledger(now)?;
            self.record(&run_id, "sync", events, &mut summary, &mut all)?;
        }

        // 4. Identity
        let events = self.resolve_pending(now)?;
        self.record(&run_id, "identity", events, &mut summary, &mut all)?;

        // 5. Posting
        if snapshot_ok {
            let events = self.post_ready(ledger, now)?;
            self.record(&run_id, "posting", events, &mut summary, &mut all)?;
        }

        let completed = ReconEvent::RunCompleted {
            run_id:    run_id.clone(),
            processed: summary.processed(),
            failed:    summary.failed(),
        };
        self.record(&run_id, "engine", vec![completed], &mut summary, &mut all)?;

        let (status, message) = match &summary.snapshot_error {
            None => ("completed", None),
            Some(e) => ("partial", Some(format!("ledger snapshot unavailable: {e}"))),
        };
        self.store
            .finish_run(&run_id, self.clock.now(), status, message.as_deref(), &summary)?;
        log::info!(
            "run={run_id} engine: {status}; ingested={} resolved={} posted={} flagged={} rejected={} deferred={}",
            summary.ingested, summary.resolved, summary.posted,
            summary.duplicates_flagged, summary.rejected, summary.deferred
        );

        Ok(RunReport { run_id, summary, events: all })
    }

    fn record(
        &self,
        run_id: &str,
        stage: &str,
        events: Vec<ReconEvent>,
        summary: &mut RunSummary,
        all: &mut Vec<ReconEvent>,
    ) -> ReconResult<()> {
        for event in events {
            tally(summary, &event);
            self.store
                .append_event(&EventLogEntry::from_event(run_id, stage, &event, self.clock.now())?)?;
            all.push(event);
        }
        Ok(())
    }

    // ── Stages ─────────────────────────────────────────────────

    pub fn ingest(&self, feed: &dyn BankFeed, now: DateTime<Utc>) -> Vec<ReconEvent> {
        let normalizer = IngestNormalizer::new(&self.config.ingest, &self.store);
        let mut events = Vec::new();
        for account in &self.config.ingest.accounts {
            match feed.fetch_entries(account) {
                Ok(entries) => {
                    log::info!("ingest: {} entries fetched for {account}", entries.len());
                    events.extend(normalizer.ingest_batch(account, &entries, now));
                }
                Err(e) => {
                    log::warn!("ingest: feed for {account} unavailable: {e}");
                    events.push(ReconEvent::FeedUnavailable {
                        account: account.clone(),
                        reason:  e.to_string(),
                    });
                }
            }
        }
        events
    }

    /// Open records whose entry id the ledger already carries as a provider
    /// payment id were posted by someone else; record that instead of
    /// posting them again.
    pub fn sync_with_ledger(&self, now: DateTime<Utc>) -> ReconResult<Vec<ReconEvent>> {
        let mut events = Vec::new();
        for record in self.store.open_transactions()? {
            match self.sync_one(&record, now) {
                Ok(Some(ev)) => events.push(ev),
                Ok(None) => {}
                Err(e) => log::error!("sync: {} failed: {e}", record.key()),
            }
        }
        Ok(events)
    }

    fn sync_one(&self, record: &TransactionRecord, now: DateTime<Utc>) -> ReconResult<Option<ReconEvent>> {
        let matches = self.store.ledger_payments_by_provider_id(&record.entry_id)?;
        let Some(payment) = matches.first() else {
            return Ok(None);
        };
        let key = record.key();
        if self.store.transactions_by_entry_id(&record.entry_id)?.len() > 1 {
            log::warn!("sync: entry id {} exists on several accounts, not synced", record.entry_id);
            return Ok(None);
        }

        let actor = self.actor();
        let synced = self.store.atomically(|s| {
            if !lifecycle::record_posting(
                s,
                &key,
                record.status,
                TxnStatus::Posted,
                &payment.payment_id,
                AuditAction::LedgerSync,
                actor,
                now,
            )? {
                return Ok(false);
            }
            if record.customer_id != payment.customer_id {
                s.update_transaction_customer(&key, &payment.customer_id, false, now)?;
                s.insert_audit(&AuditEntry::new(
                    &key,
                    AuditAction::CustomerUpdate,
                    "customer_id",
                    Some(&record.customer_id),
                    Some(&payment.customer_id),
                    actor,
                    now,
                ))?;
            }
            s.resolve_failure_record(&key, None, now)?;
            Ok(true)
        })?;
        if !synced {
            return Ok(None);
        }
        log::info!("sync: {key} already in ledger as {}", payment.payment_id);
        Ok(Some(ReconEvent::LedgerSynced {
            entry_id:   key.entry_id,
            account:    key.account,
            payment_id: payment.payment_id.clone(),
        }))
    }

    pub fn resolve_pending(&self, now: DateTime<Utc>) -> ReconResult<Vec<ReconEvent>> {
        let mappings = IdentifierMap::load(&self.store)?;
        let resolver = IdentityResolver::new(&self.config.identity, mappings)
            .map_err(|e| anyhow::anyhow!("invalid identity marker: {e}"))?;
        let mut events = Vec::new();
        for record in self.store.transactions_with_status(TxnStatus::Pending)? {
            match resolver.apply(&self.store, &record, self.actor(), now) {
                Ok(Some(ev)) => events.push(ev),
                Ok(None) => {}
                Err(e) => log::error!("identity: {} failed: {e}", record.key()),
            }
        }
        Ok(events)
    }

    pub fn post_ready(
        &self,
        ledger: &mut dyn LedgerGateway,
        now: DateTime<Utc>,
    ) -> ReconResult<Vec<ReconEvent>> {
        let detector = DuplicateDetector::new(self.config.duplicates.post_window_days);
        let mut payments = self.store.ledger_payments()?;
        let mut events = Vec::new();
        for record in self.store.transactions_with_status(TxnStatus::ReadyToPost)? {
            let key = record.key();
            match self.post_one(ledger, &record, &detector, &mut payments, now) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    log::error!("posting: {key} failed, left for next run: {e}");
                    events.push(ReconEvent::PostingDeferred {
                        entry_id: key.entry_id,
                        account:  key.account,
                        reason:   e.to_string(),
                    });
                }
            }
        }
        Ok(events)
    }

    fn post_one(
        &self,
        ledger: &mut dyn LedgerGateway,
        record: &TransactionRecord,
        detector: &DuplicateDetector,
        payments: &mut Vec<LedgerPayment>,
        now: DateTime<Utc>,
    ) -> ReconResult<ReconEvent> {
        let key = record.key();
        let customer_id = record.customer_id.as_str();

        if let Some(value_date) = record.value_date {
            let cutoff = now.date_naive() - Duration::days(self.config.posting.post_cutoff_days);
            if value_date < cutoff {
                log::debug!("posting: {key} value date {value_date} is before cutoff {cutoff}");
                return Ok(ReconEvent::PostingSkipped {
                    entry_id: key.entry_id,
                    account:  key.account,
                    reason:   format!("value date {value_date} before cutoff {cutoff}"),
                });
            }
        }

        // A review cleared together with a customer override only vouched
        // for the old customer; the new one is screened again.
        let cleared_by_human = self
            .store
            .last_resolved_failure(&key, &FailureCode::DuplicateManualReview)?
            .is_some_and(|f| f.manual_customer_id.is_none());
        if !cleared_by_human {
            if let Some(m) = detector.find_prior_match(payments, customer_id, record.amount, now) {
                let reason = format!(
                    "ledger payment {} of {:.2} for customer {customer_id} {} day(s) ago",
                    m.payment.payment_id, m.payment.amount, m.days_apart
                );
                self.park(&key, &FailureCode::DuplicateManualReview, &reason, TxnStatus::DuplicateManualReview, now)?;
                log::warn!("posting: {key} flagged for duplicate review: {reason}");
                return Ok(ReconEvent::DuplicateFlagged {
                    entry_id:           key.entry_id,
                    account:            key.account,
                    customer_id:        customer_id.to_string(),
                    matched_payment_id: m.payment.payment_id,
                    days_apart:         m.days_apart,
                });
            }
        }

        if let Some(customer) = self.store.get_customer(customer_id)? {
            if customer.is_archived {
                return self.reject(&key, FailureCode::AccountArchived, "customer account is archived", now);
            }
            if !customer.is_active {
                return self.reject(&key, FailureCode::AccountInactive, "customer account is inactive", now);
            }
            if customer.is_lead {
                match ledger.convert_lead(customer_id) {
                    Ok(()) => log::info!("posting: converted lead {customer_id} before posting {key}"),
                    Err(GatewayError::Transient(msg)) => return Ok(self.defer(&key, msg)),
                    Err(GatewayError::Rejected { reason, .. }) => {
                        return self.reject(&key, FailureCode::LeadConversionFailed, &reason, now);
                    }
                }
            }
        }

        let request = self.payment_request(record, now);
        match ledger.post_payment(&request) {
            Ok(posted) => {
                let cached = LedgerPayment {
                    payment_id:          posted.payment_id.clone(),
                    customer_id:         customer_id.to_string(),
                    amount:              record.amount,
                    created_at:          now,
                    method:              Some(self.config.posting.provider_name.clone()),
                    note:                Some(request.note.clone()),
                    provider_payment_id: Some(record.entry_id.clone()),
                    currency:            self.config.posting.currency.clone(),
                };
                // The ledger has the money now; the local stamp must not be lost
                // behind a later failure in this record.
                let stamped = self.store.atomically(|s| {
                    s.insert_ledger_payment(&cached)?;
                    lifecycle::record_posting(
                        s,
                        &key,
                        TxnStatus::ReadyToPost,
                        TxnStatus::Posted,
                        &posted.payment_id,
                        AuditAction::PaymentPosted,
                        self.actor(),
                        now,
                    )
                })?;
                if !stamped {
                    log::warn!("posting: {key} changed status while posting; ledger payment {}", posted.payment_id);
                }
                payments.push(cached);
                log::info!("posting: {key} posted {:.2} to {customer_id} as {}", record.amount, posted.payment_id);
                Ok(ReconEvent::PaymentPosted {
                    entry_id:    key.entry_id,
                    account:     key.account,
                    customer_id: customer_id.to_string(),
                    payment_id:  posted.payment_id,
                    amount:      record.amount,
                })
            }
            Err(GatewayError::Transient(msg)) => Ok(self.defer(&key, msg)),
            Err(GatewayError::Rejected { code, reason }) => {
                let failure = match code.as_str() {
                    "404" => FailureCode::CustomerNotFound,
                    other => FailureCode::Other(format!("LEDGER_REJECTED_{other}")),
                };
                self.reject(&key, failure, &reason, now)
            }
        }
    }

    fn payment_request(&self, record: &TransactionRecord, now: DateTime<Utc>) -> PostPaymentRequest {
        let note = match record.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => format!("{n} | TXN: {}", record.entry_id),
            None => format!("TXN: {}", record.entry_id),
        };
        PostPaymentRequest {
            client_id:                       record.customer_id.clone(),
            amount:                          record.amount,
            currency_code:                   self.config.posting.currency.clone(),
            provider_name:                   self.config.posting.provider_name.clone(),
            provider_payment_id:             record.entry_id.clone(),
            provider_payment_time:           now,
            note,
            method_id:                       self.config.posting.method_id.clone(),
            apply_to_invoices_automatically: self.config.posting.apply_to_invoices,
        }
    }

    /// Open (or refresh) the failure and move the record out of the queue.
    fn park(
        &self,
        key: &TxnKey,
        code: &FailureCode,
        reason: &str,
        to: TxnStatus,
        now: DateTime<Utc>,
    ) -> ReconResult<()> {
        let actor = self.actor();
        self.store.atomically(|s| {
            s.upsert_failure(key, reason, code, now)?;
            lifecycle::transition(s, key, TxnStatus::ReadyToPost, to, actor, now)?;
            Ok(())
        })
    }

    fn reject(
        &self,
        key: &TxnKey,
        code: FailureCode,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ReconResult<ReconEvent> {
        self.park(key, &code, reason, TxnStatus::FailedRejected, now)?;
        log::warn!("posting: {key} rejected ({}): {reason}", code.as_str());
        Ok(ReconEvent::PostingRejected {
            entry_id: key.entry_id.clone(),
            account:  key.account.clone(),
            code:     code.as_str().to_string(),
            reason:   reason.to_string(),
        })
    }

    fn defer(&self, key: &TxnKey, reason: String) -> ReconEvent {
        log::warn!("posting: {key} deferred to next run: {reason}");
        ReconEvent::PostingDeferred {
            entry_id: key.entry_id.clone(),
            account:  key.account.clone(),
            reason,
        }
    }

    // ── Risk ───────────────────────────────────────────────────

    /// Refresh billing data, recompute every active customer's payment
    /// pattern and list suspension candidates. A failed snapshot aborts
    /// the whole analysis.
    pub fn analyze_risk(&mut self, ledger: &dyn LedgerGateway) -> ReconResult<RiskReport> {
        self.clock.tick();
        let now = self.clock.now();
        let since = self.clock.days_ago(self.config.risk.analysis_lookback_days);

        let snapshot = LedgerSnapshot::new(&self.store, &self.config.posting.currency);
        snapshot.refresh(ledger, since, now)?;
        let customers = self.store.customers(true)?;
        let ids: Vec<String> = customers.iter().map(|c| c.customer_id.clone()).collect();
        let billing = snapshot.refresh_billing(ledger, &ids, since, now)?;

        let analyzer = PatternAnalyzer::new(&self.config.risk);
        let mut analyzed = 0u32;
        let mut risky = 0u32;
        for customer in &customers {
            let invoices = self.store.invoices_for(&customer.customer_id)?;
            let payments = self.store.ledger_payments_for(&customer.customer_id)?;
            let summary = analyzer.analyze(&customer.customer_id, &invoices, &payments, now);
            if summary.is_risky {
                risky += 1;
            }
            self.store.upsert_payment_pattern(&summary)?;
            analyzed += 1;
        }
        log::info!("risk: analysed {analyzed} customers, {risky} risky");

        let candidates = SuspensionManager::new(&self.store, &self.config.risk).candidates(now)?;
        Ok(RiskReport { billing, analyzed, risky, candidates })
    }

    // ── Operator actions ───────────────────────────────────────

    /// Find a record by entry id, narrowing by account when given.
    pub fn lookup(
        &self,
        entry_id: &str,
        account: Option<&str>,
        tie_break: TieBreak,
    ) -> ReconResult<TransactionRecord> {
        let not_found = || ReconError::TransactionNotFound { entry_id: entry_id.to_string() };
        if let Some(account) = account {
            return self
                .store
                .get_transaction(&TxnKey::new(entry_id, account))?
                .ok_or_else(not_found);
        }
        let mut rows = self.store.transactions_by_entry_id(entry_id)?;
        match (rows.len(), tie_break) {
            (0, _) => Err(not_found()),
            (1, _) => Ok(rows.remove(0)),
            (n, TieBreak::Strict) => Err(ReconError::AmbiguousEntry {
                entry_id: entry_id.to_string(),
                count:    n,
            }),
            (_, TieBreak::PreferUnallocated) => {
                let idx = rows.iter().position(|t| t.is_unallocated()).unwrap_or(0);
                Ok(rows.swap_remove(idx))
            }
        }
    }

    /// Close the open failure and put the record back in the posting queue.
    pub fn resolve_failure(
        &self,
        key: &TxnKey,
        manual_customer_id: Option<&str>,
        actor: &str,
    ) -> ReconResult<TransactionRecord> {
        let now = self.clock.now();
        let record = self
            .store
            .get_transaction(key)?
            .ok_or_else(|| ReconError::TransactionNotFound { entry_id: key.entry_id.clone() })?;
        let manual = manual_customer_id.map(str::trim).filter(|c| !c.is_empty());
        if let Some(cid) = manual.filter(|c| c.eq_ignore_ascii_case(UNALLOCATED)) {
            return Err(ReconError::CustomerRequired { key: key.clone(), given: cid.to_string() });
        }

        self.store.atomically(|s| {
            if !s.resolve_failure_record(key, manual, now)? {
                return Err(ReconError::FailureNotFound { key: key.clone() });
            }
            s.insert_audit(&AuditEntry::new(
                key,
                AuditAction::FailureResolved,
                "resolved",
                Some("false"),
                Some("true"),
                actor,
                now,
            ))?;
            if let Some(cid) = manual {
                if cid != record.customer_id {
                    s.update_transaction_customer(key, cid, false, now)?;
                    s.insert_audit(&AuditEntry::new(
                        key,
                        AuditAction::CustomerUpdate,
                        "customer_id",
                        Some(&record.customer_id),
                        Some(cid),
                        actor,
                        now,
                    ))?;
                }
            }
            let has_customer = manual.is_some() || !record.is_unallocated();
            if has_customer && record.status.can_transition_to(TxnStatus::ReadyToPost) {
                lifecycle::transition(s, key, record.status, TxnStatus::ReadyToPost, actor, now)?;
            }
            Ok(())
        })?;
        log::info!("operator: failure on {key} resolved by {actor}");

        self.store
            .get_transaction(key)?
            .ok_or_else(|| ReconError::TransactionNotFound { entry_id: key.entry_id.clone() })
    }

    /// Attach a customer to a record by hand. Pending records move on to
    /// `ready_to_post`.
    pub fn assign_customer(
        &self,
        key: &TxnKey,
        customer_id: &str,
        actor: &str,
    ) -> ReconResult<TransactionRecord> {
        let now = self.clock.now();
        let record = self
            .store
            .get_transaction(key)?
            .ok_or_else(|| ReconError::TransactionNotFound { entry_id: key.entry_id.clone() })?;
        if record.status.is_terminal() {
            return Err(ReconError::InvalidTransition {
                key:  key.clone(),
                from: record.status.to_string(),
                to:   "customer reassignment".into(),
            });
        }
        let given = customer_id;
        let customer_id = customer_id.trim();
        if customer_id.is_empty() || customer_id.eq_ignore_ascii_case(UNALLOCATED) {
            return Err(ReconError::CustomerRequired { key: key.clone(), given: given.to_string() });
        }
        if customer_id != record.customer_id {
            self.store.atomically(|s| {
                s.update_transaction_customer(key, customer_id, false, now)?;
                s.insert_audit(&AuditEntry::new(
                    key,
                    AuditAction::CustomerUpdate,
                    "customer_id",
                    Some(&record.customer_id),
                    Some(customer_id),
                    actor,
                    now,
                ))?;
                if record.status == TxnStatus::Pending {
                    lifecycle::transition(s, key, TxnStatus::Pending, TxnStatus::ReadyToPost, actor, now)?;
                }
                Ok(())
            })?;
            log::info!("operator: {key} assigned to {customer_id} by {actor}");
        }
        self.store
            .get_transaction(key)?
            .ok_or_else(|| ReconError::TransactionNotFound { entry_id: key.entry_id.clone() })
    }

    /// The payment was captured in the ledger by hand.
    pub fn mark_posted_manual(
        &self,
        key: &TxnKey,
        actor: &str,
        note: Option<&str>,
    ) -> ReconResult<TransactionRecord> {
        let now = self.clock.now();
        let record = self
            .store
            .get_transaction(key)?
            .ok_or_else(|| ReconError::TransactionNotFound { entry_id: key.entry_id.clone() })?;
        let manual_id = format!("MANUAL_{}", key.entry_id);

        self.store.atomically(|s| {
            if !lifecycle::record_posting(
                s,
                key,
                record.status,
                TxnStatus::PostedManual,
                &manual_id,
                AuditAction::MarkedPosted,
                actor,
                now,
            )? {
                return Err(ReconError::InvalidTransition {
                    key:  key.clone(),
                    from: record.status.to_string(),
                    to:   TxnStatus::PostedManual.to_string(),
                });
            }
            if let Some(n) = note.map(str::trim).filter(|n| !n.is_empty()) {
                s.set_transaction_note(key, n, now)?;
            }
            s.resolve_failure_record(key, None, now)?;
            Ok(())
        })?;
        log::info!("operator: {key} marked posted by {actor}");

        self.store
            .get_transaction(key)?
            .ok_or_else(|| ReconError::TransactionNotFound { entry_id: key.entry_id.clone() })
    }

    pub fn apply_command(
        &mut self,
        cmd: &OperatorCommand,
        ledger: &mut dyn LedgerGateway,
    ) -> ReconResult<CommandOutcome> {
        self.clock.tick();
        log::info!("operator: applying {}", cmd.name());
        match cmd {
            OperatorCommand::ResolveFailure { entry_id, account, manual_customer_id, actor, tie_break } => {
                let key = self.lookup(entry_id, account.as_deref(), *tie_break)?.key();
                Ok(CommandOutcome::Transaction(
                    self.resolve_failure(&key, manual_customer_id.as_deref(), actor)?,
                ))
            }
            OperatorCommand::AssignCustomer { entry_id, account, customer_id, actor, tie_break } => {
                let key = self.lookup(entry_id, account.as_deref(), *tie_break)?.key();
                Ok(CommandOutcome::Transaction(self.assign_customer(&key, customer_id, actor)?))
            }
            OperatorCommand::MarkPosted { entry_id, account, actor, note, tie_break } => {
                let key = self.lookup(entry_id, account.as_deref(), *tie_break)?.key();
                Ok(CommandOutcome::Transaction(
                    self.mark_posted_manual(&key, actor, note.as_deref())?,
                ))
            }
            OperatorCommand::Suspend { customer_id, service_id, actor, note, grace_override } => {
                let outcome = SuspensionManager::new(&self.store, &self.config.risk).suspend(
                    ledger,
                    customer_id,
                    service_id,
                    actor,
                    note.as_deref(),
                    *grace_override,
                    self.clock.now(),
                )?;
                Ok(CommandOutcome::Suspension(outcome))
            }
            OperatorCommand::Reactivate { suspension_id, actor, note } => {
                let record = SuspensionManager::new(&self.store, &self.config.risk).reactivate(
                    ledger,
                    *suspension_id,
                    actor,
                    note.as_deref(),
                    self.clock.now(),
                )?;
                Ok(CommandOutcome::Reactivated(record))
            }
        }
    }
}

fn tally(summary: &mut RunSummary, event: &ReconEvent) {
    match event {
        ReconEvent::EntryIngested { .. } => summary.ingested += 1,
        ReconEvent::EntryDiscarded { reason, .. } => match reason {
            DiscardReason::Outgoing => summary.discarded_outgoing += 1,
            DiscardReason::Excluded => summary.discarded_excluded += 1,
            DiscardReason::DuplicateEntry | DiscardReason::DuplicateTriple => {
                summary.discarded_duplicate += 1
            }
            DiscardReason::Malformed => summary.malformed += 1,
        },
        ReconEvent::IdentityResolved { .. } => summary.resolved += 1,
        ReconEvent::IdentityUnresolved { .. } => summary.unresolved += 1,
        ReconEvent::LedgerSynced { .. } => summary.synced += 1,
        ReconEvent::DuplicateFlagged { .. } => summary.duplicates_flagged += 1,
        ReconEvent::PaymentPosted { amount, .. } => {
            summary.posted += 1;
            summary.posted_amount += amount;
        }
        ReconEvent::PostingRejected { .. } => summary.rejected += 1,
        ReconEvent::PostingDeferred { .. } => summary.deferred += 1,
        ReconEvent::PostingSkipped { .. } => summary.stale_skipped += 1,
        ReconEvent::RunStarted { .. }
        | ReconEvent::RunCompleted { .. }
        | ReconEvent::SnapshotRefreshed { .. }
        | ReconEvent::SnapshotUnavailable { .. }
        | ReconEvent::FeedUnavailable { .. } => {}
    }
}
