//! recon-runner: headless batch runner for the EFT reconciliation engine.
//!
//! Usage:
//!   recon-runner --fixture data/demo_fixture.json --db recon.db
//!   recon-runner --fixture data/demo_fixture.json --commands ops.json --risk
//!   recon-runner --fixture data/demo_fixture.json --today 2026-03-10 --reports

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use eftrecon_core::{
    bank::StaticBankFeed,
    clock::RunClock,
    command::{CommandOutcome, OperatorCommand},
    config::ReconConfig,
    engine::{ReconEngine, RunReport},
    ledger::InMemoryLedger,
    reports,
    store::ReconStore,
    suspension::{SuspendOutcome, SuspensionManager},
};
use std::env;

/// Bank and ledger state for one offline run.
#[derive(serde::Deserialize)]
struct Fixture {
    #[serde(default)]
    bank:   StaticBankFeed,
    #[serde(default)]
    ledger: InMemoryLedger,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag(&args, "--data-dir").unwrap_or("./data");
    let fixture_path = flag(&args, "--fixture");
    let commands_path = flag(&args, "--commands");
    let today = flag(&args, "--today");
    let with_risk = args.iter().any(|a| a == "--risk");
    let with_reports = args.iter().any(|a| a == "--reports");

    println!("EFT reconciliation — recon-runner");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!("  fixture:   {}", fixture_path.unwrap_or("(none)"));
    println!();

    let config = ReconConfig::load(data_dir)?;
    let store = ReconStore::open(db)?;
    store.migrate()?;

    let clock = match today {
        Some(d) => RunClock::fixed(parse_today(d)?),
        None => RunClock::system(),
    };

    let (feed, mut ledger) = match fixture_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read fixture {path}"))?;
            let fixture: Fixture = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid fixture {path}"))?;
            (fixture.bank, fixture.ledger)
        }
        None => (StaticBankFeed::new(), InMemoryLedger::new()),
    };

    let mut engine = ReconEngine::new(config, store, clock)?;
    let report = engine.run(&feed, &mut ledger)?;
    print_run(&report);

    if let Some(path) = commands_path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read commands {path}"))?;
        let commands: Vec<OperatorCommand> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid commands {path}"))?;
        println!();
        println!("=== OPERATOR COMMANDS ===");
        for cmd in &commands {
            match engine.apply_command(cmd, &mut ledger) {
                Ok(outcome) => println!("  {:<16} ok   {}", cmd.name(), describe(&outcome)),
                Err(e) => {
                    log::warn!("operator: {} failed: {e}", cmd.name());
                    println!("  {:<16} FAIL {e}", cmd.name());
                }
            }
        }
        if !commands.is_empty() {
            let follow_up = engine.run(&feed, &mut ledger)?;
            println!();
            println!("--- follow-up run ---");
            print_run(&follow_up);
        }
    }

    if with_risk {
        print_risk(&mut engine, &ledger)?;
    }
    if with_reports {
        print_reports(&engine)?;
    }
    Ok(())
}

fn print_run(report: &RunReport) {
    let s = &report.summary;
    println!("=== RUN SUMMARY ===");
    println!("  run_id:         {}", report.run_id);
    println!("  ingested:       {}", s.ingested);
    println!("  discarded:      {} outgoing, {} excluded, {} duplicate, {} malformed",
        s.discarded_outgoing, s.discarded_excluded, s.discarded_duplicate, s.malformed);
    println!("  resolved:       {} ({} unresolved)", s.resolved, s.unresolved);
    println!("  synced:         {}", s.synced);
    println!("  posted:         {} (R{:.2})", s.posted, s.posted_amount);
    println!("  dup review:     {}", s.duplicates_flagged);
    println!("  rejected:       {}", s.rejected);
    println!("  deferred:       {}", s.deferred);
    println!("  stale skipped:  {}", s.stale_skipped);
    if let Some(err) = &s.snapshot_error {
        println!("  snapshot:       UNAVAILABLE ({err})");
    }
}

fn describe(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Transaction(t) => {
            format!("{} -> {} [{}]", t.key(), t.customer_id, t.status)
        }
        CommandOutcome::Suspension(SuspendOutcome::Suspended(s)) => {
            format!("suspended {}/{} (#{}): {}", s.customer_id, s.service_id, s.suspension_id, s.reason)
        }
        CommandOutcome::Suspension(SuspendOutcome::AlreadySuspended(s)) => {
            format!("already suspended {}/{} (#{})", s.customer_id, s.service_id, s.suspension_id)
        }
        CommandOutcome::Reactivated(s) => {
            format!("reactivated {}/{} (#{})", s.customer_id, s.service_id, s.suspension_id)
        }
    }
}

fn print_risk(engine: &mut ReconEngine, ledger: &InMemoryLedger) -> Result<()> {
    let risk = engine.analyze_risk(ledger)?;
    let stats = SuspensionManager::new(&engine.store, &engine.config().risk).stats(engine.clock.now())?;

    println!();
    println!("=== RISK ===");
    println!("  analysed:       {} ({} risky)", risk.analyzed, risk.risky);
    println!("  billing errors: {}", risk.billing.errors);
    println!("  active susp.:   {}", stats.active_suspensions);
    println!("  vip customers:  {}", stats.vip_customers);
    if risk.candidates.is_empty() {
        println!("  (no suspension candidates)");
    }
    for c in &risk.candidates {
        println!(
            "  {:<8} {:<24} {} service(s): {}",
            c.customer_id,
            c.display_name,
            c.service_ids.len(),
            c.decision.reason
        );
    }
    Ok(())
}

fn print_reports(engine: &ReconEngine) -> Result<()> {
    println!();
    println!("=== INCORRECT REFERENCES ===");
    for r in reports::incorrect_references(&engine.store)? {
        println!("  {:<8} {} transaction(s)", r.customer_id, r.count());
    }

    println!();
    println!("=== AMOUNT MISMATCHES ===");
    for m in reports::amount_mismatches(&engine.store)? {
        println!(
            "  {} bank {:.2} ledger {:.2} ({})",
            m.key, m.bank_amount, m.ledger_amount, m.ledger_payment_id
        );
    }

    let dup = reports::duplicate_report(&engine.store, engine.config().duplicates.cluster_window_days)?;
    println!();
    println!("=== DUPLICATE PAYMENTS ({}d window) ===", dup.window_days);
    println!("  clusters:       {}", dup.total_clusters());
    println!("  excess amount:  {:.2}", dup.total_amount());
    for s in &dup.summaries {
        println!("  {:>3}d: {} cluster(s), {} customer(s)", s.window_days, s.clusters, s.customers_affected);
    }
    Ok(())
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}

fn parse_today(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("--today expects YYYY-MM-DD, got {s}"))?;
    date.and_hms_opt(12, 0, 0)
        .map(|dt| dt.and_utc())
        .context("invalid --today")
}
