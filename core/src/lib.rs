//! EFT reconciliation engine.
//!
//! Pulls incoming bank entries, works out which ledger customer each one
//! belongs to, screens it against recent ledger payments and posts it.
//! Everything a human has to look at is parked with a failure record and
//! an audit trail.

pub mod bank;
pub mod clock;
pub mod command;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod event;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod pattern;
pub mod reports;
pub mod snapshot;
pub mod store;
pub mod suspension;
pub mod types;
