//! Run clock — the single notion of "now" for one pipeline run.
//!
//! RULE: Stages never call `Utc::now()` directly. Window arithmetic and
//! grace-day checks read the clock so a run sees one consistent instant.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunClock {
    now:   DateTime<Utc>,
    fixed: bool,
}

impl RunClock {
    /// Wall-clock time, re-read on every `tick()`.
    pub fn system() -> Self {
        Self { now: Utc::now(), fixed: false }
    }

    /// A frozen instant (tests, replays).
    pub fn fixed(now: DateTime<Utc>) -> Self {
        Self { now, fixed: true }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn days_ago(&self, days: i64) -> DateTime<Utc> {
        self.now - Duration::days(days)
    }

    /// Called once at the start of each run.
    pub fn tick(&mut self) {
        if !self.fixed {
            self.now = Utc::now();
        }
    }
}
