use serde::Serialize;
use upsert_model::EventRow;

use crate::race::RaceReport;
use crate::upserter::UpsertOutcome;

/// Result of the `upsert` command.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    #[serde(flatten)]
    pub row: EventRow,
    pub outcome: UpsertOutcome,
    pub rows_affected: Option<u64>,
    /// Row stored after the upsert, when it could be read back.
    pub stored: Option<EventRow>,
}

/// Verifier verdict for a race.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Passed { row: EventRow },
    Failed { reason: String },
}

impl Verification {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

/// Result of the `race` command.
#[derive(Debug, Clone, Serialize)]
pub struct RaceSummary {
    pub engine: &'static str,
    pub report: RaceReport,
    pub committed: usize,
    pub failed: usize,
    pub highest_committed_version: Option<i64>,
    pub verification: Verification,
}

impl RaceSummary {
    #[must_use]
    pub fn new(engine: &'static str, report: RaceReport, verification: Verification) -> Self {
        Self {
            engine,
            committed: report.committed(),
            failed: report.failed(),
            highest_committed_version: report.highest_committed_version(),
            report,
            verification,
        }
    }
}
