//! Text formatting functions for `upsert_race`.
//!
//! Plain text (non-ANSI) output:
//! - Writer status icons (✓ ✗ ⊘ !)
//! - Row lines
//! - Race and upsert summaries

use std::fmt::Write as _;

use upsert_model::EventRow;

use crate::format::{RaceSummary, UpsertResult, Verification};
use crate::race::WriterStatus;

/// Writer status characters.
pub mod icons {
    /// Committed (checkmark).
    pub const COMMITTED: &str = "✓";
    /// Rolled back (X mark).
    pub const ROLLED_BACK: &str = "✗";
    /// Thread never started.
    pub const NOT_STARTED: &str = "⊘";
    /// Thread panicked.
    pub const PANICKED: &str = "!";
}

#[must_use]
pub const fn format_writer_icon(status: WriterStatus) -> &'static str {
    match status {
        WriterStatus::Committed => icons::COMMITTED,
        WriterStatus::RolledBack => icons::ROLLED_BACK,
        WriterStatus::NotStarted => icons::NOT_STARTED,
        WriterStatus::Panicked => icons::PANICKED,
    }
}

/// Format: `{id} v{version} {name}`
#[must_use]
pub fn format_row_line(row: &EventRow) -> String {
    format!("{} v{} {}", row.id, row.version, row.name)
}

#[must_use]
pub fn format_upsert_result(result: &UpsertResult) -> String {
    let icon = if result.outcome.is_success() {
        icons::COMMITTED
    } else {
        icons::ROLLED_BACK
    };
    let mut out = format!("{icon} {}", format_row_line(&result.row));
    if let Some(rows) = result.rows_affected {
        let _ = write!(out, " ({rows} row(s) affected)");
    }
    if let Some(stored) = &result.stored {
        let _ = write!(out, "\nstored: {}", format_row_line(stored));
    }
    out
}

/// Multi-line race summary. Individual writers are listed only when
/// `detailed` is set or some of them failed.
#[must_use]
pub fn format_race_summary(summary: &RaceSummary, detailed: bool) -> String {
    let report = &summary.report;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "race {} on {} ({} writers, {})",
        report.id, summary.engine, report.writers, report.isolation
    );
    let _ = writeln!(
        out,
        "committed: {}  failed: {}  elapsed: {} ms",
        summary.committed, summary.failed, report.elapsed_ms
    );
    if let Some(version) = summary.highest_committed_version {
        let _ = writeln!(out, "highest committed version: {version}");
    }

    if detailed || summary.failed > 0 {
        for writer in &report.outcomes {
            if detailed || writer.status != WriterStatus::Committed {
                let _ = writeln!(
                    out,
                    "  {} v{}",
                    format_writer_icon(writer.status),
                    writer.version
                );
            }
        }
    }

    match &summary.verification {
        Verification::Passed { row } => {
            let _ = write!(out, "{} verified: {}", icons::COMMITTED, format_row_line(row));
        }
        Verification::Failed { reason } => {
            let _ = write!(out, "{} verification failed: {reason}", icons::ROLLED_BACK);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::{RaceReport, WriterReport};
    use crate::upserter::UpsertOutcome;
    use chrono::Utc;
    use upsert_model::IsolationLevel;
    use uuid::Uuid;

    fn report(statuses: &[(i64, WriterStatus)]) -> RaceReport {
        RaceReport {
            id: Uuid::nil(),
            name: "First event".to_string(),
            isolation: IsolationLevel::ReadCommitted,
            writers: statuses.len(),
            started_at: Utc::now(),
            elapsed_ms: 12,
            outcomes: statuses
                .iter()
                .map(|&(version, status)| WriterReport { version, status })
                .collect(),
        }
    }

    #[test]
    fn test_writer_icons() {
        assert_eq!(format_writer_icon(WriterStatus::Committed), "✓");
        assert_eq!(format_writer_icon(WriterStatus::RolledBack), "✗");
        assert_eq!(format_writer_icon(WriterStatus::NotStarted), "⊘");
        assert_eq!(format_writer_icon(WriterStatus::Panicked), "!");
    }

    #[test]
    fn test_format_row_line() {
        let row = EventRow::new(Uuid::nil(), "First event", 7);
        assert_eq!(
            format_row_line(&row),
            "00000000-0000-0000-0000-000000000000 v7 First event"
        );
    }

    #[test]
    fn test_upsert_result_lists_stored_row() {
        let row = EventRow::new(Uuid::nil(), "First event", 3);
        let result = UpsertResult {
            row: row.clone(),
            outcome: UpsertOutcome::Committed,
            rows_affected: Some(0),
            stored: Some(EventRow::new(Uuid::nil(), "First event", 9)),
        };
        let text = format_upsert_result(&result);
        assert!(text.starts_with("✓"));
        assert!(text.contains("(0 row(s) affected)"));
        assert!(text.contains("stored: 00000000-0000-0000-0000-000000000000 v9"));
    }

    #[test]
    fn test_race_summary_hides_committed_writers_by_default() {
        let summary = RaceSummary::new(
            "memory",
            report(&[(1, WriterStatus::Committed), (2, WriterStatus::RolledBack)]),
            Verification::Failed {
                reason: "expected version 2, found 1".to_string(),
            },
        );
        let text = format_race_summary(&summary, false);
        assert!(text.contains("committed: 1  failed: 1"));
        assert!(text.contains("  ✗ v2"));
        assert!(!text.contains("  ✓ v1"));
        assert!(text.ends_with("✗ verification failed: expected version 2, found 1"));
    }

    #[test]
    fn test_race_summary_detailed_lists_every_writer() {
        let expected = EventRow::new(Uuid::nil(), "First event", 2);
        let summary = RaceSummary::new(
            "memory",
            report(&[(2, WriterStatus::Committed), (1, WriterStatus::Committed)]),
            Verification::Passed { row: expected },
        );
        let text = format_race_summary(&summary, true);
        assert!(text.contains("  ✓ v2\n  ✓ v1\n"));
        assert!(text.contains("highest committed version: 2"));
        assert!(text.contains("✓ verified:"));
    }
}
