//! Race command implementation.

use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::{Engine, RaceArgs};
use crate::config::RaceConfig;
use crate::error::{RaceError, Result};
use crate::format::{RaceSummary, Verification, format_race_summary};
use crate::race::{RacePlan, run_race};
use crate::session::{MemoryDatabase, Session, SessionFactory};
use crate::storage::{create_event_table, read_all_events, truncate_events};
use crate::verify::verify_with;

use super::{pg_factory, print_json};

fn empty_table<S: Session>(session: &mut S, reset: bool) -> Result<()> {
    create_event_table(session, true)?;
    let rows = read_all_events(session)?.len();
    if rows > 0 {
        if !reset {
            return Err(RaceError::config(format!(
                "event table holds {rows} row(s); pass --reset to truncate it"
            )));
        }
        info!(rows, "truncating event table");
    }
    truncate_events(session)
}

/// Make sure the table exists and is empty before a race.
pub(crate) fn prepare_table<F: SessionFactory>(factory: &F, reset: bool) -> Result<()> {
    let mut session = factory.open()?;
    let prepared = empty_table(&mut session, reset);
    if let Err(err) = session.close() {
        warn!(error = %err, "failed to close session");
    }
    prepared
}

/// Prepare, race, verify. A failed verification is part of the summary.
pub(crate) fn race_with<F: SessionFactory>(
    factory: &F,
    engine: Engine,
    plan: &RacePlan,
    reset: bool,
) -> Result<(RaceSummary, Option<RaceError>)> {
    prepare_table(factory, reset)?;
    let report = run_race(factory, plan)?;

    let (verification, failure) = match verify_with(factory, &plan.expected_row()?) {
        Ok(row) => (Verification::Passed { row }, None),
        Err(err @ RaceError::VerificationFailed(_)) => (
            Verification::Failed {
                reason: err.to_string(),
            },
            Some(err),
        ),
        Err(err) => return Err(err),
    };
    Ok((RaceSummary::new(engine.as_str(), report, verification), failure))
}

/// Execute the race command.
///
/// # Errors
///
/// Returns an error if setup fails, or `RaceError::VerificationFailed` after
/// printing the summary when the post-condition does not hold.
pub fn execute(config: &RaceConfig, args: &RaceArgs, json: bool) -> Result<()> {
    let plan = config.plan(Uuid::new_v4());
    let (summary, failure) = match args.engine {
        Engine::Postgres => race_with(&pg_factory(config)?, args.engine, &plan, args.reset)?,
        Engine::Memory => race_with(&MemoryDatabase::new(), args.engine, &plan, args.reset)?,
    };

    if json {
        print_json(&summary)?;
    } else {
        println!("{}", format_race_summary(&summary, args.detailed));
    }

    failure.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::StartGate;
    use std::time::Duration;
    use upsert_model::EventRow;

    fn plan(writers: usize) -> RacePlan {
        RacePlan::new(Uuid::new_v4(), "First event", writers)
            .with_gate(StartGate::Delay(Duration::from_millis(5)))
    }

    #[test]
    fn test_memory_race_passes_verification() {
        crate::logging::init_test_logging();
        let db = MemoryDatabase::new();
        let (summary, failure) = race_with(&db, Engine::Memory, &plan(20), false).unwrap();
        assert!(failure.is_none());
        assert!(summary.verification.passed());
        assert_eq!(summary.committed, 20);
        assert_eq!(summary.highest_committed_version, Some(20));
    }

    #[test]
    fn test_non_empty_table_needs_reset() {
        let db = MemoryDatabase::new();
        db.seed(&EventRow::new(Uuid::new_v4(), "left over", 3));
        let err = race_with(&db, Engine::Memory, &plan(2), false).unwrap_err();
        assert!(matches!(err, RaceError::Config(_)));
        assert_eq!(db.snapshot().len(), 1);

        let (summary, failure) = race_with(&db, Engine::Memory, &plan(2), true).unwrap();
        assert!(failure.is_none());
        assert!(summary.verification.passed());
        assert_eq!(db.snapshot().len(), 1);
    }

    #[test]
    fn test_lost_top_writer_fails_verification() {
        let db = MemoryDatabase::new();
        // Every commit fails, so nothing is stored.
        db.fail_next_commits(usize::MAX);
        let (summary, failure) = race_with(&db, Engine::Memory, &plan(3), false).unwrap();
        assert!(!summary.verification.passed());
        assert_eq!(summary.failed, 3);
        assert!(matches!(failure, Some(RaceError::VerificationFailed(_))));
    }
}
