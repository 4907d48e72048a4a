//! Post-race check of the `event` table.

use tracing::{info, warn};
use upsert_model::EventRow;

use crate::error::{Mismatch, Result};
use crate::session::{Session, SessionFactory};
use crate::storage::read_all_events;

/// Compare the table against `expected`: exactly one row, then id, version
/// and name, reporting the first mismatch.
fn check_rows(rows: &[EventRow], expected: &EventRow) -> std::result::Result<(), Mismatch> {
    let [row] = rows else {
        return Err(Mismatch::RowCount { found: rows.len() });
    };
    if row.id != expected.id {
        return Err(Mismatch::Id {
            expected: expected.id,
            found: row.id,
        });
    }
    if row.version != expected.version {
        return Err(Mismatch::Version {
            expected: expected.version,
            found: row.version,
        });
    }
    if row.name != expected.name {
        return Err(Mismatch::Name {
            expected: expected.name.clone(),
            found: row.name.clone(),
        });
    }
    Ok(())
}

/// Read every row through `session` and check it against `expected`.
///
/// # Errors
///
/// Returns `RaceError::VerificationFailed` on a mismatch, or a session error
/// if the table cannot be read.
pub fn verify_single_row<S: Session>(session: &mut S, expected: &EventRow) -> Result<EventRow> {
    let rows = read_all_events(session)?;
    check_rows(&rows, expected)?;
    info!(id = %expected.id, version = expected.version, "post-condition holds");
    Ok(expected.clone())
}

/// Open a fresh session from `factory` and run [`verify_single_row`].
///
/// # Errors
///
/// As [`verify_single_row`], plus a failure to open the session.
pub fn verify_with<F: SessionFactory>(factory: &F, expected: &EventRow) -> Result<EventRow> {
    let mut session = factory.open()?;
    let outcome = verify_single_row(&mut session, expected);
    if let Err(err) = session.close() {
        warn!(error = %err, "failed to close verifier session");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RaceError;
    use crate::session::MemoryDatabase;
    use uuid::Uuid;

    const NAME: &str = "First event";

    fn mismatch(result: Result<EventRow>) -> Mismatch {
        match result {
            Err(RaceError::VerificationFailed(mismatch)) => mismatch,
            other => panic!("expected a verification failure, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_row_passes() {
        crate::logging::init_test_logging();
        let db = MemoryDatabase::new();
        let expected = EventRow::new(Uuid::new_v4(), NAME, 100);
        db.seed(&expected);
        assert_eq!(verify_with(&db, &expected).unwrap(), expected);
        assert_eq!(db.open_sessions(), 0);
    }

    #[test]
    fn test_empty_table_fails_row_count() {
        let db = MemoryDatabase::new();
        let expected = EventRow::new(Uuid::new_v4(), NAME, 1);
        assert_eq!(
            mismatch(verify_with(&db, &expected)),
            Mismatch::RowCount { found: 0 }
        );
    }

    #[test]
    fn test_extra_row_fails_row_count() {
        let db = MemoryDatabase::new();
        let expected = EventRow::new(Uuid::new_v4(), NAME, 1);
        db.seed(&expected);
        db.seed(&EventRow::new(Uuid::new_v4(), NAME, 1));
        assert_eq!(
            mismatch(verify_with(&db, &expected)),
            Mismatch::RowCount { found: 2 }
        );
    }

    #[test]
    fn test_lower_version_fails() {
        let db = MemoryDatabase::new();
        let id = Uuid::new_v4();
        db.seed(&EventRow::new(id, NAME, 99));
        assert_eq!(
            mismatch(verify_with(&db, &EventRow::new(id, NAME, 100))),
            Mismatch::Version {
                expected: 100,
                found: 99
            }
        );
    }

    #[test]
    fn test_wrong_id_is_reported_before_version() {
        let db = MemoryDatabase::new();
        let stored = EventRow::new(Uuid::new_v4(), NAME, 3);
        db.seed(&stored);
        let expected = EventRow::new(Uuid::new_v4(), NAME, 7);
        assert_eq!(
            mismatch(verify_with(&db, &expected)),
            Mismatch::Id {
                expected: expected.id,
                found: stored.id
            }
        );
    }

    #[test]
    fn test_wrong_name_fails() {
        let db = MemoryDatabase::new();
        let id = Uuid::new_v4();
        db.seed(&EventRow::new(id, "Second event", 5));
        assert!(matches!(
            mismatch(verify_with(&db, &EventRow::new(id, NAME, 5))),
            Mismatch::Name { .. }
        ));
    }

    #[test]
    fn test_close_failure_does_not_mask_result() {
        let db = MemoryDatabase::new();
        let expected = EventRow::new(Uuid::new_v4(), NAME, 2);
        db.seed(&expected);
        db.fail_next_closes(1);
        assert!(verify_with(&db, &expected).is_ok());
    }
}
