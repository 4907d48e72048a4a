//! Upsert command implementation.

use tracing::warn;
use upsert_model::{EventRow, IsolationLevel};

use crate::cli::UpsertArgs;
use crate::config::RaceConfig;
use crate::error::Result;
use crate::format::{UpsertResult, format_upsert_result};
use crate::session::{Session, SessionFactory};
use crate::storage::read_event;
use crate::upserter::Upserter;

use super::{pg_factory, print_json};

/// Run one Upserter on a fresh session, then read the row back.
pub(crate) fn upsert_with<F: SessionFactory>(
    factory: &F,
    isolation: IsolationLevel,
    row: &EventRow,
) -> Result<UpsertResult> {
    let mut session = factory.open()?;
    session.set_auto_commit(false)?;
    session.set_isolation_level(isolation)?;

    let mut upserter = Upserter::new(&mut session, row.id, row.name.clone(), row.version)?;
    let outcome = upserter.perform();
    let rows_affected = upserter.rows_affected();
    upserter.close();

    // The upsert either committed or rolled back, so the session is idle.
    session.set_auto_commit(true)?;
    let stored = match read_event(&mut session, row.id) {
        Ok(stored) => stored,
        Err(err) => {
            warn!(error = %err, "failed to read back event");
            None
        }
    };
    if let Err(err) = session.close() {
        warn!(error = %err, "failed to close session");
    }

    Ok(UpsertResult {
        row: row.clone(),
        outcome,
        rows_affected,
        stored,
    })
}

/// Execute the upsert command.
///
/// # Errors
///
/// Returns an error if the session cannot be opened or configured or the
/// statement cannot be prepared. A failed execute or commit is reported in
/// the output, not as an error.
pub fn execute(config: &RaceConfig, args: &UpsertArgs, json: bool) -> Result<()> {
    let row = EventRow::new(args.id, config.race.name.clone(), args.version);
    let result = upsert_with(&pg_factory(config)?, config.race.isolation, &row)?;

    if json {
        return print_json(&result);
    }
    println!("{}", format_upsert_result(&result));
    Ok(())
}
