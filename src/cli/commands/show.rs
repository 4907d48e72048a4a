//! Show command implementation.

use tracing::warn;
use upsert_model::EventRow;
use uuid::Uuid;

use crate::cli::ShowArgs;
use crate::config::RaceConfig;
use crate::error::Result;
use crate::format::format_row_line;
use crate::session::{Session, SessionFactory};
use crate::storage::{read_all_events, read_event};

use super::{pg_factory, print_json};

/// Read all rows, or only the one for `id`.
pub(crate) fn load_rows<F: SessionFactory>(factory: &F, id: Option<Uuid>) -> Result<Vec<EventRow>> {
    let mut session = factory.open()?;
    let rows = match id {
        Some(id) => read_event(&mut session, id).map(|row| row.into_iter().collect()),
        None => read_all_events(&mut session),
    };
    if let Err(err) = session.close() {
        warn!(error = %err, "failed to close session");
    }
    rows
}

/// Execute the show command.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the query fails.
pub fn execute(config: &RaceConfig, args: &ShowArgs, json: bool) -> Result<()> {
    let rows = load_rows(&pg_factory(config)?, args.id)?;

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No events found");
        return Ok(());
    }
    for row in &rows {
        println!("{}", format_row_line(row));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryDatabase;

    #[test]
    fn test_load_rows_filters_by_id() {
        let db = MemoryDatabase::new();
        let first = EventRow::new(Uuid::new_v4(), "First event", 1);
        let second = EventRow::new(Uuid::new_v4(), "Second event", 2);
        db.seed(&first);
        db.seed(&second);

        assert_eq!(load_rows(&db, None).unwrap().len(), 2);
        assert_eq!(load_rows(&db, Some(second.id)).unwrap(), vec![second]);
        assert!(load_rows(&db, Some(Uuid::new_v4())).unwrap().is_empty());
        assert_eq!(db.open_sessions(), 0);
    }
}
