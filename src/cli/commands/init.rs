//! Init command implementation.

use serde::Serialize;
use tracing::warn;

use crate::cli::InitArgs;
use crate::config::RaceConfig;
use crate::error::Result;
use crate::session::{Session, SessionFactory};
use crate::storage::create_event_table;

use super::{pg_factory, print_json};

#[derive(Debug, Serialize)]
struct InitOutput {
    table: &'static str,
    if_not_exists: bool,
}

/// Create the table through any session factory.
pub(crate) fn init_with<F: SessionFactory>(factory: &F, if_not_exists: bool) -> Result<()> {
    let mut session = factory.open()?;
    let created = create_event_table(&mut session, if_not_exists);
    if let Err(err) = session.close() {
        warn!(error = %err, "failed to close session");
    }
    created
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the table cannot be
/// created (including when it exists and `--if-not-exists` was not given).
pub fn execute(config: &RaceConfig, args: &InitArgs, json: bool) -> Result<()> {
    init_with(&pg_factory(config)?, args.if_not_exists)?;

    if json {
        return print_json(&InitOutput {
            table: "event",
            if_not_exists: args.if_not_exists,
        });
    }
    println!("Initialized event table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryDatabase;

    #[test]
    fn test_init_with_memory_engine() {
        let db = MemoryDatabase::new();
        init_with(&db, true).unwrap();
        assert_eq!(db.open_sessions(), 0);
    }

    #[test]
    fn test_init_twice_needs_if_not_exists() {
        let db = MemoryDatabase::new();
        init_with(&db, false).unwrap();
        assert!(init_with(&db, false).is_err());
        init_with(&db, true).unwrap();
        assert_eq!(db.open_sessions(), 0);
    }

    #[test]
    fn test_init_connect_failure_propagates() {
        let db = MemoryDatabase::new();
        db.fail_next_connects(1);
        assert!(init_with(&db, false).is_err());
    }
}
