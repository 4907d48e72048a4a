//! Schema and reads for the `event` table.

use upsert_model::{EventRow, SqlValue};
use uuid::Uuid;

use crate::error::{RaceError, Result};
use crate::session::{PreparedStatement, Session};

/// DDL for the `event` table.
pub const EVENT_TABLE_SCHEMA: &str = "CREATE TABLE event (
    id UUID PRIMARY KEY,
    name varchar(255) NOT NULL,
    version bigint NOT NULL DEFAULT 0
)";

pub const EVENT_TABLE_SCHEMA_IF_NOT_EXISTS: &str = "CREATE TABLE IF NOT EXISTS event (
    id UUID PRIMARY KEY,
    name varchar(255) NOT NULL,
    version bigint NOT NULL DEFAULT 0
)";

pub const TRUNCATE_EVENTS_SQL: &str = "TRUNCATE TABLE event";

/// Every row, as the verifier reads them.
pub const SELECT_EVENTS_SQL: &str = "SELECT id, name, version FROM event";

pub const SELECT_EVENT_BY_ID_SQL: &str = "SELECT id, name, version FROM event WHERE id = $1";

/// Create the `event` table.
///
/// # Errors
///
/// Returns an error if the table exists and `if_not_exists` is false, or
/// the server rejects the DDL.
pub fn create_event_table<S: Session>(session: &mut S, if_not_exists: bool) -> Result<()> {
    let ddl = if if_not_exists {
        EVENT_TABLE_SCHEMA_IF_NOT_EXISTS
    } else {
        EVENT_TABLE_SCHEMA
    };
    session.execute_batch(ddl)?;
    tracing::debug!(if_not_exists, "event table created");
    Ok(())
}

/// Remove every row from the `event` table.
///
/// # Errors
///
/// Returns an error if the server rejects the statement.
pub fn truncate_events<S: Session>(session: &mut S) -> Result<()> {
    session.execute_batch(TRUNCATE_EVENTS_SQL)?;
    tracing::debug!("event table truncated");
    Ok(())
}

/// Read all rows.
///
/// # Errors
///
/// Returns an error if the query cannot be prepared or run.
pub fn read_all_events<S: Session>(session: &mut S) -> Result<Vec<EventRow>> {
    let statement = session.prepare(SELECT_EVENTS_SQL)?;
    Ok(session.query_events(&statement)?)
}

/// Read the row for `id`, if any.
///
/// # Errors
///
/// Returns an error if the query cannot be prepared, bound, or run.
pub fn read_event<S: Session>(session: &mut S, id: Uuid) -> Result<Option<EventRow>> {
    let mut statement = session.prepare(SELECT_EVENT_BY_ID_SQL)?;
    statement
        .bind(1, SqlValue::Uuid(id))
        .map_err(|source| RaceError::invalid_configuration("failed to bind event id", source))?;
    let mut rows = session.query_events(&statement)?;
    Ok(rows.pop())
}
