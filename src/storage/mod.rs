//! `event` table access for `upsert_race`.
//!
//! Fixture glue around the race: schema creation, truncation between runs,
//! and reads used by the verifier and the `show` command.
//!
//! # Submodules
//!
//! - [`events`] - schema DDL and row reads

pub mod events;

pub use events::{
    EVENT_TABLE_SCHEMA, EVENT_TABLE_SCHEMA_IF_NOT_EXISTS, SELECT_EVENT_BY_ID_SQL,
    SELECT_EVENTS_SQL, TRUNCATE_EVENTS_SQL, create_event_table, read_all_events, read_event,
    truncate_events,
};
