//! `upsert-model` - event rows and the reference upsert-if-newer semantics.
//!
//! Database-free building blocks shared by the harness and its tests:
//!
//! - [`model`] - the `event` row, isolation levels, bound SQL values
//! - [`table`] - an in-memory `event` table applying the guarded upsert
//! - [`validation`] - column constraints checked before a row is submitted
//! - [`error`] - error types
//!
//! # Quick Start
//!
//! ```
//! use upsert_model::{EventRow, EventTable};
//! use uuid::Uuid;
//!
//! let id = Uuid::new_v4();
//! let mut table = EventTable::new();
//! table.upsert_if_newer(&EventRow::new(id, "First event", 2));
//! table.upsert_if_newer(&EventRow::new(id, "First event", 1));
//! assert_eq!(table.get(&id).map(|row| row.version), Some(2));
//! ```

pub mod error;
pub mod model;
pub mod table;
pub mod validation;

pub use error::{ModelError, Result, ValidationError};
pub use model::{EventRow, IsolationLevel, MAX_NAME_CHARS, SqlType, SqlValue};
pub use table::{EventTable, GuardedUpsert, UpsertEffect};
pub use validation::EventValidator;
