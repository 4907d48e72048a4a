//! One-shot conditional upsert worker.
//!
//! An [`Upserter`] owns one session, prepares and binds the guarded upsert
//! when constructed, runs it exactly once in [`Upserter::perform`], and
//! releases the session in [`Upserter::close`].
//!
//! The isolation level and autocommit mode are whatever the caller set on
//! the session; the Upserter never changes them. With autocommit on the
//! statement is its own transaction, so there is nothing to commit or roll
//! back.

use serde::Serialize;
use tracing::{debug, error, warn};
use upsert_model::{EventRow, SqlValue};
use uuid::Uuid;

use crate::error::{RaceError, Result, SessionError};
use crate::session::{PreparedStatement, Session};

/// Insert the row, or overwrite it only when the stored version is lower.
///
/// `$3`, `$5` and `$6` carry the same version; `$2` and `$4` the same name.
pub const UPSERT_SQL: &str = "INSERT INTO event (id, name, version) VALUES ($1, $2, $3) \
                              ON CONFLICT (id) DO UPDATE SET name = $4, version = $5 \
                              WHERE event.version < $6";

/// Result of [`Upserter::perform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// The statement ran and the transaction committed. Zero affected rows
    /// (a stale version) still counts.
    Committed,
    /// Execute or commit failed; a rollback was attempted.
    RolledBack,
}

impl UpsertOutcome {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Lifecycle of an Upserter. `Closed` is reached by consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpserterState {
    Prepared,
    Committed,
    RolledBack,
}

/// Self-contained worker upserting one version of one id.
pub struct Upserter<S: Session> {
    session: S,
    statement: S::Statement,
    row: EventRow,
    state: UpserterState,
    rows_affected: Option<u64>,
}

impl<S: Session> std::fmt::Debug for Upserter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upserter")
            .field("row", &self.row)
            .field("state", &self.state)
            .field("rows_affected", &self.rows_affected)
            .finish_non_exhaustive()
    }
}

impl<S: Session> Upserter<S> {
    /// Prepare the upsert on `session` and bind all six parameters.
    ///
    /// # Errors
    ///
    /// Returns `RaceError::InvalidConfiguration` if the statement cannot be
    /// prepared or a parameter cannot be bound. The session is dropped.
    ///
    /// Column constraints are left to the database: a name the `event`
    /// table cannot hold fails in [`Upserter::perform`].
    pub fn new(mut session: S, id: Uuid, name: impl Into<String>, version: i64) -> Result<Self> {
        let row = EventRow::new(id, name, version);
        if session.auto_commit() {
            debug!(version, "upserter session has autocommit on");
        }

        let mut statement = session.prepare(UPSERT_SQL).map_err(|source| {
            RaceError::invalid_configuration("failed to prepare upsert statement", source)
        })?;
        bind_row(&mut statement, &row).map_err(|source| {
            RaceError::invalid_configuration("failed to bind upsert parameters", source)
        })?;

        Ok(Self {
            session,
            statement,
            row,
            state: UpserterState::Prepared,
            rows_affected: None,
        })
    }

    /// Execute and commit, rolling back on failure. Never returns an error;
    /// failures are logged and reported as [`UpsertOutcome::RolledBack`].
    ///
    /// Only the first call touches the database; later calls return the
    /// recorded outcome.
    pub fn perform(&mut self) -> UpsertOutcome {
        match self.state {
            UpserterState::Prepared => {}
            UpserterState::Committed => {
                warn!(version = self.row.version, "upsert already performed");
                return UpsertOutcome::Committed;
            }
            UpserterState::RolledBack => {
                warn!(version = self.row.version, "upsert already performed");
                return UpsertOutcome::RolledBack;
            }
        }

        match self.execute_and_commit() {
            Ok(rows) => {
                self.rows_affected = Some(rows);
                self.state = UpserterState::Committed;
                debug!(
                    id = %self.row.id,
                    version = self.row.version,
                    rows_affected = rows,
                    "version inserted / updated"
                );
                UpsertOutcome::Committed
            }
            Err(err) => {
                warn!(
                    id = %self.row.id,
                    version = self.row.version,
                    error = %err,
                    "upsert failed, rolling back"
                );
                // An autocommit statement that failed applied nothing.
                let rolled_back = if self.session.auto_commit() {
                    Ok(())
                } else {
                    self.session.rollback()
                };
                if let Err(rollback_err) = rolled_back {
                    error!(
                        version = self.row.version,
                        error = %rollback_err,
                        "failure during rollback"
                    );
                }
                self.state = UpserterState::RolledBack;
                UpsertOutcome::RolledBack
            }
        }
    }

    fn execute_and_commit(&mut self) -> std::result::Result<u64, SessionError> {
        let rows = self.session.execute(&self.statement)?;
        if !self.session.auto_commit() {
            self.session.commit()?;
        }
        Ok(rows)
    }

    /// Release the session and return whether the upsert committed.
    /// A failed close is logged and does not change the result.
    pub fn close(self) -> bool {
        let Self {
            session,
            statement,
            row,
            state,
            ..
        } = self;
        drop(statement);
        if let Err(err) = session.close() {
            warn!(version = row.version, error = %err, "failed to close session");
        }
        state == UpserterState::Committed
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == UpserterState::Committed
    }

    #[must_use]
    pub const fn state(&self) -> UpserterState {
        self.state
    }

    #[must_use]
    pub const fn row(&self) -> &EventRow {
        &self.row
    }

    #[must_use]
    pub const fn version(&self) -> i64 {
        self.row.version
    }

    /// Rows the statement reported, once committed.
    ///
    /// This is the count at execute time. PostgreSQL makes a conflicting
    /// writer wait for the row lock, so its count matches what the commit
    /// applied. The in-memory engine counts against the last committed
    /// table instead, so concurrent writers may each report 1 while only
    /// the highest version ends up stored.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

fn bind_row<T: PreparedStatement>(
    statement: &mut T,
    row: &EventRow,
) -> std::result::Result<(), SessionError> {
    statement.bind(1, SqlValue::Uuid(row.id))?;

    statement.bind(2, SqlValue::Text(row.name.clone()))?;
    statement.bind(3, SqlValue::BigInt(row.version))?;

    statement.bind(4, SqlValue::Text(row.name.clone()))?;
    statement.bind(5, SqlValue::BigInt(row.version))?;

    // Guard: only overwrite a lower stored version.
    statement.bind(6, SqlValue::BigInt(row.version))
}
