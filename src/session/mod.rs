//! Database sessions.
//!
//! A [`Session`] is one connection with its own transaction state. With
//! autocommit disabled the first statement after a commit or rollback opens
//! a transaction, and only an explicit [`Session::commit`] makes it durable.
//!
//! # Submodules
//!
//! - [`postgres`] - sessions over the synchronous `postgres` client
//! - [`memory`] - an in-process engine for tests and dry runs

pub mod memory;
pub mod postgres;

use upsert_model::{EventRow, IsolationLevel, SqlType, SqlValue};

use crate::error::SessionError;

pub use self::memory::{MemoryDatabase, MemorySession};
pub use self::postgres::{PgSession, PgSessionFactory};

/// A statement prepared on a session, with 1-indexed parameter binding.
pub trait PreparedStatement: Send {
    /// Declared parameter types, in order.
    fn parameter_types(&self) -> &[SqlType];

    /// Bind `value` to parameter `index` (1-indexed).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Bind` if the index is out of range or the
    /// parameter does not accept the value's type.
    fn bind(&mut self, index: usize, value: SqlValue) -> Result<(), SessionError>;
}

/// One database connection.
pub trait Session: Send {
    type Statement: PreparedStatement;

    /// # Errors
    ///
    /// Returns an error if a transaction is open.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SessionError>;

    fn auto_commit(&self) -> bool;

    /// Set the isolation level for transactions started after this call.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is open or the server rejects it.
    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), SessionError>;

    fn isolation_level(&self) -> IsolationLevel;

    /// # Errors
    ///
    /// Returns `SessionError::Prepare` if the statement is rejected.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, SessionError>;

    /// Execute a fully bound statement, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is unbound or the server fails.
    fn execute(&mut self, statement: &Self::Statement) -> Result<u64, SessionError>;

    /// Run a bound query returning `(id, name, version)` rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is unbound, the server fails, or a
    /// column cannot be decoded.
    fn query_events(&mut self, statement: &Self::Statement) -> Result<Vec<EventRow>, SessionError>;

    /// Run parameterless SQL outside of autocommit transaction tracking.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the SQL.
    fn execute_batch(&mut self, sql: &str) -> Result<(), SessionError>;

    /// # Errors
    ///
    /// Returns an error if the commit fails; the transaction is over either way.
    fn commit(&mut self) -> Result<(), SessionError>;

    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&mut self) -> Result<(), SessionError>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection did not shut down cleanly.
    fn close(self) -> Result<(), SessionError>
    where
        Self: Sized;
}

/// Opens independent sessions against one database.
pub trait SessionFactory: Sync {
    type Session: Session;

    /// # Errors
    ///
    /// Returns `SessionError::Connect` if no connection can be established.
    fn open(&self) -> Result<Self::Session, SessionError>;
}

/// A borrowed session: usable by an Upserter without giving up ownership.
/// `close` hands the session back instead of disconnecting it.
impl<S: Session> Session for &mut S {
    type Statement = S::Statement;

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SessionError> {
        (**self).set_auto_commit(enabled)
    }

    fn auto_commit(&self) -> bool {
        (**self).auto_commit()
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), SessionError> {
        (**self).set_isolation_level(level)
    }

    fn isolation_level(&self) -> IsolationLevel {
        (**self).isolation_level()
    }

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, SessionError> {
        (**self).prepare(sql)
    }

    fn execute(&mut self, statement: &Self::Statement) -> Result<u64, SessionError> {
        (**self).execute(statement)
    }

    fn query_events(&mut self, statement: &Self::Statement) -> Result<Vec<EventRow>, SessionError> {
        (**self).query_events(statement)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), SessionError> {
        (**self).execute_batch(sql)
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        (**self).rollback()
    }

    fn close(self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Typed parameter slots shared by the statement implementations.
#[derive(Debug, Clone)]
pub struct Parameters {
    types: Vec<SqlType>,
    values: Vec<Option<SqlValue>>,
}

impl Parameters {
    #[must_use]
    pub fn new(types: Vec<SqlType>) -> Self {
        let values = vec![None; types.len()];
        Self { types, values }
    }

    #[must_use]
    pub fn types(&self) -> &[SqlType] {
        &self.types
    }

    /// Bind a value to a 1-indexed slot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Bind` on an out-of-range index or type mismatch.
    pub fn bind(&mut self, index: usize, value: SqlValue) -> Result<(), SessionError> {
        let Some(expected) = index
            .checked_sub(1)
            .and_then(|slot| self.types.get(slot))
            .copied()
        else {
            return Err(SessionError::Bind {
                index,
                reason: format!("statement has {} parameter(s)", self.types.len()),
            });
        };
        if value.sql_type() != expected {
            return Err(SessionError::Bind {
                index,
                reason: format!("expected {expected}, got {}", value.sql_type()),
            });
        }
        self.values[index - 1] = Some(value);
        Ok(())
    }

    /// All bound values in order.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Bind` naming the first unbound parameter.
    pub fn values(&self) -> Result<Vec<&SqlValue>, SessionError> {
        self.values
            .iter()
            .enumerate()
            .map(|(slot, value)| {
                value.as_ref().ok_or_else(|| SessionError::Bind {
                    index: slot + 1,
                    reason: "parameter is not bound".to_string(),
                })
            })
            .collect()
    }
}

/// Collapse whitespace so statement text can be compared structurally.
#[must_use]
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_bind_is_one_indexed() {
        let mut params = Parameters::new(vec![SqlType::Uuid, SqlType::BigInt]);
        params.bind(1, SqlValue::Uuid(Uuid::new_v4())).unwrap();
        params.bind(2, SqlValue::BigInt(3)).unwrap();
        assert_eq!(params.values().unwrap().len(), 2);
    }

    #[test]
    fn test_bind_rejects_index_zero_and_overflow() {
        let mut params = Parameters::new(vec![SqlType::Text]);
        assert!(matches!(
            params.bind(0, SqlValue::Text("a".into())),
            Err(SessionError::Bind { index: 0, .. })
        ));
        assert!(matches!(
            params.bind(2, SqlValue::Text("a".into())),
            Err(SessionError::Bind { index: 2, .. })
        ));
    }

    #[test]
    fn test_bind_rejects_wrong_type() {
        let mut params = Parameters::new(vec![SqlType::BigInt]);
        let err = params.bind(1, SqlValue::Text("1".into())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bind failed for parameter $1: expected bigint, got text"
        );
    }

    #[test]
    fn test_values_reports_first_unbound() {
        let mut params = Parameters::new(vec![SqlType::Text, SqlType::Text]);
        params.bind(1, SqlValue::Text("a".into())).unwrap();
        assert!(matches!(
            params.values(),
            Err(SessionError::Bind { index: 2, .. })
        ));
    }

    #[test]
    fn test_normalize_sql() {
        assert_eq!(
            normalize_sql("SELECT id,\n   name\tFROM event ;"),
            "SELECT id, name FROM event"
        );
    }
}
