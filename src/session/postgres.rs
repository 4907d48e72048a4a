//! PostgreSQL sessions over the synchronous `postgres` client.
//!
//! The client itself always runs in autocommit mode, so transactions are
//! driven with explicit `BEGIN` / `COMMIT` / `ROLLBACK`. The isolation level
//! is a session characteristic and applies to every later `BEGIN`.

use std::time::Duration;

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row};
use upsert_model::{EventRow, IsolationLevel, SqlType, SqlValue};

use crate::error::SessionError;
use crate::session::{Parameters, PreparedStatement, Session, SessionFactory};

/// Opens sessions against one PostgreSQL database.
#[derive(Clone)]
pub struct PgSessionFactory {
    config: postgres::Config,
}

impl std::fmt::Debug for PgSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // postgres::Config's Debug redacts the password.
        f.debug_struct("PgSessionFactory")
            .field("config", &self.config)
            .finish()
    }
}

impl PgSessionFactory {
    /// Build a factory for `url`, overriding its credentials when given.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Connect` if the URL cannot be parsed.
    pub fn new(url: &str, user: Option<&str>, password: Option<&str>) -> Result<Self, SessionError> {
        let mut config = url
            .parse::<postgres::Config>()
            .map_err(|err| SessionError::Connect(format!("invalid database url: {err}")))?;
        if let Some(user) = user {
            config.user(user);
        }
        if let Some(password) = password {
            config.password(password);
        }
        Ok(Self { config })
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout(timeout);
        self
    }

    /// Raw client for diagnostics that sit outside the session model.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Connect` if the connection fails.
    pub fn connect_client(&self) -> Result<Client, SessionError> {
        self.config
            .connect(NoTls)
            .map_err(|err| SessionError::Connect(err.to_string()))
    }
}

impl SessionFactory for PgSessionFactory {
    type Session = PgSession;

    fn open(&self) -> Result<PgSession, SessionError> {
        let client = self.connect_client()?;
        Ok(PgSession::new(client))
    }
}

/// A prepared statement plus its bound parameters.
pub struct PgStatement {
    inner: postgres::Statement,
    params: Parameters,
}

impl PreparedStatement for PgStatement {
    fn parameter_types(&self) -> &[SqlType] {
        self.params.types()
    }

    fn bind(&mut self, index: usize, value: SqlValue) -> Result<(), SessionError> {
        self.params.bind(index, value)
    }
}

impl PgStatement {
    fn bound_values(&self) -> Result<Vec<&(dyn ToSql + Sync)>, SessionError> {
        Ok(self
            .params
            .values()?
            .into_iter()
            .map(|value| -> &(dyn ToSql + Sync) {
                match value {
                    SqlValue::Uuid(id) => id,
                    SqlValue::Text(text) => text,
                    SqlValue::BigInt(number) => number,
                }
            })
            .collect())
    }
}

/// One PostgreSQL connection.
pub struct PgSession {
    client: Client,
    auto_commit: bool,
    isolation: IsolationLevel,
    in_transaction: bool,
}

impl PgSession {
    /// Wrap a connected client. Sessions start in autocommit mode at the
    /// server's default isolation level.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            auto_commit: true,
            isolation: IsolationLevel::default(),
            in_transaction: false,
        }
    }

    fn begin_if_needed(&mut self) -> Result<(), SessionError> {
        if self.auto_commit || self.in_transaction {
            return Ok(());
        }
        self.client
            .batch_execute("BEGIN")
            .map_err(|err| pg_error("begin", &err))?;
        self.in_transaction = true;
        Ok(())
    }

    fn ensure_idle(&self, what: &str) -> Result<(), SessionError> {
        if self.in_transaction {
            return Err(SessionError::State(format!(
                "cannot change {what} while a transaction is open"
            )));
        }
        Ok(())
    }
}

impl Session for PgSession {
    type Statement = PgStatement;

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.ensure_idle("autocommit")?;
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), SessionError> {
        self.ensure_idle("isolation level")?;
        self.client
            .batch_execute(&format!(
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                level.as_sql()
            ))
            .map_err(|err| pg_error("set isolation level", &err))?;
        self.isolation = level;
        Ok(())
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn prepare(&mut self, sql: &str) -> Result<PgStatement, SessionError> {
        let inner = self
            .client
            .prepare(sql)
            .map_err(|err| SessionError::Prepare(err.to_string()))?;
        let types = inner
            .params()
            .iter()
            .enumerate()
            .map(|(slot, ty)| {
                sql_type_of(ty).ok_or_else(|| {
                    SessionError::Prepare(format!(
                        "parameter ${} has unsupported type {ty}",
                        slot + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PgStatement {
            inner,
            params: Parameters::new(types),
        })
    }

    fn execute(&mut self, statement: &PgStatement) -> Result<u64, SessionError> {
        let values = statement.bound_values()?;
        self.begin_if_needed()?;
        self.client
            .execute(&statement.inner, &values)
            .map_err(|err| pg_error("execute", &err))
    }

    fn query_events(&mut self, statement: &PgStatement) -> Result<Vec<EventRow>, SessionError> {
        let values = statement.bound_values()?;
        self.begin_if_needed()?;
        let rows = self
            .client
            .query(&statement.inner, &values)
            .map_err(|err| pg_error("query", &err))?;
        rows.iter().map(event_from_row).collect()
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), SessionError> {
        self.client
            .batch_execute(sql)
            .map_err(|err| pg_error("execute batch", &err))
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        if self.auto_commit {
            return Err(SessionError::State(
                "commit called with autocommit enabled".to_string(),
            ));
        }
        if !self.in_transaction {
            return Ok(());
        }
        // A failed COMMIT still ends the transaction.
        self.in_transaction = false;
        self.client
            .batch_execute("COMMIT")
            .map_err(|err| pg_error("commit", &err))
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        if self.auto_commit {
            return Err(SessionError::State(
                "rollback called with autocommit enabled".to_string(),
            ));
        }
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client
            .batch_execute("ROLLBACK")
            .map_err(|err| pg_error("rollback", &err))
    }

    fn close(self) -> Result<(), SessionError> {
        self.client
            .close()
            .map_err(|err| pg_error("close", &err))
    }
}

fn sql_type_of(ty: &Type) -> Option<SqlType> {
    match *ty {
        Type::UUID => Some(SqlType::Uuid),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Some(SqlType::Text),
        Type::INT8 => Some(SqlType::BigInt),
        _ => None,
    }
}

fn event_from_row(row: &Row) -> Result<EventRow, SessionError> {
    let decode = |err: postgres::Error| pg_error("decode row", &err);
    Ok(EventRow {
        id: row.try_get("id").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        version: row.try_get("version").map_err(decode)?,
    })
}

fn pg_error(operation: &'static str, err: &postgres::Error) -> SessionError {
    let message = err
        .as_db_error()
        .map_or_else(|| err.to_string(), |db| db.message().to_string());
    SessionError::Database {
        operation,
        code: err.code().map(|state| state.code().to_string()),
        message,
    }
}
