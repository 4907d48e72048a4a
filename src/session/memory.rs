//! In-process engine for the harness statements.
//!
//! `MemoryDatabase` holds one shared [`EventTable`]. Each `MemorySession`
//! stages its writes while a transaction is open and applies them under the
//! table lock on commit, so concurrent sessions race the same way writers
//! do against a server, minus the network.
//!
//! Only the statements the harness issues are understood; anything else is
//! rejected at prepare time. Faults can be injected to exercise failure
//! paths: each counter fails that many upcoming calls.
//!
//! Differences from a server:
//! - rows are readable and writable before `CREATE TABLE` runs; only a
//!   second plain `CREATE TABLE` fails
//! - a transactional upsert counts affected rows against the last committed
//!   table, without waiting on concurrent writers

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use upsert_model::{
    EventRow, EventTable, EventValidator, GuardedUpsert, IsolationLevel, SqlType, SqlValue,
};

use crate::error::{SERIALIZATION_FAILURE, SessionError};
use crate::session::{Parameters, PreparedStatement, Session, SessionFactory, normalize_sql};
use crate::storage::{
    EVENT_TABLE_SCHEMA, EVENT_TABLE_SCHEMA_IF_NOT_EXISTS, SELECT_EVENT_BY_ID_SQL,
    SELECT_EVENTS_SQL, TRUNCATE_EVENTS_SQL,
};
use crate::upserter::UPSERT_SQL;

/// SQLSTATE for a value too long for its column.
const STRING_TOO_LONG: &str = "22001";
/// SQLSTATE for a character the encoding cannot store.
const INVALID_CHARACTER: &str = "22021";
/// SQLSTATE for `CREATE TABLE` on an existing table.
const DUPLICATE_TABLE: &str = "42P07";

/// Shared in-memory database. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    table: Mutex<EventTable>,
    table_created: AtomicBool,
    faults: Faults,
    open_sessions: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    connect: AtomicUsize,
    prepare: AtomicUsize,
    execute: AtomicUsize,
    commit: AtomicUsize,
    rollback: AtomicUsize,
    close: AtomicUsize,
}

/// Reject names the `event` columns cannot hold, as the server does at
/// execute time.
fn check_columns(upsert: &GuardedUpsert) -> Result<(), SessionError> {
    let update = EventRow::new(
        upsert.insert.id,
        upsert.update_name.clone(),
        upsert.update_version,
    );
    for row in [&upsert.insert, &update] {
        if let Err(errors) = EventValidator::validate(row) {
            let code = if row.name.contains('\0') {
                INVALID_CHARACTER
            } else {
                STRING_TOO_LONG
            };
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SessionError::Database {
                operation: "execute",
                code: Some(code.to_string()),
                message,
            });
        }
    }
    Ok(())
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session (autocommit on, read committed).
    #[must_use]
    pub fn session(&self) -> MemorySession {
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        MemorySession {
            db: self.clone(),
            auto_commit: true,
            isolation: IsolationLevel::default(),
            pending: Vec::new(),
            in_transaction: false,
        }
    }

    /// Commit `row` directly, as an earlier writer would have.
    pub fn seed(&self, row: &EventRow) {
        self.table().upsert_if_newer(row);
    }

    /// Copy of the committed table.
    #[must_use]
    pub fn snapshot(&self) -> EventTable {
        self.table().clone()
    }

    /// Sessions opened and not yet closed or dropped.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.inner.faults.connect.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_prepares(&self, count: usize) {
        self.inner.faults.prepare.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_executes(&self, count: usize) {
        self.inner.faults.execute.store(count, Ordering::SeqCst);
    }

    /// Failed commits report a serialization failure.
    pub fn fail_next_commits(&self, count: usize) {
        self.inner.faults.commit.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_rollbacks(&self, count: usize) {
        self.inner.faults.rollback.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_closes(&self, count: usize) {
        self.inner.faults.close.store(count, Ordering::SeqCst);
    }

    fn table(&self) -> MutexGuard<'_, EventTable> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionFactory for MemoryDatabase {
    type Session = MemorySession;

    fn open(&self) -> Result<MemorySession, SessionError> {
        if take_fault(&self.inner.faults.connect) {
            return Err(SessionError::Connect("injected connect failure".to_string()));
        }
        Ok(self.session())
    }
}

/// Statements the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Upsert,
    SelectAll,
    SelectById,
    CreateTable,
    CreateTableIfNotExists,
    Truncate,
}

impl StatementKind {
    fn recognize(sql: &str) -> Option<Self> {
        let sql = normalize_sql(sql);
        [
            (UPSERT_SQL, Self::Upsert),
            (SELECT_EVENTS_SQL, Self::SelectAll),
            (SELECT_EVENT_BY_ID_SQL, Self::SelectById),
            (EVENT_TABLE_SCHEMA, Self::CreateTable),
            (EVENT_TABLE_SCHEMA_IF_NOT_EXISTS, Self::CreateTableIfNotExists),
            (TRUNCATE_EVENTS_SQL, Self::Truncate),
        ]
        .into_iter()
        .find(|(known, _)| normalize_sql(known).eq_ignore_ascii_case(&sql))
        .map(|(_, kind)| kind)
    }

    fn parameter_types(self) -> Vec<SqlType> {
        match self {
            Self::Upsert => vec![
                SqlType::Uuid,
                SqlType::Text,
                SqlType::BigInt,
                SqlType::Text,
                SqlType::BigInt,
                SqlType::BigInt,
            ],
            Self::SelectById => vec![SqlType::Uuid],
            Self::SelectAll | Self::CreateTable | Self::CreateTableIfNotExists | Self::Truncate => {
                Vec::new()
            }
        }
    }
}

pub struct MemoryStatement {
    kind: StatementKind,
    params: Parameters,
}

impl PreparedStatement for MemoryStatement {
    fn parameter_types(&self) -> &[SqlType] {
        self.params.types()
    }

    fn bind(&mut self, index: usize, value: SqlValue) -> Result<(), SessionError> {
        self.params.bind(index, value)
    }
}

impl MemoryStatement {
    fn guarded_upsert(&self) -> Result<GuardedUpsert, SessionError> {
        let values = self.params.values()?;
        // Types were checked at bind time.
        let text = |slot: usize| values[slot].as_text().unwrap_or_default().to_string();
        let number = |slot: usize| values[slot].as_bigint().unwrap_or_default();
        Ok(GuardedUpsert {
            insert: EventRow {
                id: values[0].as_uuid().unwrap_or_default(),
                name: text(1),
                version: number(2),
            },
            update_name: text(3),
            update_version: number(4),
            guard_version: number(5),
        })
    }
}

/// One session on a [`MemoryDatabase`].
pub struct MemorySession {
    db: MemoryDatabase,
    auto_commit: bool,
    isolation: IsolationLevel,
    pending: Vec<GuardedUpsert>,
    in_transaction: bool,
}

impl MemorySession {
    /// Committed rows with this session's staged writes applied on top.
    fn visible_table(&self) -> EventTable {
        let mut view = self.db.snapshot();
        for upsert in &self.pending {
            view.apply(upsert);
        }
        view
    }

    fn run_ddl(&self, kind: StatementKind) -> Result<(), SessionError> {
        let created = &self.db.inner.table_created;
        match kind {
            StatementKind::CreateTable => {
                if created.swap(true, Ordering::SeqCst) {
                    return Err(SessionError::Database {
                        operation: "execute",
                        code: Some(DUPLICATE_TABLE.to_string()),
                        message: "relation \"event\" already exists".to_string(),
                    });
                }
            }
            StatementKind::CreateTableIfNotExists => created.store(true, Ordering::SeqCst),
            StatementKind::Truncate => self.db.table().clear(),
            StatementKind::Upsert | StatementKind::SelectAll | StatementKind::SelectById => {}
        }
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

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.db.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session for MemorySession {
    type Statement = MemoryStatement;

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
        self.isolation = level;
        Ok(())
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn prepare(&mut self, sql: &str) -> Result<MemoryStatement, SessionError> {
        if take_fault(&self.db.inner.faults.prepare) {
            return Err(SessionError::Prepare("injected prepare failure".to_string()));
        }
        let kind = StatementKind::recognize(sql)
            .ok_or_else(|| SessionError::Prepare(format!("unsupported statement: {sql}")))?;
        Ok(MemoryStatement {
            kind,
            params: Parameters::new(kind.parameter_types()),
        })
    }

    fn execute(&mut self, statement: &MemoryStatement) -> Result<u64, SessionError> {
        if take_fault(&self.db.inner.faults.execute) {
            return Err(SessionError::database("execute", "injected execute failure"));
        }
        match statement.kind {
            StatementKind::Upsert => {
                let upsert = statement.guarded_upsert()?;
                check_columns(&upsert)?;
                if self.auto_commit {
                    return Ok(self.db.table().apply(&upsert).rows_affected());
                }
                self.in_transaction = true;
                let effect = self.visible_table().effect_of(&upsert);
                self.pending.push(upsert);
                Ok(effect.rows_affected())
            }
            kind @ (StatementKind::CreateTable
            | StatementKind::CreateTableIfNotExists
            | StatementKind::Truncate) => {
                self.run_ddl(kind)?;
                Ok(0)
            }
            StatementKind::SelectAll | StatementKind::SelectById => Err(
                SessionError::database("execute", "query statements return rows; use query_events"),
            ),
        }
    }

    fn query_events(&mut self, statement: &MemoryStatement) -> Result<Vec<EventRow>, SessionError> {
        let values = statement.params.values()?;
        if !self.auto_commit {
            self.in_transaction = true;
        }
        let view = self.visible_table();
        match statement.kind {
            StatementKind::SelectAll => Ok(view.rows().cloned().collect()),
            StatementKind::SelectById => {
                let id = values[0].as_uuid().unwrap_or_default();
                Ok(view.get(&id).cloned().into_iter().collect())
            }
            _ => Err(SessionError::database(
                "query",
                "statement does not return rows",
            )),
        }
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), SessionError> {
        match StatementKind::recognize(sql) {
            Some(
                kind @ (StatementKind::CreateTable
                | StatementKind::CreateTableIfNotExists
                | StatementKind::Truncate),
            ) => self.run_ddl(kind),
            _ => Err(SessionError::database(
                "execute batch",
                format!("unsupported statement: {sql}"),
            )),
        }
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        if self.auto_commit {
            return Err(SessionError::State(
                "commit called with autocommit enabled".to_string(),
            ));
        }
        let pending = std::mem::take(&mut self.pending);
        self.in_transaction = false;
        if take_fault(&self.db.inner.faults.commit) {
            return Err(SessionError::Database {
                operation: "commit",
                code: Some(SERIALIZATION_FAILURE.to_string()),
                message: "injected serialization failure".to_string(),
            });
        }
        let mut table = self.db.table();
        for upsert in &pending {
            table.apply(upsert);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        if self.auto_commit {
            return Err(SessionError::State(
                "rollback called with autocommit enabled".to_string(),
            ));
        }
        self.pending.clear();
        self.in_transaction = false;
        if take_fault(&self.db.inner.faults.rollback) {
            return Err(SessionError::database("rollback", "injected rollback failure"));
        }
        Ok(())
    }

    fn close(self) -> Result<(), SessionError> {
        if take_fault(&self.db.inner.faults.close) {
            return Err(SessionError::database("close", "injected close failure"));
        }
        Ok(())
    }
}
