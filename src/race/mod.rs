//! Race orchestration: N writers upserting versions 1..=N of one key.
//!
//! Every writer gets its own session (autocommit off, the plan's isolation
//! level) and its own OS thread. Writers are held at a start gate so they
//! hit the database together, and [`run_race`] returns only after every
//! thread has finished and released its session.

mod gate;

use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{error, info, warn};
use upsert_model::{EventRow, IsolationLevel};
use uuid::Uuid;

use crate::error::{RaceError, Result};
use crate::session::{Session, SessionFactory};
use crate::upserter::{UpsertOutcome, Upserter};

pub use gate::StartGate;
use gate::Gate;

/// Order in which writers are handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionOrder {
    /// Random permutation; a seed makes it reproducible.
    #[default]
    Shuffled,
    ShuffledWithSeed(u64),
    Ascending,
    Descending,
}

/// Everything a race needs besides the session factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RacePlan {
    pub id: Uuid,
    pub name: String,
    pub writers: usize,
    pub isolation: IsolationLevel,
    pub gate: StartGate,
    pub order: SubmissionOrder,
}

impl RacePlan {
    /// Shuffled writers at read committed behind a 200 ms delay.
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>, writers: usize) -> Self {
        Self {
            id,
            name: name.into(),
            writers,
            isolation: IsolationLevel::default(),
            gate: StartGate::default(),
            order: SubmissionOrder::default(),
        }
    }

    #[must_use]
    pub const fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub const fn with_gate(mut self, gate: StartGate) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub const fn with_order(mut self, order: SubmissionOrder) -> Self {
        self.order = order;
        self
    }

    /// Highest version any writer submits.
    ///
    /// # Errors
    ///
    /// Returns `RaceError::Config` if the writer count does not fit in `i64`.
    pub fn max_version(&self) -> Result<i64> {
        i64::try_from(self.writers)
            .map_err(|_| RaceError::config(format!("too many writers: {}", self.writers)))
    }

    /// The row the verifier expects after the race.
    ///
    /// # Errors
    ///
    /// Same as [`RacePlan::max_version`].
    pub fn expected_row(&self) -> Result<EventRow> {
        Ok(EventRow::new(self.id, self.name.clone(), self.max_version()?))
    }
}

/// How one writer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterStatus {
    Committed,
    RolledBack,
    /// The worker thread could not be started.
    NotStarted,
    /// The worker thread panicked.
    Panicked,
}

impl From<UpsertOutcome> for WriterStatus {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Committed => Self::Committed,
            UpsertOutcome::RolledBack => Self::RolledBack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterReport {
    pub version: i64,
    pub status: WriterStatus,
}

/// Per-writer outcomes of one race, in dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct RaceReport {
    pub id: Uuid,
    pub name: String,
    pub isolation: IsolationLevel,
    pub writers: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcomes: Vec<WriterReport>,
}

impl RaceReport {
    fn count(&self, status: WriterStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|report| report.status == status)
            .count()
    }

    #[must_use]
    pub fn committed(&self) -> usize {
        self.count(WriterStatus::Committed)
    }

    /// Writers that did not commit, for any reason.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.committed()
    }

    /// The version the row must hold if monotonicity holds.
    #[must_use]
    pub fn highest_committed_version(&self) -> Option<i64> {
        self.outcomes
            .iter()
            .filter(|report| report.status == WriterStatus::Committed)
            .map(|report| report.version)
            .max()
    }

    /// Versions in the order they were dispatched.
    #[must_use]
    pub fn dispatch_order(&self) -> Vec<i64> {
        self.outcomes.iter().map(|report| report.version).collect()
    }
}

/// Open one configured session per writer and build its Upserter.
fn prepare_writers<F: SessionFactory>(
    factory: &F,
    plan: &RacePlan,
) -> Result<Vec<Upserter<F::Session>>> {
    let max_version = plan.max_version()?;
    let mut upserters = Vec::with_capacity(plan.writers);
    for version in 1..=max_version {
        let mut session = factory.open()?;
        session.set_auto_commit(false)?;
        session.set_isolation_level(plan.isolation)?;
        upserters.push(Upserter::new(session, plan.id, plan.name.clone(), version)?);
    }
    Ok(upserters)
}

fn apply_order<T>(upserters: &mut [Upserter<T>], order: SubmissionOrder)
where
    T: Session,
{
    match order {
        SubmissionOrder::Shuffled => upserters.shuffle(&mut rand::rng()),
        SubmissionOrder::ShuffledWithSeed(seed) => {
            upserters.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        SubmissionOrder::Ascending => upserters.sort_by_key(Upserter::version),
        SubmissionOrder::Descending => {
            upserters.sort_by_key(|upserter| std::cmp::Reverse(upserter.version()));
        }
    }
}

fn run_writer<S: Session>(gate: &Gate, mut upserter: Upserter<S>) -> WriterStatus {
    gate.arrive();
    let outcome = upserter.perform();
    if !outcome.is_success() {
        warn!(version = upserter.version(), "upsert failed");
    }
    upserter.close();
    outcome.into()
}

/// Race `plan.writers` Upserters on `plan.id`.
///
/// Writer failures are tallied in the report, not returned.
///
/// # Errors
///
/// Returns an error if the plan is empty, or a session cannot be opened,
/// configured, or have the upsert prepared on it. No writer has run when
/// this happens.
pub fn run_race<F: SessionFactory>(factory: &F, plan: &RacePlan) -> Result<RaceReport> {
    if plan.writers == 0 {
        return Err(RaceError::config("a race needs at least one writer"));
    }

    let mut upserters = prepare_writers(factory, plan)?;
    apply_order(&mut upserters, plan.order);

    info!(
        id = %plan.id,
        writers = plan.writers,
        isolation = %plan.isolation,
        gate = ?plan.gate,
        "starting race"
    );
    let started_at = Utc::now();
    let clock = Instant::now();
    let gate = Gate::new(plan.gate);

    let outcomes = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(upserters.len());
        let mut spawned = 0;
        for upserter in upserters {
            let version = upserter.version();
            let gate = &gate;
            let spawn = thread::Builder::new()
                .name(format!("upserter-{version}"))
                .spawn_scoped(scope, move || run_writer(gate, upserter));
            match spawn {
                Ok(handle) => {
                    spawned += 1;
                    handles.push((version, Some(handle)));
                }
                Err(err) => {
                    error!(version, error = %err, "failed to start writer thread");
                    handles.push((version, None));
                }
            }
        }

        gate.release_when_arrived(spawned);

        handles
            .into_iter()
            .map(|(version, handle)| {
                let status = match handle.map(thread::ScopedJoinHandle::join) {
                    Some(Ok(status)) => status,
                    Some(Err(_)) => {
                        error!(version, "writer thread panicked");
                        WriterStatus::Panicked
                    }
                    None => WriterStatus::NotStarted,
                };
                WriterReport { version, status }
            })
            .collect::<Vec<_>>()
    });

    let report = RaceReport {
        id: plan.id,
        name: plan.name.clone(),
        isolation: plan.isolation,
        writers: plan.writers,
        started_at,
        elapsed_ms: duration_ms(clock.elapsed()),
        outcomes,
    };
    info!(
        committed = report.committed(),
        failed = report.failed(),
        elapsed_ms = report.elapsed_ms,
        "race finished"
    );
    Ok(report)
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
