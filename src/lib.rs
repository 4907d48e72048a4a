//! `upsert_race` - concurrent upsert-if-newer harness for PostgreSQL.
//!
//! N writers each upsert one version (1..=N) of the same `event` row, every
//! writer in its own session and transaction, all released at once. The
//! guarded `INSERT ... ON CONFLICT DO UPDATE ... WHERE event.version < $6`
//! must leave exactly one row holding version N, whatever order the
//! database serializes them in.
//!
//! # Architecture
//!
//! - [`session`] - database sessions (PostgreSQL and in-memory)
//! - [`upserter`] - the one-shot conditional upsert worker
//! - [`race`] - the orchestrator running N workers concurrently
//! - [`verify`] - the post-condition check
//! - [`storage`] - `event` table schema and reads
//! - [`config`] - layered configuration
//! - [`cli`] - command-line interface using clap
//! - [`format`] - output formatting (text, JSON)
//! - [`error`] - error types

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod race;
pub mod session;
pub mod storage;
pub mod upserter;
pub mod verify;

pub use error::{Mismatch, RaceError, Result, SessionError};
pub use race::{RacePlan, RaceReport, StartGate, SubmissionOrder, WriterStatus, run_race};
pub use upserter::{UpsertOutcome, Upserter};
pub use verify::{verify_single_row, verify_with};

/// Run the CLI application.
///
/// This is the main entry point called from `main()`.
///
/// # Errors
///
/// Returns an error if command execution fails.
pub fn run() -> anyhow::Result<()> {
    cli::run()
}
