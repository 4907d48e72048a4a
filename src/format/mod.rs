//! Output formatting for `upsert_race`.
//!
//! Human-readable text goes to stdout by default; `--json` switches every
//! command to one JSON document on stdout.
//!
//! # JSON Output Types
//!
//! - [`UpsertResult`] - one Upserter run (upsert)
//! - [`RaceSummary`] - race report plus verification (race)

mod output;
mod text;

pub use output::{RaceSummary, UpsertResult, Verification};
pub use text::{format_race_summary, format_row_line, format_upsert_result, format_writer_icon};
