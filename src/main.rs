//! `upsert-race` - race concurrent upserts against PostgreSQL and verify the
//! newest version wins.

use upsert_race::run;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
