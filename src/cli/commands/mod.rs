//! Command implementations.

pub mod doctor;
pub mod init;
pub mod race;
pub mod show;
pub mod upsert;
pub mod version;

use crate::config::RaceConfig;
use crate::error::Result;
use crate::session::PgSessionFactory;

/// PostgreSQL factory for the configured database.
pub(crate) fn pg_factory(config: &RaceConfig) -> Result<PgSessionFactory> {
    let database = &config.database;
    let mut factory = PgSessionFactory::new(
        &database.url,
        database.user.as_deref(),
        database.password.as_deref(),
    )?;
    if let Some(timeout) = database.connect_timeout() {
        factory = factory.with_connect_timeout(timeout);
    }
    Ok(factory)
}

/// Print `value` as one JSON document on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
