//! Command-line interface for `upsert_race`.
//!
//! This module provides the CLI parsing and command routing using clap.

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use upsert_model::IsolationLevel;
use uuid::Uuid;

use crate::config::{CliOverrides, GateMode, OrderMode, RaceConfig};
use crate::logging;

/// `upsert-race` - concurrent upsert-if-newer harness.
#[derive(Parser, Debug)]
#[command(name = "upsert-race")]
#[command(
    author,
    version,
    about = "Race N writers upserting versions 1..N of one row and verify the newest wins",
    long_about = None
)]
pub struct Cli {
    /// Output format: text (default) or json
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// YAML configuration file
    #[arg(long, global = true, env = "UPSERT_RACE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Connection flags shared by every command.
#[derive(Args, Debug, Default)]
pub struct DatabaseArgs {
    /// PostgreSQL connection URL
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Database user (overrides the URL)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Database password (overrides the URL)
    #[arg(long, global = true)]
    pub password: Option<String>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the event table
    Init(InitArgs),

    /// Run one conditional upsert
    Upsert(UpsertArgs),

    /// Print stored events
    Show(ShowArgs),

    /// Race writers on a fresh key and verify the result
    Race(RaceArgs),

    /// Check connectivity, server limits and schema
    Doctor,

    /// Show version information
    Version,
}

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Succeed if the table already exists
    #[arg(long)]
    pub if_not_exists: bool,
}

#[derive(Args, Debug)]
pub struct UpsertArgs {
    /// Event id
    #[arg(long)]
    pub id: Uuid,

    /// Version to write; applied only if newer than the stored one
    #[arg(long)]
    pub version: i64,

    /// Event name (defaults to the configured name)
    #[arg(long)]
    pub name: Option<String>,

    /// Transaction isolation level
    #[arg(long)]
    pub isolation: Option<IsolationLevel>,
}

#[derive(Args, Debug, Default)]
pub struct ShowArgs {
    /// Only this event
    #[arg(long)]
    pub id: Option<Uuid>,
}

/// Where a race runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    #[default]
    Postgres,
    /// In-process table, no server needed
    Memory,
}

impl Engine {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RaceArgs {
    /// Number of concurrent writers (and the highest version)
    #[arg(short = 'n', long)]
    pub writers: Option<usize>,

    /// Event name every writer uses
    #[arg(long)]
    pub name: Option<String>,

    /// Transaction isolation level
    #[arg(long)]
    pub isolation: Option<IsolationLevel>,

    /// How writers are held back before running
    #[arg(long, value_enum)]
    pub gate: Option<GateMode>,

    /// Per-writer delay for `--gate delay`
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Dispatch order of writers
    #[arg(long, value_enum)]
    pub order: Option<OrderMode>,

    /// Seed for `--order shuffled`
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, value_enum, default_value_t = Engine::Postgres)]
    pub engine: Engine,

    /// Truncate the event table even when it holds rows
    #[arg(long)]
    pub reset: bool,

    /// List every writer in text output
    #[arg(long)]
    pub detailed: bool,
}

impl Cli {
    /// Command-line layer of the configuration.
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides {
            database_url: self.database.database_url.clone(),
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            ..CliOverrides::default()
        };
        match &self.command {
            Some(Commands::Race(race)) => {
                overrides.writers = race.writers;
                overrides.name.clone_from(&race.name);
                overrides.isolation = race.isolation;
                overrides.gate = race.gate;
                overrides.delay_ms = race.delay_ms;
                overrides.order = race.order;
                overrides.seed = race.seed;
            }
            Some(Commands::Upsert(upsert)) => {
                overrides.name.clone_from(&upsert.name);
                overrides.isolation = upsert.isolation;
            }
            _ => {}
        }
        overrides
    }
}

/// Run the CLI.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the command fails.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet, cli.json)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let Some(command) = &cli.command else {
        println!("upsert-race - concurrent upsert-if-newer harness. Use --help for usage.");
        return Ok(());
    };

    if matches!(command, Commands::Version) {
        return Ok(commands::version::execute(cli.json)?);
    }

    let config = RaceConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("failed to load configuration")?;

    match command {
        Commands::Init(args) => commands::init::execute(&config, args, cli.json)?,
        Commands::Upsert(args) => commands::upsert::execute(&config, args, cli.json)?,
        Commands::Show(args) => commands::show::execute(&config, args, cli.json)?,
        Commands::Race(args) => commands::race::execute(&config, args, cli.json)?,
        Commands::Doctor => commands::doctor::execute(&config, cli.json)?,
        Commands::Version => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_race_flags_become_overrides() {
        let cli = Cli::parse_from([
            "upsert-race",
            "race",
            "--writers",
            "12",
            "--isolation",
            "serializable",
            "--gate",
            "barrier",
            "--order",
            "descending",
            "--engine",
            "memory",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.writers, Some(12));
        assert_eq!(overrides.isolation, Some(IsolationLevel::Serializable));
        assert_eq!(overrides.gate, Some(GateMode::Barrier));
        assert_eq!(overrides.order, Some(OrderMode::Descending));
        let Some(Commands::Race(race)) = &cli.command else {
            panic!("expected race command");
        };
        assert_eq!(race.engine, Engine::Memory);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "upsert-race",
            "show",
            "--json",
            "--database-url",
            "postgres://db/races",
            "-vv",
        ]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.overrides().database_url.as_deref(),
            Some("postgres://db/races")
        );
    }

    #[test]
    fn test_upsert_requires_id_and_version() {
        assert!(Cli::try_parse_from(["upsert-race", "upsert", "--version", "3"]).is_err());
        assert!(Cli::try_parse_from(["upsert-race", "upsert", "--id", "not-a-uuid", "--version", "3"]).is_err());
    }
}
