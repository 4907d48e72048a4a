//! Configuration management for `upsert_race`.
//!
//! Layers, lowest precedence first:
//! - built-in defaults
//! - a YAML file passed with `--config`
//! - `UPSERT_RACE_*` environment variables
//! - command-line flags ([`CliOverrides`])

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use upsert_model::{EventRow, EventValidator, IsolationLevel};
use uuid::Uuid;

use crate::error::{RaceError, Result};
use crate::race::{RacePlan, StartGate, SubmissionOrder};

pub const ENV_DATABASE_URL: &str = "UPSERT_RACE_DATABASE_URL";
pub const ENV_USER: &str = "UPSERT_RACE_USER";
pub const ENV_PASSWORD: &str = "UPSERT_RACE_PASSWORD";
pub const ENV_ISOLATION: &str = "UPSERT_RACE_ISOLATION";

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/postgres";
pub const DEFAULT_WRITERS: usize = 100;
pub const DEFAULT_NAME: &str = "First event";
pub const DEFAULT_DELAY_MS: u64 = 200;

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaceConfig {
    pub database: DatabaseConfig,
    pub race: RaceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            user: None,
            password: None,
            connect_timeout_ms: None,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// How writers are held back before running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GateMode {
    /// Sleep `delay_ms` in every writer.
    #[default]
    Delay,
    /// Release all writers together once every one is waiting.
    Barrier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OrderMode {
    #[default]
    Shuffled,
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaceSettings {
    pub writers: usize,
    pub name: String,
    pub isolation: IsolationLevel,
    pub gate: GateMode,
    pub delay_ms: u64,
    pub order: OrderMode,
    /// Only used with `order: shuffled`.
    pub seed: Option<u64>,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            writers: DEFAULT_WRITERS,
            name: DEFAULT_NAME.to_string(),
            isolation: IsolationLevel::default(),
            gate: GateMode::default(),
            delay_ms: DEFAULT_DELAY_MS,
            order: OrderMode::default(),
            seed: None,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub writers: Option<usize>,
    pub name: Option<String>,
    pub isolation: Option<IsolationLevel>,
    pub gate: Option<GateMode>,
    pub delay_ms: Option<u64>,
    pub order: Option<OrderMode>,
    pub seed: Option<u64>,
}

impl RaceConfig {
    /// Load every layer from the real environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, an environment
    /// value is malformed, or the merged config is invalid.
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        Self::load_with(path, overrides, |key| std::env::var(key).ok())
    }

    /// Like [`RaceConfig::load`] with an injected environment lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RaceConfig::load`].
    pub fn load_with(
        path: Option<&Path>,
        overrides: &CliOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(lookup)?;
        config.apply_overrides(overrides);
        config.validate()?;
        tracing::debug!(?path, writers = config.race.writers, "configuration loaded");
        Ok(config)
    }

    /// Parse a YAML file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Apply `UPSERT_RACE_*` variables; empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the isolation variable does not name a level.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = get(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(user) = get(ENV_USER) {
            self.database.user = Some(user);
        }
        if let Some(password) = get(ENV_PASSWORD) {
            self.database.password = Some(password);
        }
        if let Some(isolation) = get(ENV_ISOLATION) {
            self.race.isolation = isolation.parse()?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        let CliOverrides {
            database_url,
            user,
            password,
            writers,
            name,
            isolation,
            gate,
            delay_ms,
            order,
            seed,
        } = overrides.clone();

        if let Some(url) = database_url {
            self.database.url = url;
        }
        if user.is_some() {
            self.database.user = user;
        }
        if password.is_some() {
            self.database.password = password;
        }
        if let Some(writers) = writers {
            self.race.writers = writers;
        }
        if let Some(name) = name {
            self.race.name = name;
        }
        if let Some(isolation) = isolation {
            self.race.isolation = isolation;
        }
        if let Some(gate) = gate {
            self.race.gate = gate;
        }
        if let Some(delay_ms) = delay_ms {
            self.race.delay_ms = delay_ms;
        }
        if let Some(order) = order {
            self.race.order = order;
        }
        if seed.is_some() {
            self.race.seed = seed;
        }
    }

    /// # Errors
    ///
    /// Returns `RaceError::Config` if there are no writers or the URL is
    /// empty, and `RaceError::Model` if the name does not fit the column.
    pub fn validate(&self) -> Result<()> {
        if self.race.writers == 0 {
            return Err(RaceError::config("race.writers must be at least 1"));
        }
        if i64::try_from(self.race.writers).is_err() {
            return Err(RaceError::config("race.writers is too large"));
        }
        if self.database.url.trim().is_empty() {
            return Err(RaceError::config("database.url must not be empty"));
        }
        // Any non-nil id works for checking the name.
        EventValidator::check(&EventRow::new(Uuid::from_u128(1), self.race.name.clone(), 1))?;
        Ok(())
    }

    #[must_use]
    pub fn start_gate(&self) -> StartGate {
        match self.race.gate {
            GateMode::Delay => StartGate::Delay(Duration::from_millis(self.race.delay_ms)),
            GateMode::Barrier => StartGate::Barrier,
        }
    }

    #[must_use]
    pub fn submission_order(&self) -> SubmissionOrder {
        match (self.race.order, self.race.seed) {
            (OrderMode::Shuffled, None) => SubmissionOrder::Shuffled,
            (OrderMode::Shuffled, Some(seed)) => SubmissionOrder::ShuffledWithSeed(seed),
            (OrderMode::Ascending, _) => SubmissionOrder::Ascending,
            (OrderMode::Descending, _) => SubmissionOrder::Descending,
        }
    }

    /// Race plan for key `id` with these settings.
    #[must_use]
    pub fn plan(&self, id: Uuid) -> RacePlan {
        RacePlan::new(id, self.race.name.clone(), self.race.writers)
            .with_isolation(self.race.isolation)
            .with_gate(self.start_gate())
            .with_order(self.submission_order())
    }
}
