//! Core data types for the `event` table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// Upper bound on `event.name`, matching the `varchar(255)` column.
pub const MAX_NAME_CHARS: usize = 255;

/// One row of the `event` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRow {
    pub id: Uuid,
    pub name: String,
    pub version: i64,
}

impl EventRow {
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>, version: i64) -> Self {
        Self {
            id,
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for EventRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?}, {})", self.id, self.name, self.version)
    }
}

/// Standard SQL transaction isolation levels.
///
/// PostgreSQL treats `ReadUncommitted` as `ReadCommitted`; both are accepted
/// so a run can be configured the same way against any server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Every level, weakest first.
    pub const ALL: [Self; 4] = [
        Self::ReadUncommitted,
        Self::ReadCommitted,
        Self::RepeatableRead,
        Self::Serializable,
    ];

    /// Keyword form used in `SET ... ISOLATION LEVEL <level>`.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "read-uncommitted",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = ModelError;

    /// Accepts `read-committed`, `read_committed`, `READ COMMITTED`, etc.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '_' | ' ' => '-',
                other => other.to_ascii_lowercase(),
            })
            .collect();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| ModelError::InvalidIsolationLevel {
                value: s.to_string(),
            })
    }
}

/// Parameter types the harness statements use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Uuid,
    Text,
    BigInt,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uuid => "uuid",
            Self::Text => "text",
            Self::BigInt => "bigint",
        })
    }
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Uuid(Uuid),
    Text(String),
    BigInt(i64),
}

impl SqlValue {
    #[must_use]
    pub const fn sql_type(&self) -> SqlType {
        match self {
            Self::Uuid(_) => SqlType::Uuid,
            Self::Text(_) => SqlType::Text,
            Self::BigInt(_) => SqlType::BigInt,
        }
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(id) => write!(f, "{id}"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::BigInt(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_parses_common_spellings() {
        for input in [
            "serializable",
            "SERIALIZABLE",
            "Serializable",
            " serializable ",
        ] {
            assert_eq!(
                input.parse::<IsolationLevel>().unwrap(),
                IsolationLevel::Serializable
            );
        }
        for input in ["read-uncommitted", "read_uncommitted", "READ UNCOMMITTED"] {
            assert_eq!(
                input.parse::<IsolationLevel>().unwrap(),
                IsolationLevel::ReadUncommitted
            );
        }
    }

    #[test]
    fn test_isolation_level_rejects_unknown() {
        let err = "snapshot".parse::<IsolationLevel>().unwrap_err();
        assert!(matches!(err, ModelError::InvalidIsolationLevel { value } if value == "snapshot"));
    }

    #[test]
    fn test_isolation_level_display_roundtrips() {
        for level in IsolationLevel::ALL {
            assert_eq!(level.to_string().parse::<IsolationLevel>().unwrap(), level);
        }
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
    }

    #[test]
    fn test_isolation_level_serde_uses_kebab_case() {
        let json = serde_json::to_string(&IsolationLevel::ReadUncommitted).unwrap();
        assert_eq!(json, "\"read-uncommitted\"");
    }

    #[test]
    fn test_sql_value_accessors() {
        let id = Uuid::new_v4();
        assert_eq!(SqlValue::Uuid(id).as_uuid(), Some(id));
        assert_eq!(SqlValue::Text("a".into()).as_text(), Some("a"));
        assert_eq!(SqlValue::BigInt(7).as_bigint(), Some(7));
        assert_eq!(SqlValue::BigInt(7).as_text(), None);
        assert_eq!(SqlValue::Text("a".into()).sql_type(), SqlType::Text);
    }
}
