//! Doctor command implementation.

use postgres::Client;
use serde::Serialize;

use crate::config::RaceConfig;
use crate::error::{RaceError, Result};

use super::pg_factory;

/// Connections kept free for the verifier and other clients.
const RESERVED_CONNECTIONS: i64 = 3;

/// Columns the harness statements touch, with their `data_type`.
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("id", "uuid"),
    ("name", "character varying"),
    ("version", "bigint"),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
struct DoctorReport {
    ok: bool,
    checks: Vec<CheckResult>,
}

fn push_check(
    checks: &mut Vec<CheckResult>,
    name: &str,
    status: CheckStatus,
    message: Option<String>,
    details: Option<serde_json::Value>,
) {
    checks.push(CheckResult {
        name: name.to_string(),
        status,
        message,
        details,
    });
}

fn has_error(checks: &[CheckResult]) -> bool {
    checks
        .iter()
        .any(|check| matches!(check.status, CheckStatus::Error))
}

fn print_report(report: &DoctorReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    println!("upsert-race doctor");
    for check in &report.checks {
        let label = match check.status {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        if let Some(message) = &check.message {
            println!("{label} {}: {}", check.name, message);
        } else {
            println!("{label} {}", check.name);
        }
    }
    Ok(())
}

/// Compare `max_connections` with the writers a race would open.
fn check_headroom(max_connections: i64, writers: usize, checks: &mut Vec<CheckResult>) {
    let writers = i64::try_from(writers).unwrap_or(i64::MAX);
    let needed = writers.saturating_add(RESERVED_CONNECTIONS);
    let details = serde_json::json!({
        "max_connections": max_connections,
        "writers": writers,
    });
    if needed <= max_connections {
        push_check(
            checks,
            "server.max_connections",
            CheckStatus::Ok,
            Some(format!("{max_connections} allowed, race needs {needed}")),
            Some(details),
        );
    } else {
        push_check(
            checks,
            "server.max_connections",
            CheckStatus::Error,
            Some(format!(
                "{writers} writers need {needed} connections but the server allows {max_connections}"
            )),
            Some(details),
        );
    }
}

/// Check the `(column_name, data_type)` pairs of the `event` table.
fn check_columns(present: &[(String, String)], checks: &mut Vec<CheckResult>) {
    if present.is_empty() {
        push_check(
            checks,
            "schema.event",
            CheckStatus::Warn,
            Some("Missing event table (run `upsert-race init`)".to_string()),
            None,
        );
        return;
    }

    let mismatched: Vec<serde_json::Value> = REQUIRED_COLUMNS
        .iter()
        .filter_map(|&(column, expected)| {
            let found = present
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, data_type)| data_type.as_str());
            (found != Some(expected)).then(|| {
                serde_json::json!({
                    "column": column,
                    "expected": expected,
                    "found": found,
                })
            })
        })
        .collect();

    if mismatched.is_empty() {
        push_check(checks, "schema.event", CheckStatus::Ok, None, None);
    } else {
        push_check(
            checks,
            "schema.event",
            CheckStatus::Error,
            Some("event table columns do not match".to_string()),
            Some(serde_json::json!({ "columns": mismatched })),
        );
    }
}

fn show_setting(client: &mut Client, setting: &str) -> Result<String> {
    let sql = format!("SHOW {setting}");
    let row = client
        .query_one(sql.as_str(), &[])
        .map_err(|err| RaceError::config(format!("SHOW {setting} failed: {err}")))?;
    row.try_get(0)
        .map_err(|err| RaceError::config(format!("SHOW {setting} returned no text: {err}")))
}

fn event_columns(client: &mut Client) -> Result<Vec<(String, String)>> {
    let rows = client
        .query(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_name = 'event' AND table_schema = current_schema() \
             ORDER BY ordinal_position",
            &[],
        )
        .map_err(|err| RaceError::config(format!("reading event columns failed: {err}")))?;
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get(0)
                    .map_err(|err| RaceError::config(err.to_string()))?,
                row.try_get(1)
                    .map_err(|err| RaceError::config(err.to_string()))?,
            ))
        })
        .collect()
}

fn server_checks(
    client: &mut Client,
    writers: usize,
    checks: &mut Vec<CheckResult>,
) -> Result<()> {
    let version = show_setting(client, "server_version")?;
    push_check(
        checks,
        "server.version",
        CheckStatus::Ok,
        Some(version.clone()),
        Some(serde_json::json!({ "server_version": version })),
    );

    let max_connections = show_setting(client, "max_connections")?;
    match max_connections.trim().parse::<i64>() {
        Ok(max) => check_headroom(max, writers, checks),
        Err(_) => push_check(
            checks,
            "server.max_connections",
            CheckStatus::Warn,
            Some(format!("unreadable value {max_connections:?}")),
            None,
        ),
    }

    check_columns(&event_columns(client)?, checks);
    Ok(())
}

/// Execute the doctor command.
///
/// # Errors
///
/// Returns an error if the URL is invalid or report serialization fails.
pub fn execute(config: &RaceConfig, json: bool) -> Result<()> {
    let mut checks = Vec::new();
    let factory = pg_factory(config)?;

    match factory.connect_client() {
        Ok(mut client) => {
            push_check(&mut checks, "db.connect", CheckStatus::Ok, None, None);
            if let Err(err) = server_checks(&mut client, config.race.writers, &mut checks) {
                push_check(
                    &mut checks,
                    "server.query",
                    CheckStatus::Error,
                    Some(err.to_string()),
                    None,
                );
            }
            if let Err(err) = client.close() {
                tracing::warn!(error = %err, "failed to close doctor connection");
            }
        }
        Err(err) => {
            push_check(
                &mut checks,
                "db.connect",
                CheckStatus::Error,
                Some(err.to_string()),
                None,
            );
        }
    }

    let report = DoctorReport {
        ok: !has_error(&checks),
        checks,
    };
    print_report(&report, json)?;

    if !report.ok {
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_check<'a>(checks: &'a [CheckResult], name: &str) -> Option<&'a CheckResult> {
        checks.iter().find(|check| check.name == name)
    }

    fn columns(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|&(name, data_type)| (name.to_string(), data_type.to_string()))
            .collect()
    }

    #[test]
    fn test_headroom_ok_and_error() {
        let mut checks = Vec::new();
        check_headroom(200, 100, &mut checks);
        assert!(matches!(checks[0].status, CheckStatus::Ok));

        let mut checks = Vec::new();
        check_headroom(100, 100, &mut checks);
        let check = find_check(&checks, "server.max_connections").expect("check present");
        assert!(matches!(check.status, CheckStatus::Error));
        assert!(has_error(&checks));
    }

    #[test]
    fn test_columns_match() {
        let mut checks = Vec::new();
        check_columns(
            &columns(&[
                ("id", "uuid"),
                ("name", "character varying"),
                ("version", "bigint"),
            ]),
            &mut checks,
        );
        assert!(matches!(checks[0].status, CheckStatus::Ok));
    }

    #[test]
    fn test_wrong_version_type_is_error() {
        let mut checks = Vec::new();
        check_columns(
            &columns(&[
                ("id", "uuid"),
                ("name", "character varying"),
                ("version", "integer"),
            ]),
            &mut checks,
        );
        let check = find_check(&checks, "schema.event").expect("check present");
        assert!(matches!(check.status, CheckStatus::Error));
        let details = check.details.as_ref().expect("details");
        assert_eq!(details["columns"][0]["column"], "version");
        assert_eq!(details["columns"][0]["found"], "integer");
    }

    #[test]
    fn test_missing_table_is_warning() {
        let mut checks = Vec::new();
        check_columns(&[], &mut checks);
        assert!(matches!(checks[0].status, CheckStatus::Warn));
        assert!(!has_error(&checks));
    }

    #[test]
    fn test_report_serializes_lowercase_status() {
        let mut checks = Vec::new();
        push_check(&mut checks, "db.connect", CheckStatus::Ok, None, None);
        let report = DoctorReport { ok: true, checks };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"ok":true,"checks":[{"name":"db.connect","status":"ok"}]}"#);
    }
}
