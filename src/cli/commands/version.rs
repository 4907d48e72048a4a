//! Version command implementation.

use serde::Serialize;

use crate::error::Result;

use super::print_json;

#[derive(Debug, Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    features: Vec<&'a str>,
}

fn version_output() -> VersionOutput<'static> {
    let build = if cfg!(debug_assertions) {
        "dev"
    } else {
        "release"
    };

    let mut features = Vec::new();
    if cfg!(feature = "postgres-tests") {
        features.push("postgres-tests");
    }

    VersionOutput {
        version: env!("CARGO_PKG_VERSION"),
        build,
        features,
    }
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let output = version_output();
    if json {
        return print_json(&output);
    }
    println!("upsert-race version {} ({})", output.version, output.build);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_package() {
        let output = version_output();
        assert_eq!(output.version, env!("CARGO_PKG_VERSION"));
        assert!(matches!(output.build, "dev" | "release"));
    }
}
