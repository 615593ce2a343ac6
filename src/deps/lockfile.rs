// SPDX-License-Identifier: MIT
//! Lockfile-style deterministic resolution.
//!
//! Materializes a minimal manifest with the requested ranges in a scratch
//! workspace, runs `npm install --package-lock-only` with lifecycle scripts
//! and telemetry disabled, and reads exact versions back out of the
//! resulting `package-lock.json`. Both lockfile shapes are supported: the
//! flat `dependencies` map and the nested `packages` map keyed by
//! `node_modules/<name>`.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::deps::DependencyRequest;

/// Outcome of one lockfile resolution round. `available: false` means the
/// external resolver could not run at all — the caller falls through to the
/// registry, it is not an error.
#[derive(Debug, Default)]
pub struct LockfileResolution {
    pub pinned: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub available: bool,
}

/// Resolve `requests` through the external deterministic resolver.
///
/// The scratch workspace is owned by this call and removed on every exit
/// path, including timeouts and parse failures.
pub async fn resolve(
    requests: &[DependencyRequest],
    timeout: Duration,
) -> LockfileResolution {
    let mut outcome = LockfileResolution::default();
    if requests.is_empty() {
        return outcome;
    }

    let scratch = match tempfile::Builder::new().prefix("synthd-resolve-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            outcome
                .warnings
                .push(format!("could not create resolve workspace: {e}"));
            return outcome;
        }
    };

    let mut dependencies = serde_json::Map::new();
    for request in requests {
        let range = if request.requested_range.trim().is_empty() {
            "latest".to_string()
        } else {
            request.requested_range.clone()
        };
        dependencies.insert(request.name.clone(), Value::String(range));
    }
    let manifest = json!({
        "name": "synthd-resolve-temp",
        "version": "0.0.0",
        "private": true,
        "dependencies": dependencies,
    });

    if let Err(e) = std::fs::write(
        scratch.path().join("package.json"),
        manifest.to_string(),
    ) {
        outcome
            .warnings
            .push(format!("could not write resolve manifest: {e}"));
        return outcome;
    }

    let run = Command::new("npm")
        .args([
            "install",
            "--package-lock-only",
            "--no-audit",
            "--no-fund",
            "--ignore-scripts",
        ])
        .env("npm_config_audit", "false")
        .env("npm_config_fund", "false")
        .current_dir(scratch.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            // npm itself is not installed — the ladder continues at the
            // registry step.
            debug!(error = %e, "npm not available for lockfile resolution");
            return outcome;
        }
        Err(_) => {
            outcome
                .warnings
                .push(format!("npm resolution timed out after {timeout:?}"));
            return outcome;
        }
    };

    outcome.available = true;

    let lock_path = scratch.path().join("package-lock.json");
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        outcome.warnings.push(format!(
            "npm exited {}: {}",
            output.status,
            first_line(&stderr)
        ));
        // A lockfile may still have been produced — salvage what we can.
        if !lock_path.exists() {
            return outcome;
        }
    }

    let lock: Value = match std::fs::read_to_string(&lock_path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(lock) => lock,
        Err(e) => {
            outcome
                .warnings
                .push(format!("could not read package-lock.json: {e}"));
            return outcome;
        }
    };

    let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
    outcome.pinned = extract_pinned(&lock, &names);
    if outcome.pinned.is_empty() {
        warn!("lockfile produced no pins for {} requests", requests.len());
    }
    outcome
}

/// Extract exact versions for `names` from a lockfile document.
pub fn extract_pinned(lock: &Value, names: &[&str]) -> BTreeMap<String, String> {
    let mut pinned = BTreeMap::new();

    // Shape 1: flat top-level "dependencies" map (lockfile v1).
    if let Some(dependencies) = lock.get("dependencies").and_then(Value::as_object) {
        for name in names {
            if let Some(version) = dependencies
                .get(*name)
                .and_then(|info| info.get("version"))
                .and_then(Value::as_str)
            {
                pinned.insert(name.to_string(), version.to_string());
            }
        }
    }

    // Shape 2: nested "packages" map keyed by node_modules path (v2/v3).
    if pinned.len() < names.len() {
        if let Some(packages) = lock.get("packages").and_then(Value::as_object) {
            for (path, meta) in packages {
                let Some(name) = path.strip_prefix("node_modules/") else {
                    continue;
                };
                if !names.contains(&name) || pinned.contains_key(name) {
                    continue;
                }
                if let Some(version) = meta.get("version").and_then(Value::as_str) {
                    pinned.insert(name.to_string(), version.to_string());
                }
            }
        }
    }

    pinned
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_from_flat_dependencies_map() {
        let lock = json!({
            "dependencies": {
                "react": { "version": "18.2.0" },
                "left-pad": { "version": "1.3.0" },
            }
        });
        let pinned = extract_pinned(&lock, &["react"]);
        assert_eq!(pinned.get("react").map(String::as_str), Some("18.2.0"));
        assert_eq!(pinned.len(), 1);
    }

    #[test]
    fn extracts_from_nested_packages_map() {
        let lock = json!({
            "packages": {
                "": { "name": "synthd-resolve-temp" },
                "node_modules/react": { "version": "18.2.0" },
                "node_modules/react/node_modules/loose-envify": { "version": "1.4.0" },
            }
        });
        let pinned = extract_pinned(&lock, &["react"]);
        assert_eq!(pinned.get("react").map(String::as_str), Some("18.2.0"));
    }

    #[test]
    fn flat_map_wins_over_nested_for_same_name() {
        let lock = json!({
            "dependencies": { "react": { "version": "18.2.0" } },
            "packages": { "node_modules/react": { "version": "17.0.0" } },
        });
        let pinned = extract_pinned(&lock, &["react"]);
        assert_eq!(pinned.get("react").map(String::as_str), Some("18.2.0"));
    }

    #[test]
    fn scoped_names_resolve_from_packages_map() {
        let lock = json!({
            "packages": {
                "node_modules/@storyblok/react": { "version": "3.0.10" },
            }
        });
        let pinned = extract_pinned(&lock, &["@storyblok/react"]);
        assert_eq!(
            pinned.get("@storyblok/react").map(String::as_str),
            Some("3.0.10")
        );
    }
}
