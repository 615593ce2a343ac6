// SPDX-License-Identifier: MIT
//! External static checks against a materialized file set.
//!
//! Each configured check runs as an isolated subprocess inside a scratch
//! workspace with a hard timeout. A missing tool degrades the check to
//! `skipped`, never to failure; overall `ok` is the AND of the checks that
//! actually ran, or `None` when none did.

pub mod repair;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::pipeline::files::normalize_path;
use crate::pipeline::FileRecord;

// ─── Types ───────────────────────────────────────────────────────────────────

/// Which external checks to run. Everything defaults off; the orchestrator
/// enables the type check when validation is requested without flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckFlags {
    /// TypeScript `tsc --noEmit`.
    pub typecheck: bool,
    /// Python test run (`pytest -q`).
    pub pytest: bool,
    /// `go vet ./...`.
    pub govet: bool,
}

impl CheckFlags {
    pub fn any(&self) -> bool {
        self.typecheck || self.pytest || self.govet
    }

    /// The default suite when a caller asks for validation without naming
    /// checks.
    pub fn typecheck_only() -> Self {
        Self {
            typecheck: true,
            ..Self::default()
        }
    }
}

/// Result of one external check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub ok: bool,
    pub skipped: bool,
    pub output: String,
}

/// Combined validation outcome. `ok` is `None` when no checks ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checked: bool,
    pub ok: Option<bool>,
    pub skipped: bool,
    pub output: String,
    pub per_check: BTreeMap<String, CheckResult>,
}

impl ValidationReport {
    pub fn failed(&self) -> bool {
        self.checked && self.ok == Some(false)
    }
}

// ─── Diagnostics ─────────────────────────────────────────────────────────────

static DIAGNOSTIC_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|warning)\b").expect("valid diagnostic pattern"));

/// Cap on diagnostic lines fed back into a repair call.
const MAX_DIAGNOSTIC_LINES: usize = 50;

/// Extract the error/warning lines from raw check output — the part worth
/// feeding back into a repair call when the full output is too large.
pub fn diagnostic_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .filter(|line| DIAGNOSTIC_LINE.is_match(line))
        .map(|line| line.trim().to_owned())
        .filter(|line| !line.is_empty())
        .take(MAX_DIAGNOSTIC_LINES)
        .collect()
}

// ─── Materialization ─────────────────────────────────────────────────────────

/// Write `files` into `dir`, creating parent directories. Paths that fail
/// normalization are dropped — the scratch tree never contains anything a
/// result set would not.
pub fn materialize(dir: &Path, files: &[FileRecord]) -> std::io::Result<()> {
    for record in files {
        let Some(path) = normalize_path(&record.path) else {
            continue;
        };
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &record.content)?;
    }
    Ok(())
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Run the configured checks in `dir` and fold their results.
pub async fn run_validations(dir: &Path, checks: &CheckFlags, timeout: Duration) -> ValidationReport {
    let mut per_check = BTreeMap::new();
    let mut outputs = Vec::new();

    if checks.typecheck {
        let result = run_typecheck(dir, timeout).await;
        outputs.push(format!("=== tsc ===\n{}", result.output));
        per_check.insert("tsc".to_string(), result);
    }
    if checks.pytest {
        let result = run_check("pytest", &["-q"], dir, timeout).await;
        outputs.push(format!("=== pytest ===\n{}", result.output));
        per_check.insert("pytest".to_string(), result);
    }
    if checks.govet {
        let result = run_check("go", &["vet", "./..."], dir, timeout).await;
        outputs.push(format!("=== go vet ===\n{}", result.output));
        per_check.insert("go_vet".to_string(), result);
    }

    let checked = !per_check.is_empty();
    let ran: Vec<&CheckResult> = per_check.values().filter(|r| !r.skipped).collect();
    let ok = if !checked || ran.is_empty() {
        None
    } else {
        Some(ran.iter().all(|r| r.ok))
    };

    ValidationReport {
        checked,
        ok,
        skipped: !checked,
        output: outputs.join("\n").trim().to_string(),
        per_check,
    }
}

/// TypeScript check: prefer `npx tsc`, fall back to a bare `tsc`.
async fn run_typecheck(dir: &Path, timeout: Duration) -> CheckResult {
    let via_npx = run_check("npx", &["--yes", "tsc", "--noEmit"], dir, timeout).await;
    if !via_npx.skipped {
        return via_npx;
    }
    run_check("tsc", &["--noEmit"], dir, timeout).await
}

/// Spawn one check subprocess and capture combined output.
///
/// Spawn failure means the tool is absent from the environment — that is a
/// skip, not a validation failure.
async fn run_check(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> CheckResult {
    debug!(check = program, "running validator");

    let run = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(check = program, error = %e, "validator not available");
            return CheckResult {
                ok: false,
                skipped: true,
                output: format!("{program} not found; skipping"),
            };
        }
        Err(_) => {
            return CheckResult {
                ok: false,
                skipped: false,
                output: format!("{program} timed out after {timeout:?}"),
            };
        }
    };

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
    CheckResult {
        ok: output.status.success(),
        skipped: false,
        output: combined,
    }
}


// ─── Validator seam ──────────────────────────────────────────────────────────

/// Validation behind a trait so the pipeline never assumes the subprocess
/// implementation; tests inject deterministic validators.
#[async_trait::async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, dir: &Path, checks: &CheckFlags, timeout: Duration)
        -> ValidationReport;
}

/// The real thing: external check tools run as subprocesses.
pub struct ToolValidator;

#[async_trait::async_trait]
impl Validator for ToolValidator {
    async fn validate(
        &self,
        dir: &Path,
        checks: &CheckFlags,
        timeout: Duration,
    ) -> ValidationReport {
        run_validations(dir, checks, timeout).await
    }
}
