// SPDX-License-Identifier: MIT
//! Bounded model-driven repair.
//!
//! One corrective generation call per budget unit: the model sees the
//! failing diagnostics plus short previews of the current files and returns
//! only the files it changes, in full content. The caller merges the result
//! last-writer-wins and re-validates; the loop never continues based on the
//! repair content alone.

use serde_json::json;
use tracing::{info, warn};

use crate::model::{coerce, ExpectedShape, ModelClient, RetryPolicy};
use crate::pipeline::files::normalize_path;
use crate::pipeline::{FileRecord, Requirements};
use crate::prompts;
use crate::validate::diagnostic_lines;

/// Raw validator output beyond this size is condensed to its diagnostic
/// lines before it reaches the repair instruction.
const MAX_FAILURE_CHARS: usize = 4_000;

/// Outcome of one repair call.
#[derive(Debug, Default)]
pub struct RepairOutcome {
    /// Files the model changed, normalized and ready to merge.
    pub repaired_files: Vec<FileRecord>,
    /// Count of files that survived normalization.
    pub applied: usize,
    /// Whether this call produced anything applicable.
    pub ok: bool,
    pub diagnostics: Vec<String>,
}

/// Issue one repair generation call.
///
/// A model failure here is terminal for the repair loop but not for the
/// request — the caller reports the failed validation state honestly.
pub async fn attempt_repair(
    model: &dyn ModelClient,
    requirements: &Requirements,
    failing_output: &str,
    current_files: &[FileRecord],
    policy: &RetryPolicy,
) -> RepairOutcome {
    let failing = if failing_output.len() > MAX_FAILURE_CHARS {
        let lines = diagnostic_lines(failing_output);
        if lines.is_empty() {
            failing_output.chars().take(MAX_FAILURE_CHARS).collect()
        } else {
            lines.join("\n")
        }
    } else {
        failing_output.to_string()
    };
    let instruction = prompts::repair(requirements, &failing, current_files);

    let value = match model
        .invoke(&instruction, ExpectedShape::Generation, policy)
        .await
    {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "repair call failed");
            return RepairOutcome {
                diagnostics: vec![format!("repair model call failed: {e}")],
                ..RepairOutcome::default()
            };
        }
    };

    let (result, mut diagnostics) = coerce::coerce_generation(&value);

    let mut repaired_files = Vec::new();
    for record in result.files {
        match normalize_path(&record.path) {
            Some(path) => repaired_files.push(FileRecord::new(path, record.content)),
            None => diagnostics.push(format!("repair returned unsafe path: {}", record.path)),
        }
    }

    if repaired_files.is_empty() {
        diagnostics.push(format!(
            "repair returned no applicable files: {}",
            json!(value).to_string().chars().take(200).collect::<String>()
        ));
        return RepairOutcome {
            diagnostics,
            ..RepairOutcome::default()
        };
    }

    info!(files = repaired_files.len(), "repair produced corrected files");
    let applied = repaired_files.len();
    RepairOutcome {
        repaired_files,
        applied,
        ok: true,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedModel {
        response: Result<Value, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn invoke(
            &self,
            _instruction: &str,
            _shape: ExpectedShape,
            _retry: &RetryPolicy,
        ) -> Result<Value, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(value) => Ok(value.clone()),
                Err(message) => Err(ModelError::Exhausted {
                    attempts: 1,
                    last_error: message.clone(),
                }),
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn repaired_files_are_normalized_and_counted() {
        let model = ScriptedModel {
            response: Ok(json!({
                "files": [
                    {"path": "./src/app.ts", "content": "fixed"},
                    {"path": "../outside.ts", "content": "nope"},
                ],
            })),
            calls: AtomicUsize::new(0),
        };
        let outcome = attempt_repair(
            &model,
            &Requirements::default(),
            "error TS2304",
            &[FileRecord::new("src/app.ts", "broken")],
            &policy(),
        )
        .await;
        assert!(outcome.ok);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.repaired_files[0].path, "src/app.ts");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_repair_is_not_ok() {
        let model = ScriptedModel {
            response: Ok(json!({"files": []})),
            calls: AtomicUsize::new(0),
        };
        let outcome = attempt_repair(
            &model,
            &Requirements::default(),
            "error",
            &[],
            &policy(),
        )
        .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.applied, 0);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_diagnostics() {
        let model = ScriptedModel {
            response: Err("boom".to_string()),
            calls: AtomicUsize::new(0),
        };
        let outcome = attempt_repair(
            &model,
            &Requirements::default(),
            "error",
            &[],
            &policy(),
        )
        .await;
        assert!(!outcome.ok);
        assert!(outcome.diagnostics[0].contains("boom"));
    }
}
