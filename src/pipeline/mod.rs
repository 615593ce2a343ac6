//! Generation pipeline: wire types, followup gate, orchestrator, streaming.

pub mod files;
pub mod followup;
pub mod orchestrator;
pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::deps::DependencyMeta;
use crate::pipeline::followup::FollowupItem;
use crate::validate::{CheckFlags, ValidationReport};

// ─── Request ─────────────────────────────────────────────────────────────────

/// One file in a request or response set. `path` is a normalized relative
/// path; uniqueness within a set is enforced by the merge step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A decomposable unit of work — one scaffolded component of the requested
/// project. When present, generation is chunked over these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Previously asked questions and the answers already given, supplied by the
/// caller so the gate never re-surfaces covered ground.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowupHistory {
    #[serde(default)]
    pub asked: Vec<String>,
    /// question/followup id → free-text answer.
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

/// What the user asked for: feature answers plus optional decomposable units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub app_name: Option<String>,
    /// Free-form feature answers keyed by question id.
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub history: FollowupHistory,
}

impl Requirements {
    pub fn project_name(&self) -> String {
        self.app_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "generated-app".to_string())
    }
}

/// Per-request option overrides. Everything defaults off/None; absent fields
/// fall back to daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    /// Caller explicitly wants clarifying questions before generation.
    pub request_questions: bool,
    /// Maximum questions when `request_questions` is set (floor 1).
    pub max_questions: Option<usize>,
    /// Run external checks against the materialized result.
    pub validate: bool,
    pub checks: CheckFlags,
    /// Collect model debug traces into the response and the debug log dir.
    pub debug: bool,
    pub retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub repair_attempts: Option<u32>,
}

/// A full generation request. `base_files` non-empty switches the pipeline
/// into overlay mode: only new/changed files are produced and the dependency
/// manifest is never emitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub requirements: Requirements,
    pub base_files: Vec<FileRecord>,
    /// Relative paths of binary assets present in the base project; tracked
    /// for delta purposes but their content never travels through the
    /// pipeline.
    pub asset_files: Vec<String>,
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn overlay_mode(&self) -> bool {
        !self.base_files.is_empty()
    }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// Summary of the bounded repair loop, reported alongside validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairSummary {
    pub attempts: u32,
    pub applied: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub generated_at: String,
    pub warnings: Vec<String>,
    pub validation: ValidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencyMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub project_name: String,
    pub files: Vec<FileRecord>,
    pub metadata: ResponseMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followups: Option<Vec<FollowupItem>>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Transient per-request accumulator. Lives for one `generate` call or one
/// stream and is dropped with it — nothing here is persisted.
#[derive(Debug, Default)]
pub struct GenerationSession {
    pub files: Vec<FileRecord>,
    pub warnings: Vec<String>,
    pub traces: Vec<Value>,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn warn_all(&mut self, warnings: impl IntoIterator<Item = String>) {
        self.warnings.extend(warnings);
    }

    pub fn trace(&mut self, debug: bool, value: Value) {
        if debug {
            self.traces.push(value);
        }
    }
}
