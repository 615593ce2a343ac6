//! Best-effort coercion of loosely-typed model output.
//!
//! Every expected shape maps onto a defaulted struct plus a list of
//! diagnostics. Unknown or partial shapes degrade to empty fields — a parse
//! problem here is a recorded diagnostic, never an error that aborts the
//! request.

use serde_json::{Map, Value};

use crate::pipeline::FileRecord;

// ─── Coerced shapes ──────────────────────────────────────────────────────────

/// Coerced `generation` response: full or per-chunk file set.
#[derive(Debug, Default)]
pub struct GenerationResult {
    pub project_name: Option<String>,
    pub files: Vec<FileRecord>,
    pub warnings: Vec<String>,
}

/// Coerced `overlay` response: delta files plus newly required package names.
#[derive(Debug, Default)]
pub struct OverlayResult {
    pub files: Vec<FileRecord>,
    pub new_dependencies: Vec<String>,
    pub warnings: Vec<String>,
}

/// A followup candidate before gate filtering. The gate assigns ids and
/// defaults; this only captures what the model actually said.
#[derive(Debug, Clone, Default)]
pub struct RawFollowup {
    pub question: String,
    pub kind: Option<String>,
    pub urgency: Option<f64>,
    pub default: Option<String>,
}

// ─── Generation ──────────────────────────────────────────────────────────────

pub fn coerce_generation(value: &Value) -> (GenerationResult, Vec<String>) {
    let mut diagnostics = Vec::new();
    let Some(object) = unwrap_object(value, &mut diagnostics) else {
        diagnostics.push(format!(
            "generation output was not an object (got {})",
            type_name(value)
        ));
        return (GenerationResult::default(), diagnostics);
    };

    let project_name = object
        .get("project_name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let files = coerce_files(object.get("files"), &mut diagnostics);
    let warnings = collect_warnings(&object);

    (
        GenerationResult {
            project_name,
            files,
            warnings,
        },
        diagnostics,
    )
}

// ─── Overlay ─────────────────────────────────────────────────────────────────

pub fn coerce_overlay(value: &Value) -> (OverlayResult, Vec<String>) {
    let mut diagnostics = Vec::new();
    let Some(object) = unwrap_object(value, &mut diagnostics) else {
        diagnostics.push(format!(
            "overlay output was not an object (got {})",
            type_name(value)
        ));
        return (OverlayResult::default(), diagnostics);
    };

    let files = coerce_files(object.get("files"), &mut diagnostics);

    let mut new_dependencies = string_list(object.get("new_dependencies"));
    if new_dependencies.is_empty() {
        // Older prompt revisions put the names under metadata.
        let meta_deps = object
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(|m| m.get("dependencies").or_else(|| m.get("new_dependencies")));
        new_dependencies = string_list(meta_deps);
    }

    let warnings = collect_warnings(&object);

    (
        OverlayResult {
            files,
            new_dependencies,
            warnings,
        },
        diagnostics,
    )
}

// ─── Followups ───────────────────────────────────────────────────────────────

/// Accepts `{followups: [...]}`, a bare array, bare strings, objects with
/// `question`/`prompt`/`text` keys, a string-encoded JSON document, or
/// newline-delimited plain text.
pub fn coerce_followups(value: &Value) -> (Vec<RawFollowup>, Vec<String>) {
    let mut diagnostics = Vec::new();

    if let Value::String(text) = value {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return coerce_followups(&parsed);
        }
        // Newline-delimited questions.
        let items = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| RawFollowup {
                question: l.to_string(),
                ..RawFollowup::default()
            })
            .collect();
        return (items, diagnostics);
    }

    let list = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(object) => match object.get("followups") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(other) => return coerce_followups(other),
            None => {
                // Some responses nest the list under metadata.
                match value
                    .pointer("/metadata/followups")
                    .and_then(Value::as_array)
                {
                    Some(items) => items.as_slice(),
                    None => &[],
                }
            }
        },
        _ => {
            diagnostics.push(format!(
                "followups output was not a list (got {})",
                type_name(value)
            ));
            &[]
        }
    };

    let mut out = Vec::new();
    for item in list {
        match coerce_followup_item(item) {
            Some(followup) => out.push(followup),
            None => diagnostics.push(format!(
                "unusable followup candidate: {}",
                truncate(&item.to_string(), 120)
            )),
        }
    }
    (out, diagnostics)
}

fn coerce_followup_item(item: &Value) -> Option<RawFollowup> {
    match item {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| RawFollowup {
                question: trimmed.to_string(),
                ..RawFollowup::default()
            })
        }
        Value::Object(object) => {
            let question = object
                .get("question")
                .or_else(|| object.get("prompt"))
                .or_else(|| object.get("text"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|q| !q.is_empty())?
                .to_string();
            let kind = object
                .get("kind")
                .or_else(|| object.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let urgency = object
                .get("urgency")
                .and_then(|u| u.as_f64().or_else(|| u.as_str()?.parse().ok()));
            let default = object
                .get("default")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(RawFollowup {
                question,
                kind,
                urgency,
                default,
            })
        }
        _ => None,
    }
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

/// Unwrap one level of string-encoded JSON, then require an object.
fn unwrap_object(value: &Value, diagnostics: &mut Vec<String>) -> Option<Map<String, Value>> {
    match value {
        Value::Object(object) => Some(object.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => {
                diagnostics.push("model returned string-encoded JSON".to_string());
                Some(object)
            }
            _ => None,
        },
        _ => None,
    }
}

fn coerce_files(value: Option<&Value>, diagnostics: &mut Vec<String>) -> Vec<FileRecord> {
    let Some(Value::Array(items)) = value else {
        if value.is_some() {
            diagnostics.push("`files` was not an array".to_string());
        }
        return Vec::new();
    };

    let mut files = Vec::new();
    for item in items {
        let Some(object) = item.as_object() else {
            diagnostics.push("non-object entry in `files`".to_string());
            continue;
        };
        let Some(path) = object.get("path").and_then(Value::as_str) else {
            diagnostics.push("file entry missing `path`".to_string());
            continue;
        };
        let content = match object.get("content") {
            Some(Value::String(content)) => content.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        files.push(FileRecord {
            path: path.to_string(),
            content,
        });
    }
    files
}

fn collect_warnings(object: &Map<String, Value>) -> Vec<String> {
    let direct = string_list(object.get("warnings"));
    if !direct.is_empty() {
        return direct;
    }
    string_list(
        object
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(|m| m.get("warnings")),
    )
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
