//! Instruction-text construction for every model call the pipeline makes.
//!
//! Pure string templating — no I/O, no model knowledge beyond the output
//! contracts stated in each instruction.

use serde_json::json;

use crate::pipeline::{ComponentSpec, FileRecord, Requirements};

/// Max preview bytes per file embedded in overlay/repair instructions.
const PREVIEW_CHARS: usize = 800;
/// Max base files summarized in an overlay instruction.
const MANIFEST_LIMIT: usize = 200;

// ─── Shared blocks ───────────────────────────────────────────────────────────

fn system_rules() -> &'static str {
    "You are an expert project scaffold generator.\n\
     OUTPUT RULES:\n\
     - Return EXACTLY one valid JSON object and nothing else.\n\
     - Every file is {\"path\":\"relative/path\",\"content\":\"full file content\"}.\n\
     - Paths are relative, forward-slash separated, never absolute, never containing '..'.\n\
     - Do NOT include secrets, tokens, or binary assets.\n"
}

fn requirements_block(requirements: &Requirements) -> String {
    let context = json!({
        "app_name": requirements.project_name(),
        "answers": &requirements.answers,
        "followup_answers": &requirements.history.answers,
    });
    format!("User requirements:\n{context}\n")
}

fn components_block(components: &[ComponentSpec]) -> String {
    let mut lines = vec!["Components to scaffold:".to_string()];
    for component in components {
        let fields = if component.fields.is_empty() {
            String::new()
        } else {
            format!(" (fields: {})", component.fields.join(", "))
        };
        if component.description.is_empty() {
            lines.push(format!("- {}{}", component.name, fields));
        } else {
            lines.push(format!("- {} — {}{}", component.name, component.description, fields));
        }
    }
    lines.join("\n")
}

fn previews(files: &[FileRecord]) -> serde_json::Value {
    let entries: Vec<_> = files
        .iter()
        .map(|f| {
            let snippet: String = f.content.chars().take(PREVIEW_CHARS).collect();
            json!({ "path": f.path, "snippet": snippet })
        })
        .collect();
    serde_json::Value::Array(entries)
}

// ─── Generation ──────────────────────────────────────────────────────────────

/// Full-project generation instruction (no decomposable units).
pub fn full_generation(requirements: &Requirements) -> String {
    format!(
        "{}\n{}\nTask: generate the complete project.\n\
         Return JSON with project_name, files[], metadata.",
        system_rules(),
        requirements_block(requirements),
    )
}

/// Per-chunk generation instruction covering only `chunk`'s components.
pub fn chunk_generation(requirements: &Requirements, chunk: &[ComponentSpec]) -> String {
    format!(
        "{}\n{}\n{}\n\nTask: generate source files for ONLY the components listed above.\n\
         Return JSON with files[] (only files for these components).",
        system_rules(),
        requirements_block(requirements),
        components_block(chunk),
    )
}

/// Trailing project-level scaffolding instruction after chunked calls.
pub fn scaffolding(requirements: &Requirements) -> String {
    format!(
        "{}\n{}\nTask: now produce the project-level scaffolding files \
         (package.json, tsconfig, build config, pages, services, env files).\n\
         Return JSON with files[].",
        system_rules(),
        requirements_block(requirements),
    )
}

// ─── Followups ───────────────────────────────────────────────────────────────

/// Clarifying-question instruction for the followup gate.
pub fn followup_gate(requirements: &Requirements, max_questions: usize) -> String {
    format!(
        "{}\n{}\nYou may ask up to {max_questions} clarifying questions before \
         generating. Return JSON exactly like:\n\
         {{\"followups\":[{{\"question\":\"...\",\"kind\":\"free-text|boolean|choice|multichoice\",\
         \"urgency\":0.0,\"default\":\"...\"}}]}}\n\
         Rank by urgency in [0,1] — how much the answer changes the generated \
         project. If the requirements are already sufficient, return \
         {{\"followups\":[]}}. Respond only with valid JSON of that shape.",
        system_rules(),
        requirements_block(requirements),
    )
}

// ─── Overlay ─────────────────────────────────────────────────────────────────

/// Delta-semantics instruction: only new/changed files, manifest forbidden,
/// new packages by name only.
pub fn overlay(requirements: &Requirements, base_files: &[FileRecord]) -> String {
    let shown: Vec<FileRecord> = base_files.iter().take(MANIFEST_LIMIT).cloned().collect();
    format!(
        "{}\n - 'files' must contain ONLY files that are NEW or CHANGED relative \
         to the provided base project. Do NOT return {} or modify it.\n\
         - 'new_dependencies' is an ARRAY OF PACKAGE NAMES ONLY (no versions, no URLs).\n\
         - If you cannot produce changes, return files:[] and explain in warnings.\n\n\
         {}\nBase project (path + snippet):\n{}\n\n\
         Task: make the smallest set of file changes required to implement the \
         requirements. Keep contents minimal and idiomatic; avoid unrelated refactors.\n\
         Return JSON with files[], new_dependencies[], warnings[].",
        system_rules(),
        crate::pipeline::files::MANIFEST_FILE,
        requirements_block(requirements),
        previews(&shown),
    )
}

// ─── Repair ──────────────────────────────────────────────────────────────────

/// Corrective-pass instruction carrying validator diagnostics and previews.
pub fn repair(requirements: &Requirements, failing_output: &str, files: &[FileRecord]) -> String {
    format!(
        "{}\nYou are repairing source files to fix the failures shown below.\n\
         - Only include files you change. Do not return files that are already correct.\n\
         - 'content' must be the FULL corrected file content, never a diff.\n\n\
         {}\nFailure/validation output:\n{failing_output}\n\n\
         Files (path + snippet):\n{}\n\n\
         Return JSON with files[].",
        system_rules(),
        requirements_block(requirements),
        previews(files),
    )
}
