// SPDX-License-Identifier: MIT
//! Streaming twin of the orchestrator.
//!
//! Emits an ordered sequence of newline-delimited JSON events instead of
//! one response object. Every produced file is a triad — `file_start`,
//! bounded `file_chunk` slices with a final flag, `file_complete` with the
//! byte size — so a consumer reconstructs files without buffering the whole
//! response. A dropped receiver ends emission; in-flight external calls run
//! to their own timeouts.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::deps::{DependencyMeta, DependencyRequest, ResolvedDependency};
use crate::model::coerce::{self, GenerationResult};
use crate::model::ExpectedShape;
use crate::pipeline::files;
use crate::pipeline::followup::FollowupItem;
use crate::pipeline::orchestrator::Generator;
use crate::pipeline::{
    FileRecord, GenerateRequest, GenerationSession, RepairSummary,
};
use crate::prompts;
use crate::validate::repair::attempt_repair;
use crate::validate::{self, ValidationReport};

// ─── Events ──────────────────────────────────────────────────────────────────

/// One NDJSON record: `{"event": <type>, "payload": <data>}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    Followups(Vec<FollowupItem>),
    FileStart {
        path: String,
    },
    FileChunk {
        path: String,
        chunk: String,
        index: usize,
        #[serde(rename = "final")]
        is_final: bool,
    },
    FileComplete {
        path: String,
        size: usize,
    },
    Warning(String),
    Dependency(ResolvedDependency),
    Validation(ValidationReport),
    Repair(RepairSummary),
    Done {
        files_count: usize,
    },
}

impl StreamEvent {
    /// Serialize to one newline-terminated JSON line.
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => format!("{line}\n"),
            Err(_) => "{\"event\":\"warning\",\"payload\":\"unserializable event\"}\n".to_string(),
        }
    }
}

/// Slice `content` into chunks of at most `max_bytes`, backing off to char
/// boundaries. Empty content yields one empty final chunk so every file
/// still produces a complete triad.
pub fn chunk_slices(content: &str, max_bytes: usize) -> Vec<&str> {
    if content.is_empty() {
        return vec![""];
    }
    let max = max_bytes.max(4);
    let mut slices = Vec::new();
    let mut start = 0;
    while start < content.len() {
        let mut end = (start + max).min(content.len());
        while end > start && !content.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single char wider than the budget — emit it whole.
            end = start + 1;
            while end < content.len() && !content.is_char_boundary(end) {
                end += 1;
            }
        }
        slices.push(&content[start..end]);
        start = end;
    }
    slices
}

// ─── Emitter ─────────────────────────────────────────────────────────────────

struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
}

impl Emitter {
    /// Send one event; `false` means the consumer went away and emission
    /// must stop.
    async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    async fn warn_all(&self, warnings: impl IntoIterator<Item = String>) -> bool {
        for warning in warnings {
            if !self.send(StreamEvent::Warning(warning)).await {
                return false;
            }
        }
        true
    }

    /// Emit the start/chunk/complete triad for one file.
    async fn file(&self, record: &FileRecord, chunk_bytes: usize) -> bool {
        if !self
            .send(StreamEvent::FileStart {
                path: record.path.clone(),
            })
            .await
        {
            return false;
        }
        let slices = chunk_slices(&record.content, chunk_bytes);
        let last = slices.len() - 1;
        for (index, slice) in slices.iter().enumerate() {
            let event = StreamEvent::FileChunk {
                path: record.path.clone(),
                chunk: slice.to_string(),
                index,
                is_final: index == last,
            };
            if !self.send(event).await {
                return false;
            }
        }
        self.send(StreamEvent::FileComplete {
            path: record.path.clone(),
            size: record.content.len(),
        })
        .await
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Run the pipeline for `request`, emitting progress events. The stream
/// ends after `done` (success), after a single `followups` event (gate
/// declined), or after a `warning` naming a fatal generation failure.
pub fn stream_generate(
    generator: Arc<Generator>,
    request: GenerateRequest,
) -> ReceiverStream<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        run_stream(generator, request, Emitter { tx }).await;
    });
    ReceiverStream::new(rx)
}

async fn run_stream(generator: Arc<Generator>, request: GenerateRequest, emitter: Emitter) {
    let mut session = GenerationSession::new();
    let chunk_bytes = generator.config.generator.stream_chunk_bytes;

    // Gate: a declined round is a single followups event, then EOF.
    if let Some(followups) = generator.run_gate(&request, &mut session).await {
        emitter.send(StreamEvent::Followups(followups)).await;
        return;
    }
    if !emitter.warn_all(session.warnings.drain(..)).await {
        return;
    }

    let policy = generator.effective_policy(&request.options);

    let dependencies = if request.overlay_mode() {
        // Overlay: one call, emit only the delta.
        let base = files::base_index(&request.base_files, &request.asset_files);
        let context: Vec<FileRecord> = base
            .iter()
            .filter(|(path, _)| !files::is_manifest_path(path))
            .map(|(path, content)| FileRecord::new(path.clone(), content.clone()))
            .collect();
        let instruction = prompts::overlay(&request.requirements, &context);
        let value = match generator
            .model
            .invoke(&instruction, ExpectedShape::Overlay, &policy)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                emitter
                    .send(StreamEvent::Warning(format!("generation failed: {e}")))
                    .await;
                return;
            }
        };
        let (result, diagnostics) = coerce::coerce_overlay(&value);
        if !emitter.warn_all(diagnostics).await || !emitter.warn_all(result.warnings).await {
            return;
        }

        let mut candidates = Vec::new();
        let mut guard_warnings = Vec::new();
        files::merge_into(&mut candidates, result.files, &mut guard_warnings);
        if !emitter.warn_all(guard_warnings).await {
            return;
        }
        session.files = files::overlay_delta(candidates, &base);
        for record in &session.files {
            if !emitter.file(record, chunk_bytes).await {
                return;
            }
        }

        let requests: Vec<DependencyRequest> = result
            .new_dependencies
            .iter()
            .map(|name| DependencyRequest::new(name.clone(), ""))
            .collect();
        let (resolved, lockfile, warnings) = generator.resolver.resolve_pinned(&requests).await;
        let pinned = resolved
            .iter()
            .filter_map(|r| r.version.clone().map(|v| (r.name.clone(), v)))
            .collect();
        DependencyMeta {
            resolved,
            pinned,
            warnings,
            lockfile,
        }
    } else {
        // Full or chunked generation. Calls are serialized here so events
        // arrive in deterministic emission order.
        let requirements = &request.requirements;
        let mut instructions: Vec<String> = Vec::new();
        if requirements.components.is_empty() {
            instructions.push(prompts::full_generation(requirements));
        } else {
            for batch in generator.chunks(&requirements.components) {
                instructions.push(prompts::chunk_generation(requirements, batch));
            }
            instructions.push(prompts::scaffolding(requirements));
        }

        for instruction in instructions {
            let outcome = generator.call_generation(&instruction, &policy).await;
            let (result, diagnostics): (GenerationResult, Vec<String>) = match outcome {
                Ok(parts) => parts,
                Err(e) => {
                    emitter
                        .send(StreamEvent::Warning(format!("generation failed: {e}")))
                        .await;
                    return;
                }
            };
            if !emitter.warn_all(diagnostics).await || !emitter.warn_all(result.warnings).await {
                return;
            }

            let mut incoming = Vec::new();
            let mut guard_warnings = Vec::new();
            files::merge_into(&mut incoming, result.files, &mut guard_warnings);
            if !emitter.warn_all(guard_warnings).await {
                return;
            }
            for record in incoming {
                if !emitter.file(&record, chunk_bytes).await {
                    return;
                }
                files::upsert(&mut session.files, record);
            }
        }

        generator.resolver.apply_to_manifest(&mut session.files).await
    };

    // Dependency resolution results, one event per entry.
    for entry in &dependencies.resolved {
        if !emitter.send(StreamEvent::Dependency(entry.clone())).await {
            return;
        }
    }
    if !emitter.warn_all(dependencies.warnings.clone()).await {
        return;
    }

    // Optional validation + bounded repair, with intermediate events.
    if request.options.validate && !request.overlay_mode() {
        if !stream_validation(&generator, &request, &mut session, &emitter).await {
            return;
        }
    }
    if !emitter.warn_all(session.warnings.drain(..)).await {
        return;
    }

    debug!(files = session.files.len(), "stream complete");
    emitter
        .send(StreamEvent::Done {
            files_count: session.files.len(),
        })
        .await;
}

/// Validation for the streaming path: emits a `validation` event per run
/// and a `repair` event per repair call, bounded by the configured budget.
async fn stream_validation(
    generator: &Generator,
    request: &GenerateRequest,
    session: &mut GenerationSession,
    emitter: &Emitter,
) -> bool {
    let checks = generator.effective_checks(&request.options);
    let timeout = std::time::Duration::from_secs(generator.config.validator.timeout_secs);

    let scratch = match tempfile::Builder::new().prefix("synthd-validate-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            return emitter
                .send(StreamEvent::Warning(format!(
                    "could not create validation workspace: {e}"
                )))
                .await;
        }
    };
    if let Err(e) = validate::materialize(scratch.path(), &session.files) {
        return emitter
            .send(StreamEvent::Warning(format!(
                "could not materialize files for validation: {e}"
            )))
            .await;
    }

    let mut report = generator
        .validator
        .validate(scratch.path(), &checks, timeout)
        .await;
    if !emitter.send(StreamEvent::Validation(report.clone())).await {
        return false;
    }
    if !report.failed() {
        return true;
    }

    let budget = request
        .options
        .repair_attempts
        .unwrap_or(generator.config.validator.repair_attempts);
    let policy = crate::model::RetryPolicy {
        max_retries: 1,
        ..generator.effective_policy(&request.options)
    };

    for attempt in 1..=budget {
        let outcome = attempt_repair(
            generator.model.as_ref(),
            &request.requirements,
            &report.output,
            &session.files,
            &policy,
        )
        .await;
        session.warn_all(outcome.diagnostics);
        let summary = RepairSummary {
            attempts: attempt,
            applied: outcome.applied,
            ok: outcome.ok,
        };
        if !emitter.send(StreamEvent::Repair(summary)).await {
            return false;
        }
        if !outcome.ok {
            break;
        }
        for record in outcome.repaired_files {
            files::upsert(&mut session.files, record);
        }

        if let Err(e) = validate::materialize(scratch.path(), &session.files) {
            session.warn(format!("could not re-materialize repaired files: {e}"));
            break;
        }
        report = generator
            .validator
            .validate(scratch.path(), &checks, timeout)
            .await;
        if !emitter.send(StreamEvent::Validation(report.clone())).await {
            return false;
        }
        if !report.failed() {
            break;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_slices_match_bounded_sizes() {
        let content = "a".repeat(2500);
        let slices = chunk_slices(&content, 1024);
        let sizes: Vec<usize> = slices.iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn chunk_slices_respect_char_boundaries() {
        // 3-byte chars with a 4-byte budget force boundary backoff.
        let content = "日本語テキスト";
        let slices = chunk_slices(content, 4);
        assert!(slices.iter().all(|s| s.len() <= 4));
        assert_eq!(slices.concat(), content);
    }

    #[test]
    fn empty_content_yields_single_final_chunk() {
        assert_eq!(chunk_slices("", 1024), vec![""]);
    }

    #[test]
    fn events_serialize_with_event_and_payload_keys() {
        let event = StreamEvent::FileChunk {
            path: "src/app.ts".to_string(),
            chunk: "abc".to_string(),
            index: 2,
            is_final: true,
        };
        let line = event.to_line();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("valid json");
        assert_eq!(value["event"], "file_chunk");
        assert_eq!(value["payload"]["index"], 2);
        assert_eq!(value["payload"]["final"], true);
    }

    #[test]
    fn done_event_shape() {
        let value: serde_json::Value =
            serde_json::from_str(StreamEvent::Done { files_count: 7 }.to_line().trim())
                .expect("valid json");
        assert_eq!(value["event"], "done");
        assert_eq!(value["payload"]["files_count"], 7);
    }
}
