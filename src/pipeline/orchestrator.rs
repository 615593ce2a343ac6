// SPDX-License-Identifier: MIT
//! Top-level generation orchestration.
//!
//! One request flows: followup gate → (early exit | generation calls) →
//! merge/dedupe → dependency pinning → optional validate/repair →
//! response assembly. The streaming twin in [`super::stream`] drives the
//! same helpers and emits events instead of returning once.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SynthConfig;
use crate::debuglog;
use crate::deps::resolver::DependencyResolver;
use crate::deps::{DependencyMeta, DependencyRequest};
use crate::model::coerce::{self, GenerationResult, OverlayResult};
use crate::model::{ExpectedShape, ModelClient, ModelError, RetryPolicy};
use crate::pipeline::files;
use crate::pipeline::followup::{FollowupGate, FollowupItem, GateOptions, GateResult};
use crate::pipeline::{
    ComponentSpec, FileRecord, GenerateOptions, GenerateRequest, GenerateResponse,
    GenerationSession, RepairSummary, ResponseMetadata,
};
use crate::prompts;
use crate::validate::repair::attempt_repair;
use crate::validate::{self, CheckFlags, ToolValidator, ValidationReport, Validator};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// The pipeline's one fatal outcome: a generation call that exhausted its
/// retry budget. Everything else degrades to warnings inside the response.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

// ─── Generator ───────────────────────────────────────────────────────────────

pub struct Generator {
    pub config: Arc<SynthConfig>,
    pub model: Arc<dyn ModelClient>,
    pub resolver: Arc<DependencyResolver>,
    pub validator: Arc<dyn Validator>,
}

impl Generator {
    pub fn new(
        config: Arc<SynthConfig>,
        model: Arc<dyn ModelClient>,
        resolver: Arc<DependencyResolver>,
    ) -> Self {
        Self {
            config,
            model,
            resolver,
            validator: Arc::new(ToolValidator),
        }
    }

    /// Swap the validator implementation (deterministic validators in tests).
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    // ─── Single-shot entrypoint ──────────────────────────────────────────────

    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, PipelineError> {
        if request.options.debug {
            debuglog::write(
                self.config.server.debug_log_dir.as_deref(),
                "generate_incoming",
                &json!(&request),
            );
        }

        let mut session = GenerationSession::new();

        // Followup gate — may end the request before any generation.
        if let Some(followups) = self.run_gate(&request, &mut session).await {
            info!(count = followups.len(), "gate declined — returning followups");
            return Ok(GenerateResponse {
                project_name: request.requirements.project_name(),
                files: Vec::new(),
                metadata: ResponseMetadata {
                    generated_at: now(),
                    warnings: session.warnings,
                    ..ResponseMetadata::default()
                },
                followups: Some(followups),
            });
        }

        // Generation + dependency pinning.
        let dependencies = if request.overlay_mode() {
            self.run_overlay(&request, &mut session).await?
        } else {
            self.run_generation(&request, &mut session).await?;
            self.resolver.apply_to_manifest(&mut session.files).await
        };

        // Optional validation + bounded repair. Overlay deltas are not a
        // checkable tree on their own, so validation only runs full-set.
        let (validation, repair) = if request.options.validate && !request.overlay_mode() {
            self.run_validation(&request, &mut session).await
        } else {
            (ValidationReport::default(), None)
        };

        let debug_payload = request
            .options
            .debug
            .then(|| json!({ "traces": session.traces }));

        Ok(GenerateResponse {
            project_name: request.requirements.project_name(),
            files: session.files,
            metadata: ResponseMetadata {
                generated_at: now(),
                warnings: session.warnings,
                validation,
                dependencies: Some(dependencies),
                repair,
                debug: debug_payload,
            },
            followups: None,
        })
    }

    // ─── Gate ────────────────────────────────────────────────────────────────

    /// Run the followup gate. Returns questions when the request must end
    /// early: the gate declined and no answers exist yet for this round.
    pub(crate) async fn run_gate(
        &self,
        request: &GenerateRequest,
        session: &mut GenerationSession,
    ) -> Option<Vec<FollowupItem>> {
        let options = &request.options;
        let answered = !request.requirements.history.answers.is_empty();

        // Once answers are in and the caller is not explicitly asking for
        // more questions, the gate has nothing left to decide.
        if answered && !options.request_questions {
            return None;
        }

        let gate = FollowupGate::new(self.model.as_ref(), self.config.model.gate_policy());
        let (result, diagnostics) = gate
            .decide(&request.requirements, &self.gate_options(options))
            .await;
        session.warn_all(diagnostics);

        match result {
            GateResult::Proceed => None,
            GateResult::Ask(_) if answered => None,
            GateResult::Ask(items) => Some(items),
        }
    }

    pub(crate) fn gate_options(&self, options: &GenerateOptions) -> GateOptions {
        GateOptions {
            requested: options
                .request_questions
                .then(|| options.max_questions.unwrap_or(self.config.generator.max_questions)),
            max_questions: self.config.generator.max_questions,
            urgency_threshold: self.config.generator.urgency_threshold,
        }
    }

    // ─── Generation calls ────────────────────────────────────────────────────

    pub(crate) fn effective_policy(&self, options: &GenerateOptions) -> RetryPolicy {
        self.config
            .model
            .generation_policy()
            .with_overrides(options.retries, options.timeout_secs)
    }

    /// Partition components into fixed-size batches.
    pub(crate) fn chunks<'a>(&self, components: &'a [ComponentSpec]) -> Vec<&'a [ComponentSpec]> {
        components
            .chunks(self.config.generator.chunk_size.max(1))
            .collect()
    }

    /// One generation call: invoke, coerce, record diagnostics as warnings.
    pub(crate) async fn call_generation(
        &self,
        instruction: &str,
        policy: &RetryPolicy,
    ) -> Result<(GenerationResult, Vec<String>), ModelError> {
        let value = self
            .model
            .invoke(instruction, ExpectedShape::Generation, policy)
            .await?;
        let (result, diagnostics) = coerce::coerce_generation(&value);
        Ok((result, diagnostics))
    }

    /// Full- or chunked-mode generation into the session.
    ///
    /// Chunk calls are issued concurrently but merged in batch order, so
    /// the outcome is deterministic regardless of completion order.
    async fn run_generation(
        &self,
        request: &GenerateRequest,
        session: &mut GenerationSession,
    ) -> Result<(), PipelineError> {
        let requirements = &request.requirements;
        let policy = self.effective_policy(&request.options);

        if requirements.components.is_empty() {
            let instruction = prompts::full_generation(requirements);
            let (result, diagnostics) = self.call_generation(&instruction, &policy).await?;
            self.absorb(session, result, diagnostics, &request.options, "full");
            return Ok(());
        }

        let batches = self.chunks(&requirements.components);
        debug!(batches = batches.len(), "chunked generation");

        let policy = &policy;
        let calls = batches.iter().map(|batch| {
            let instruction = prompts::chunk_generation(requirements, batch);
            async move { self.call_generation(&instruction, policy).await }
        });
        let outcomes = futures_util::future::join_all(calls).await;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let (result, diagnostics) = outcome?;
            self.absorb(
                session,
                result,
                diagnostics,
                &request.options,
                &format!("chunk_{index}"),
            );
        }

        // Trailing project-level scaffolding call.
        let instruction = prompts::scaffolding(requirements);
        let (result, diagnostics) = self.call_generation(&instruction, policy).await?;
        self.absorb(session, result, diagnostics, &request.options, "scaffold");
        Ok(())
    }

    /// Merge one call's outcome into the session.
    fn absorb(
        &self,
        session: &mut GenerationSession,
        result: GenerationResult,
        diagnostics: Vec<String>,
        options: &GenerateOptions,
        stage: &str,
    ) {
        session.trace(
            options.debug,
            json!({ "stage": stage, "files": result.files.len(), "diagnostics": &diagnostics }),
        );
        session.warn_all(diagnostics);
        session.warn_all(result.warnings);
        files::merge_into(&mut session.files, result.files, &mut session.warnings);
    }

    // ─── Overlay mode ────────────────────────────────────────────────────────

    /// Overlay generation: delta semantics plus pinning of the additionally
    /// required package names. The manifest itself is never produced.
    async fn run_overlay(
        &self,
        request: &GenerateRequest,
        session: &mut GenerationSession,
    ) -> Result<DependencyMeta, PipelineError> {
        let policy = self.effective_policy(&request.options);
        let base = files::base_index(&request.base_files, &request.asset_files);

        // The model sees the base tree minus the manifest — overlay output
        // must never touch it.
        let context: Vec<FileRecord> = base
            .iter()
            .filter(|(path, _)| !files::is_manifest_path(path))
            .map(|(path, content)| FileRecord::new(path.clone(), content.clone()))
            .collect();

        let instruction = prompts::overlay(&request.requirements, &context);
        let value = self
            .model
            .invoke(&instruction, ExpectedShape::Overlay, &policy)
            .await?;
        let (result, diagnostics): (OverlayResult, Vec<String>) = coerce::coerce_overlay(&value);

        session.trace(
            request.options.debug,
            json!({ "stage": "overlay", "files": result.files.len(), "diagnostics": &diagnostics }),
        );
        session.warn_all(diagnostics);
        session.warn_all(result.warnings);

        // Normalize + guard, then reduce to the actual delta.
        let mut candidates = Vec::new();
        files::merge_into(&mut candidates, result.files, &mut session.warnings);
        session.files = files::overlay_delta(candidates, &base);

        // Pin the newly required names; there is no manifest to rewrite.
        let requests: Vec<DependencyRequest> = result
            .new_dependencies
            .iter()
            .map(|name| DependencyRequest::new(name.clone(), ""))
            .collect();
        let (resolved, lockfile, warnings) = self.resolver.resolve_pinned(&requests).await;
        let pinned = resolved
            .iter()
            .filter_map(|entry| {
                entry
                    .version
                    .clone()
                    .map(|version| (entry.name.clone(), version))
            })
            .collect();

        Ok(DependencyMeta {
            resolved,
            pinned,
            warnings,
            lockfile,
        })
    }

    // ─── Validation + repair ─────────────────────────────────────────────────

    pub(crate) fn effective_checks(&self, options: &GenerateOptions) -> CheckFlags {
        if options.checks.any() {
            options.checks
        } else {
            CheckFlags::typecheck_only()
        }
    }

    /// Materialize, validate, and drive the bounded repair loop.
    ///
    /// The loop issues exactly one repair call per budget unit and re-runs
    /// validation once after each applied repair; it terminates on budget
    /// exhaustion regardless of what the repair returned.
    pub(crate) async fn run_validation(
        &self,
        request: &GenerateRequest,
        session: &mut GenerationSession,
    ) -> (ValidationReport, Option<RepairSummary>) {
        let checks = self.effective_checks(&request.options);
        let timeout = std::time::Duration::from_secs(self.config.validator.timeout_secs);

        let scratch = match tempfile::Builder::new().prefix("synthd-validate-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                session.warn(format!("could not create validation workspace: {e}"));
                return (ValidationReport::default(), None);
            }
        };
        if let Err(e) = validate::materialize(scratch.path(), &session.files) {
            session.warn(format!("could not materialize files for validation: {e}"));
            return (ValidationReport::default(), None);
        }

        let mut report = self.validator.validate(scratch.path(), &checks, timeout).await;
        if !report.failed() {
            return (report, None);
        }

        let budget = request
            .options
            .repair_attempts
            .unwrap_or(self.config.validator.repair_attempts);
        let policy = RetryPolicy {
            max_retries: 1,
            ..self.effective_policy(&request.options)
        };

        let mut attempts = 0;
        let mut applied = 0;
        let mut produced = false;
        for _ in 0..budget {
            attempts += 1;
            let outcome = attempt_repair(
                self.model.as_ref(),
                &request.requirements,
                &report.output,
                &session.files,
                &policy,
            )
            .await;
            session.warn_all(outcome.diagnostics);
            if !outcome.ok {
                break;
            }
            produced = true;
            applied += outcome.applied;
            for record in outcome.repaired_files {
                files::upsert(&mut session.files, record);
            }

            if let Err(e) = validate::materialize(scratch.path(), &session.files) {
                session.warn(format!("could not re-materialize repaired files: {e}"));
                break;
            }
            report = self.validator.validate(scratch.path(), &checks, timeout).await;
            if !report.failed() {
                break;
            }
        }

        (
            report,
            Some(RepairSummary {
                attempts,
                applied,
                ok: produced,
            }),
        )
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
