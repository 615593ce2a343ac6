// SPDX-License-Identifier: MIT
//! Clarifying-question gate.
//!
//! One model call decides whether the request carries enough information to
//! generate. Candidates are parsed defensively, deduplicated against the
//! caller-supplied history, dropped when an existing answer already covers
//! them, filtered by urgency, and truncated. An explicit question request
//! never comes back empty — a fixed fallback question guarantees that.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::model::coerce::{self, RawFollowup};
use crate::model::{ExpectedShape, ModelClient, RetryPolicy};
use crate::pipeline::Requirements;
use crate::prompts;

/// Urgency assumed for candidates the model returned without one. Above the
/// default threshold — a question the model bothered to ask should survive
/// filtering unless it scored it low itself.
const DEFAULT_URGENCY: f64 = 0.5;

/// Safe generic questions used to pad an explicit request the model
/// under-filled.
const PAD_BANK: &[&str] = &[
    "Which pages should the app include (e.g., home, about, blog, contact)?",
    "List the core features required (search, auth, forms, ecommerce, CMS editing).",
    "Do you want user authentication? If yes, what type (email, OAuth, SSO)?",
    "Describe the visual style briefly (minimal, corporate, colorful, design system).",
    "What is the target audience?",
];

/// Emitted when an explicit question request filtered down to nothing.
const FALLBACK_QUESTION: &str =
    "Please list the key requirements for the app (pages, main features, and visual style).";

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FollowupKind {
    #[default]
    FreeText,
    Boolean,
    Choice,
    Multichoice,
}

impl FollowupKind {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|k| k.trim().to_ascii_lowercase()).as_deref() {
            Some("boolean") | Some("bool") | Some("yes/no") => FollowupKind::Boolean,
            Some("choice") | Some("select") => FollowupKind::Choice,
            Some("multichoice") | Some("multi-choice") | Some("multiselect") => {
                FollowupKind::Multichoice
            }
            _ => FollowupKind::FreeText,
        }
    }
}

/// One clarifying question surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupItem {
    pub id: String,
    pub question: String,
    pub kind: FollowupKind,
    pub urgency: f64,
    pub default: String,
}

/// Gate decision: enough information, or ask first.
#[derive(Debug, Clone)]
pub enum GateResult {
    Proceed,
    Ask(Vec<FollowupItem>),
}

/// Gate tuning — defaults come from daemon config; `requested` is set only
/// when the caller explicitly asked for questions.
#[derive(Debug, Clone)]
pub struct GateOptions {
    pub requested: Option<usize>,
    pub max_questions: usize,
    pub urgency_threshold: f64,
}

// ─── Gate ────────────────────────────────────────────────────────────────────

pub struct FollowupGate<'a> {
    model: &'a dyn ModelClient,
    policy: RetryPolicy,
}

impl<'a> FollowupGate<'a> {
    pub fn new(model: &'a dyn ModelClient, policy: RetryPolicy) -> Self {
        Self { model, policy }
    }

    /// Decide whether generation can proceed. Never blocks the pipeline on
    /// its own failure: a dead gate call records a diagnostic and proceeds.
    pub async fn decide(
        &self,
        requirements: &Requirements,
        options: &GateOptions,
    ) -> (GateResult, Vec<String>) {
        let max = options
            .requested
            .unwrap_or(options.max_questions)
            .max(1);

        let instruction = prompts::followup_gate(requirements, max);
        let value = match self
            .model
            .invoke(&instruction, ExpectedShape::Followups, &self.policy)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "followup gate call failed — proceeding");
                return (
                    GateResult::Proceed,
                    vec![format!("followup gate unavailable: {e}")],
                );
            }
        };

        let (raw, diagnostics) = coerce::coerce_followups(&value);
        let items = self.filter(raw, requirements, options, max);

        if items.is_empty() {
            (GateResult::Proceed, diagnostics)
        } else {
            (GateResult::Ask(items), diagnostics)
        }
    }

    fn filter(
        &self,
        raw: Vec<RawFollowup>,
        requirements: &Requirements,
        options: &GateOptions,
        max: usize,
    ) -> Vec<FollowupItem> {
        let asked: Vec<String> = requirements
            .history
            .asked
            .iter()
            .map(|q| normalize_question(q))
            .collect();
        let answers: Vec<String> = requirements
            .history
            .answers
            .values()
            .map(|a| normalize_question(a))
            .filter(|a| !a.is_empty())
            .collect();

        let mut seen: Vec<String> = Vec::new();
        let mut items: Vec<FollowupItem> = Vec::new();

        for candidate in raw {
            let normalized = normalize_question(&candidate.question);
            if normalized.is_empty()
                || asked.contains(&normalized)
                || seen.contains(&normalized)
                || covered_by_answer(&normalized, &answers)
            {
                continue;
            }
            let urgency = candidate.urgency.unwrap_or(DEFAULT_URGENCY);
            if urgency < options.urgency_threshold {
                continue;
            }
            seen.push(normalized);
            items.push(FollowupItem {
                id: format!("q_{}", Uuid::new_v4().simple()),
                question: candidate.question.trim().to_string(),
                kind: FollowupKind::parse(candidate.kind.as_deref()),
                urgency: urgency.clamp(0.0, 1.0),
                default: candidate.default.unwrap_or_default(),
            });
        }

        items.truncate(max);

        // Explicit requests: pad from the bank up to the requested count,
        // still skipping anything history covers.
        if options.requested.is_some() {
            for pad in PAD_BANK {
                if items.len() >= max {
                    break;
                }
                let normalized = normalize_question(pad);
                if asked.contains(&normalized)
                    || seen.contains(&normalized)
                    || covered_by_answer(&normalized, &answers)
                {
                    continue;
                }
                seen.push(normalized);
                items.push(FollowupItem {
                    id: format!("q_{}", Uuid::new_v4().simple()),
                    question: pad.to_string(),
                    kind: FollowupKind::FreeText,
                    urgency: DEFAULT_URGENCY,
                    default: String::new(),
                });
            }

            // Never return empty for an explicit request.
            if items.is_empty() {
                items.push(FollowupItem {
                    id: format!("q_{}", Uuid::new_v4().simple()),
                    question: FALLBACK_QUESTION.to_string(),
                    kind: FollowupKind::FreeText,
                    urgency: 1.0,
                    default: String::new(),
                });
            }
        }

        items
    }
}

// ─── Text matching ───────────────────────────────────────────────────────────

/// Case-insensitive, whitespace-collapsed comparison form.
fn normalize_question(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Conservative "already covered" heuristic: the candidate matches an
/// answer as a substring in either direction.
fn covered_by_answer(normalized: &str, answers: &[String]) -> bool {
    answers
        .iter()
        .any(|answer| answer.contains(normalized) || normalized.contains(answer.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use crate::pipeline::FollowupHistory;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct ScriptedModel(Result<Value, ()>);

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn invoke(
            &self,
            _instruction: &str,
            _shape: ExpectedShape,
            _retry: &RetryPolicy,
        ) -> Result<Value, ModelError> {
            self.0.clone().map_err(|_| ModelError::Exhausted {
                attempts: 2,
                last_error: "down".to_string(),
            })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(1),
        }
    }

    fn options() -> GateOptions {
        GateOptions {
            requested: None,
            max_questions: 5,
            urgency_threshold: 0.25,
        }
    }

    #[tokio::test]
    async fn empty_followups_proceed() {
        let model = ScriptedModel(Ok(json!({"followups": []})));
        let gate = FollowupGate::new(&model, policy());
        let (result, _) = gate.decide(&Requirements::default(), &options()).await;
        assert!(matches!(result, GateResult::Proceed));
    }

    #[tokio::test]
    async fn asked_history_is_never_resurfaced() {
        let model = ScriptedModel(Ok(json!({"followups": [
            "  which PAGES do you need?  ",
            "What color scheme do you prefer?",
        ]})));
        let gate = FollowupGate::new(&model, policy());
        let requirements = Requirements {
            history: FollowupHistory {
                asked: vec!["Which pages do you need?".to_string()],
                ..FollowupHistory::default()
            },
            ..Requirements::default()
        };
        let (result, _) = gate.decide(&requirements, &options()).await;
        let GateResult::Ask(items) = result else {
            panic!("expected questions");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].question, "What color scheme do you prefer?");
    }

    #[tokio::test]
    async fn answered_ground_is_dropped_by_substring() {
        let model = ScriptedModel(Ok(json!({"followups": ["user authentication"]})));
        let gate = FollowupGate::new(&model, policy());
        let mut history = FollowupHistory::default();
        history.answers.insert(
            "q_1".to_string(),
            "We need user authentication with OAuth".to_string(),
        );
        let requirements = Requirements {
            history,
            ..Requirements::default()
        };
        let (result, _) = gate.decide(&requirements, &options()).await;
        assert!(matches!(result, GateResult::Proceed));
    }

    #[tokio::test]
    async fn low_urgency_is_filtered_out() {
        let model = ScriptedModel(Ok(json!({"followups": [
            {"question": "Crucial?", "urgency": 0.9},
            {"question": "Trivia?", "urgency": 0.1},
        ]})));
        let gate = FollowupGate::new(&model, policy());
        let (result, _) = gate.decide(&Requirements::default(), &options()).await;
        let GateResult::Ask(items) = result else {
            panic!("expected questions");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].question, "Crucial?");
    }

    #[tokio::test]
    async fn truncates_to_requested_maximum() {
        let questions: Vec<Value> = (0..10)
            .map(|i| json!(format!("Question number {i}?")))
            .collect();
        let model = ScriptedModel(Ok(json!({ "followups": questions })));
        let gate = FollowupGate::new(&model, policy());
        let opts = GateOptions {
            requested: Some(3),
            ..options()
        };
        let (result, _) = gate.decide(&Requirements::default(), &opts).await;
        let GateResult::Ask(items) = result else {
            panic!("expected questions");
        };
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn explicit_request_never_returns_empty() {
        // Model says nothing; history already covers the whole pad bank.
        let model = ScriptedModel(Ok(json!({"followups": []})));
        let gate = FollowupGate::new(&model, policy());
        let requirements = Requirements {
            history: FollowupHistory {
                asked: PAD_BANK.iter().map(|q| q.to_string()).collect(),
                ..FollowupHistory::default()
            },
            ..Requirements::default()
        };
        let opts = GateOptions {
            requested: Some(2),
            ..options()
        };
        let (result, _) = gate.decide(&requirements, &opts).await;
        let GateResult::Ask(items) = result else {
            panic!("expected fallback question");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].question, FALLBACK_QUESTION);
    }

    #[tokio::test]
    async fn explicit_request_pads_from_bank() {
        let model = ScriptedModel(Ok(json!({"followups": ["Custom question?"]})));
        let gate = FollowupGate::new(&model, policy());
        let opts = GateOptions {
            requested: Some(3),
            ..options()
        };
        let (result, _) = gate.decide(&Requirements::default(), &opts).await;
        let GateResult::Ask(items) = result else {
            panic!("expected questions");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].question, "Custom question?");
        assert_eq!(items[1].question, PAD_BANK[0]);
    }

    #[tokio::test]
    async fn dead_gate_proceeds_with_diagnostic() {
        let model = ScriptedModel(Err(()));
        let gate = FollowupGate::new(&model, policy());
        let (result, diagnostics) = gate.decide(&Requirements::default(), &options()).await;
        assert!(matches!(result, GateResult::Proceed));
        assert!(diagnostics[0].contains("followup gate unavailable"));
    }
}
