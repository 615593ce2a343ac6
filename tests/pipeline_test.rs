//! End-to-end pipeline tests against a scripted model: gate short-circuit,
//! chunked merge semantics, manifest pinning, overlay deltas, and the
//! bounded repair loop.

mod common;

use common::{hermetic_generator, FixedValidator, ScriptedModel};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use synthd::deps::DependencySource;
use synthd::model::ExpectedShape;
use synthd::pipeline::{
    ComponentSpec, FileRecord, GenerateOptions, GenerateRequest, Requirements,
};

fn component(name: &str) -> ComponentSpec {
    ComponentSpec {
        name: name.to_string(),
        description: String::new(),
        fields: Vec::new(),
    }
}

#[tokio::test]
async fn gate_blocked_round_is_terminal_success() {
    let model = Arc::new(ScriptedModel::new(|_, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": ["Which pages do you need?"]})),
        _ => Ok(json!({"files": [{"path": "never.ts", "content": ""}]})),
    }));
    let generator = hermetic_generator(model.clone());

    let response = generator
        .generate(GenerateRequest::default())
        .await
        .expect("gate-blocked is not an error");

    assert!(response.files.is_empty());
    let followups = response.followups.expect("followups payload");
    assert_eq!(followups.len(), 1);
    assert_eq!(followups[0].question, "Which pages do you need?");
    // No generation call was made for a declined round.
    assert_eq!(model.generation_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn answered_round_proceeds_past_a_declining_gate() {
    let model = Arc::new(ScriptedModel::new(|_, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": ["Still unsure about pages?"]})),
        _ => Ok(json!({"files": [{"path": "src/app.ts", "content": "export {}"}]})),
    }));
    let generator = hermetic_generator(model.clone());

    let mut request = GenerateRequest::default();
    request
        .requirements
        .history
        .answers
        .insert("q_1".to_string(), "home and about pages".to_string());

    let response = generator.generate(request).await.expect("generates");
    assert!(response.followups.is_none());
    assert_eq!(response.files.len(), 1);
    // The gate itself was skipped outright — answers were already in.
    assert_eq!(model.gate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chunked_generation_merges_deterministically_and_pins_manifest() {
    // 12 components → two chunks (size 10) + one scaffold call.
    let model = Arc::new(ScriptedModel::new(|instruction, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": []})),
        _ if instruction.contains("project-level scaffolding") => Ok(json!({
            "files": [
                {"path": "package.json", "content": json!({
                    "name": "demo",
                    "dependencies": {"react": "^18", "mystery-lib": ""},
                }).to_string()},
            ],
        })),
        _ if instruction.contains("- comp11") => Ok(json!({
            "files": [
                {"path": "src/components/late.tsx", "content": "late"},
                {"path": "src/shared.ts", "content": "from-second-chunk"},
            ],
        })),
        _ => Ok(json!({
            "files": [
                {"path": "src/components/early.tsx", "content": "early"},
                {"path": "src/shared.ts", "content": "from-first-chunk"},
            ],
        })),
    }));
    let generator = hermetic_generator(model.clone());

    let request = GenerateRequest {
        requirements: Requirements {
            app_name: Some("demo".to_string()),
            components: (0..12).map(|i| component(&format!("comp{i}"))).collect(),
            ..Requirements::default()
        },
        ..GenerateRequest::default()
    };

    let response = generator.generate(request).await.expect("generates");

    // 2 chunk calls + 1 scaffold call.
    assert_eq!(model.generation_calls.load(Ordering::SeqCst), 3);

    // Later batch wins the shared path; each path appears exactly once.
    let shared: Vec<&FileRecord> = response
        .files
        .iter()
        .filter(|f| f.path == "src/shared.ts")
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].content, "from-second-chunk");

    // Manifest rewritten with the curated pin; unknown dep gets `*`.
    let manifest = response
        .files
        .iter()
        .find(|f| f.path == "package.json")
        .expect("manifest present");
    let parsed: serde_json::Value = serde_json::from_str(&manifest.content).expect("valid json");
    assert_eq!(parsed["dependencies"]["react"], "18.2.0");
    assert_eq!(parsed["dependencies"]["mystery-lib"], "*");

    let dependencies = response.metadata.dependencies.expect("dependency meta");
    let react = dependencies
        .resolved
        .iter()
        .find(|r| r.name == "react")
        .expect("react covered");
    assert_eq!(react.source, DependencySource::Curated);
    assert_eq!(react.confidence, 1.0);
    // Every requested name is covered exactly once.
    assert_eq!(
        dependencies
            .resolved
            .iter()
            .filter(|r| r.name == "mystery-lib")
            .count(),
        1
    );
}

#[tokio::test]
async fn overlay_emits_only_the_delta_and_never_the_manifest() {
    let model = Arc::new(ScriptedModel::new(|_, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": []})),
        ExpectedShape::Overlay => Ok(json!({
            "files": [
                {"path": "src/app.ts", "content": "unchanged"},
                {"path": "src/feature.ts", "content": "brand new"},
                {"path": "package.json", "content": "{\"sneaky\":true}"},
            ],
            "new_dependencies": ["react"],
        })),
        _ => Err("unexpected generation call".to_string()),
    }));
    let generator = hermetic_generator(model);

    let request = GenerateRequest {
        base_files: vec![
            FileRecord::new("src/app.ts", "unchanged"),
            FileRecord::new("package.json", "{\"name\":\"base\"}"),
        ],
        ..GenerateRequest::default()
    };

    let response = generator.generate(request).await.expect("overlay generates");

    let paths: Vec<&str> = response.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["src/feature.ts"]);

    let dependencies = response.metadata.dependencies.expect("dependency meta");
    assert_eq!(
        dependencies.pinned.get("react").map(String::as_str),
        Some("18.2.0")
    );
}

#[tokio::test]
async fn repair_budget_of_one_attempts_exactly_one_repair() {
    let model = Arc::new(ScriptedModel::new(|instruction, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": []})),
        _ if instruction.contains("repairing source files") => Ok(json!({
            "files": [{"path": "src/app.ts", "content": "still broken"}],
        })),
        _ => Ok(json!({
            "files": [{"path": "src/app.ts", "content": "broken"}],
        })),
    }));
    let generator_base = hermetic_generator(model.clone());
    let generator = Arc::new(
        synthd::pipeline::orchestrator::Generator::new(
            generator_base.config.clone(),
            model.clone(),
            generator_base.resolver.clone(),
        )
        .with_validator(Arc::new(FixedValidator { ok: false })),
    );

    let request = GenerateRequest {
        options: GenerateOptions {
            validate: true,
            ..GenerateOptions::default()
        },
        ..GenerateRequest::default()
    };

    let response = generator.generate(request).await.expect("completes");

    // Exactly one repair call; the loop terminated despite the validator
    // still failing.
    assert_eq!(model.repair_calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.metadata.validation.ok, Some(false));
    let repair = response.metadata.repair.expect("repair summary");
    assert_eq!(repair.attempts, 1);
    // The repaired content was still merged into the best-effort file set.
    assert_eq!(response.files[0].content, "still broken");
}

#[tokio::test]
async fn exhausted_generation_is_the_one_fatal_error() {
    let model = Arc::new(ScriptedModel::new(|_, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": []})),
        _ => Err("model unreachable".to_string()),
    }));
    let generator = hermetic_generator(model);

    let error = generator
        .generate(GenerateRequest::default())
        .await
        .expect_err("fatal");
    assert!(error.to_string().contains("model unreachable"));
}

#[tokio::test]
async fn malformed_model_output_degrades_to_empty_files_with_warnings() {
    let model = Arc::new(ScriptedModel::new(|_, shape| match shape {
        ExpectedShape::Followups => Ok(json!({"followups": []})),
        _ => Ok(json!("complete nonsense")),
    }));
    let generator = hermetic_generator(model);

    let response = generator
        .generate(GenerateRequest::default())
        .await
        .expect("degrades, not errors");
    assert!(response.files.is_empty());
    assert!(!response.metadata.warnings.is_empty());
}
