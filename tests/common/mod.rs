//! Shared test fixtures: a scripted model client and a hermetic pipeline.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use synthd::config::SynthConfig;
use synthd::deps::cache::MemoryVersionCache;
use synthd::deps::registry::RegistryClient;
use synthd::deps::resolver::DependencyResolver;
use synthd::model::{ExpectedShape, ModelClient, ModelError, RetryPolicy};
use synthd::pipeline::orchestrator::Generator;
use synthd::validate::{CheckFlags, ValidationReport, Validator};

/// Routes each invocation by instruction text + expected shape, and counts
/// calls so tests can assert how often the model was consulted.
#[allow(dead_code)]
pub struct ScriptedModel {
    route: Box<dyn Fn(&str, ExpectedShape) -> Result<Value, String> + Send + Sync>,
    pub generation_calls: AtomicUsize,
    pub repair_calls: AtomicUsize,
    pub gate_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(
        route: impl Fn(&str, ExpectedShape) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            route: Box::new(route),
            generation_calls: AtomicUsize::new(0),
            repair_calls: AtomicUsize::new(0),
            gate_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn invoke(
        &self,
        instruction: &str,
        shape: ExpectedShape,
        _retry: &RetryPolicy,
    ) -> Result<Value, ModelError> {
        match shape {
            ExpectedShape::Followups => self.gate_calls.fetch_add(1, Ordering::SeqCst),
            _ if instruction.contains("repairing source files") => {
                self.repair_calls.fetch_add(1, Ordering::SeqCst)
            }
            _ => self.generation_calls.fetch_add(1, Ordering::SeqCst),
        };
        (self.route)(instruction, shape).map_err(|message| ModelError::Exhausted {
            attempts: 1,
            last_error: message,
        })
    }
}

/// A validator with a fixed verdict, independent of the environment.
#[allow(dead_code)]
pub struct FixedValidator {
    pub ok: bool,
}

#[async_trait]
impl Validator for FixedValidator {
    async fn validate(
        &self,
        _dir: &std::path::Path,
        _checks: &CheckFlags,
        _timeout: Duration,
    ) -> ValidationReport {
        ValidationReport {
            checked: true,
            ok: Some(self.ok),
            skipped: false,
            output: if self.ok {
                String::new()
            } else {
                "error TS2304: Cannot find name 'foo'.".to_string()
            },
            per_check: Default::default(),
        }
    }
}

/// Generator wired to the scripted model and a registry that cannot be
/// reached — curated/cache hits are the only way to pin.
pub fn hermetic_generator(model: Arc<ScriptedModel>) -> Arc<Generator> {
    let config = Arc::new(SynthConfig::default());
    let registry = Arc::new(RegistryClient::new(
        "http://127.0.0.1:9",
        Duration::from_millis(200),
    ));
    let cache = Arc::new(MemoryVersionCache::new(Duration::from_secs(3600)));
    let resolver =
        Arc::new(DependencyResolver::new(registry, cache, Duration::from_secs(1)).without_lockfile());
    Arc::new(Generator::new(config, model, resolver))
}
