pub mod config;
pub mod debuglog;
pub mod deps;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod rest;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use config::SynthConfig;
use deps::cache::MemoryVersionCache;
use deps::registry::RegistryClient;
use deps::resolver::DependencyResolver;
use model::gemini::GeminiClient;
use model::ModelClient;
use pipeline::orchestrator::Generator;

/// Shared application state passed to every route handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<SynthConfig>,
    pub generator: Arc<Generator>,
}

impl AppContext {
    /// Wire the pipeline from configuration: model client from the
    /// environment, registry client, in-process version cache, resolver.
    pub fn new(config: SynthConfig) -> Result<Self> {
        let config = Arc::new(config);

        let model: Arc<dyn ModelClient> = Arc::new(GeminiClient::from_env(
            &config.model.api_base,
            &config.model.name,
        )?);

        let registry = Arc::new(RegistryClient::new(
            &config.registry.url,
            Duration::from_secs(config.registry.timeout_secs),
        ));
        let cache = Arc::new(MemoryVersionCache::new(Duration::from_secs(
            config.registry.cache_ttl_secs,
        )));
        let resolver = Arc::new(DependencyResolver::new(
            registry,
            cache,
            Duration::from_secs(config.registry.lockfile_timeout_secs),
        ));

        let generator = Arc::new(Generator::new(config.clone(), model, resolver));

        Ok(Self { config, generator })
    }
}
