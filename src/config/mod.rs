//! Daemon configuration: compiled defaults → `config.toml` → environment.
//!
//! Every tunable the pipeline consumes lives here so a request can run with
//! nothing but defaults. Per-request overrides (retry count, timeout,
//! question budget) are carried on the request options, not here.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::model::RetryPolicy;

const DEFAULT_PORT: u16 = 4460;
const DEFAULT_BIND: &str = "127.0.0.1";

const DEFAULT_MODEL_NAME: &str = "gemini-2.5-flash-lite";
const DEFAULT_MODEL_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL_RETRIES: u32 = 2;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 180;
const DEFAULT_GATE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

const DEFAULT_CHUNK_SIZE: usize = 10;
const DEFAULT_STREAM_CHUNK_BYTES: usize = 1024;
const DEFAULT_MAX_QUESTIONS: usize = 5;
const DEFAULT_URGENCY_THRESHOLD: f64 = 0.25;

const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";
const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_LOCKFILE_TIMEOUT_SECS: u64 = 120;

const DEFAULT_VALIDATOR_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REPAIR_ATTEMPTS: u32 = 1;

// ─── ModelConfig ─────────────────────────────────────────────────────────────

/// Generative model client configuration (`[model]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier passed to the API.
    pub name: String,
    /// API base URL. The key is read from `GEMINI_API_KEY` at startup.
    pub api_base: String,
    /// Retries per generation call (total attempts = 1 + retries).
    pub retries: u32,
    /// Per-attempt timeout for generation calls, in seconds.
    pub timeout_secs: u64,
    /// Per-attempt timeout for the (cheaper) followup-gate call, in seconds.
    pub gate_timeout_secs: u64,
    /// Linear backoff base between retries, in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL_NAME.to_string(),
            api_base: DEFAULT_MODEL_API_BASE.to_string(),
            retries: DEFAULT_MODEL_RETRIES,
            timeout_secs: DEFAULT_MODEL_TIMEOUT_SECS,
            gate_timeout_secs: DEFAULT_GATE_TIMEOUT_SECS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        }
    }
}

impl ModelConfig {
    /// Retry policy for full generation calls.
    pub fn generation_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            timeout: Duration::from_secs(self.timeout_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    /// Retry policy for the followup gate: one retry, short timeout.
    /// A slow or failing gate must not block generation.
    pub fn gate_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            timeout: Duration::from_secs(self.gate_timeout_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

// ─── GeneratorConfig ─────────────────────────────────────────────────────────

/// Orchestrator tunables (`[generator]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Components per generation call when the request decomposes into units.
    pub chunk_size: usize,
    /// Maximum bytes per `file_chunk` stream event.
    pub stream_chunk_bytes: usize,
    /// Default maximum followup questions returned by the gate.
    pub max_questions: usize,
    /// Followup candidates below this urgency are dropped.
    pub urgency_threshold: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
            max_questions: DEFAULT_MAX_QUESTIONS,
            urgency_threshold: DEFAULT_URGENCY_THRESHOLD,
        }
    }
}

// ─── RegistryConfig ──────────────────────────────────────────────────────────

/// Package registry configuration (`[registry]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry base URL (exact-name lookups and the `-/v1/search` endpoint).
    pub url: String,
    /// Hard deadline for any single registry HTTP call, in seconds.
    pub timeout_secs: u64,
    /// Version cache TTL, in seconds. Stale entries are treated as absent.
    pub cache_ttl_secs: u64,
    /// Deadline for the lockfile-style `npm` resolution subprocess, in seconds.
    pub lockfile_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY_URL.to_string(),
            timeout_secs: DEFAULT_REGISTRY_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            lockfile_timeout_secs: DEFAULT_LOCKFILE_TIMEOUT_SECS,
        }
    }
}

// ─── ValidatorConfig ─────────────────────────────────────────────────────────

/// Validation / repair loop configuration (`[validator]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Hard timeout per external check subprocess, in seconds.
    pub timeout_secs: u64,
    /// Repair model calls allowed after a failed validation.
    pub repair_attempts: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_VALIDATOR_TIMEOUT_SECS,
            repair_attempts: DEFAULT_REPAIR_ATTEMPTS,
        }
    }
}

// ─── SynthConfig ─────────────────────────────────────────────────────────────

/// Full daemon configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SynthConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub generator: GeneratorConfig,
    pub registry: RegistryConfig,
    pub validator: ValidatorConfig,
}

/// HTTP server + logging settings (`[server]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    /// `tracing` env-filter string, e.g. `"info"` or `"synthd=debug"`.
    pub log_level: String,
    /// `"pretty"` (compact human format) or `"json"`.
    pub log_format: String,
    /// When set, incoming requests and raw model output are dumped here as
    /// JSON files for offline debugging. Best-effort; never fails a request.
    pub debug_log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND.to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            debug_log_dir: None,
        }
    }
}

impl SynthConfig {
    /// Load configuration: compiled defaults, overlaid with `config.toml`
    /// (when present), overlaid with `SYNTHD_*` environment variables.
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config = config_path
            .and_then(load_toml)
            .unwrap_or_default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("SYNTHD_PORT") {
            self.server.port = port;
        }
        if let Some(bind) = env_string("SYNTHD_BIND") {
            self.server.bind_address = bind;
        }
        if let Some(level) = env_string("SYNTHD_LOG") {
            self.server.log_level = level;
        }
        if let Some(format) = env_string("SYNTHD_LOG_FORMAT") {
            self.server.log_format = format;
        }
        if let Some(dir) = env_string("SYNTHD_DEBUG_LOG_DIR") {
            self.server.debug_log_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = env_string("SYNTHD_MODEL") {
            self.model.name = name;
        }
        if let Some(base) = env_string("SYNTHD_MODEL_API_BASE") {
            self.model.api_base = base;
        }
        if let Some(retries) = env_parse::<u32>("SYNTHD_RETRY_COUNT") {
            self.model.retries = retries;
        }
        if let Some(timeout) = env_parse::<u64>("SYNTHD_TIMEOUT") {
            self.model.timeout_secs = timeout;
        }
        if let Some(size) = env_parse::<usize>("SYNTHD_CHUNK_SIZE") {
            self.generator.chunk_size = size;
        }
        if let Some(bytes) = env_parse::<usize>("SYNTHD_STREAM_CHUNK") {
            self.generator.stream_chunk_bytes = bytes;
        }
        if let Some(url) = env_string("SYNTHD_REGISTRY_URL") {
            self.registry.url = url;
        }
        if let Some(ttl) = env_parse::<u64>("SYNTHD_CACHE_TTL") {
            self.registry.cache_ttl_secs = ttl;
        }
        if let Some(timeout) = env_parse::<u64>("SYNTHD_VALIDATOR_TIMEOUT") {
            self.validator.timeout_secs = timeout;
        }
        if let Some(attempts) = env_parse::<u32>("SYNTHD_REPAIR_ATTEMPTS") {
            self.validator.repair_attempts = attempts;
        }
    }
}

fn load_toml(path: &Path) -> Option<SynthConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<SynthConfig>(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("invalid config file {}: {e} — using defaults", path.display());
            None
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_contract() {
        let config = SynthConfig::default();
        assert_eq!(config.generator.chunk_size, 10);
        assert_eq!(config.generator.stream_chunk_bytes, 1024);
        assert_eq!(config.generator.max_questions, 5);
        assert_eq!(config.model.retries, 2);
        assert_eq!(config.model.timeout_secs, 180);
        assert_eq!(config.registry.cache_ttl_secs, 24 * 3600);
        assert_eq!(config.validator.repair_attempts, 1);
    }

    #[test]
    fn toml_section_overrides_default() {
        let parsed: SynthConfig = toml::from_str(
            r#"
            [generator]
            chunk_size = 4

            [registry]
            url = "http://localhost:4873"
            "#,
        )
        .expect("valid toml");
        assert_eq!(parsed.generator.chunk_size, 4);
        assert_eq!(parsed.registry.url, "http://localhost:4873");
        // untouched sections keep defaults
        assert_eq!(parsed.model.retries, 2);
    }
}
