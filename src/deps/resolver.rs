// SPDX-License-Identifier: MIT
//! The resolution ladder and manifest rewriting.
//!
//! Per package, first match wins: curated table → shared version cache →
//! lockfile-style deterministic resolution → live registry latest-tag →
//! fuzzy search fallback. The cache is consulted before anything that
//! touches the network, so a warm cache answers repeat lookups with zero
//! external calls; it only ever holds what the network-backed steps
//! previously produced, so ladder precedence is unchanged for cold names.

use futures_util::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::deps::cache::VersionCache;
use crate::deps::registry::{LookupOutcome, RegistryClient, SEARCH_SIZE};
use crate::deps::{
    curated, lockfile, DependencyMeta, DependencyRequest, DependencySource, LockfileInfo,
    ResolvedDependency,
};
use crate::pipeline::files::{is_manifest_path, normalize_path};
use crate::pipeline::FileRecord;

const CONFIDENCE_CURATED: f64 = 1.0;
const CONFIDENCE_REGISTRY: f64 = 0.98;
const CONFIDENCE_CACHE: f64 = 0.95;
const CONFIDENCE_SEARCH: f64 = 0.3;

/// Manifest sections whose entries are collected and rewritten.
const DEPENDENCY_SECTIONS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

pub struct DependencyResolver {
    registry: Arc<RegistryClient>,
    cache: Arc<dyn VersionCache>,
    lockfile_timeout: Duration,
    /// Disabled in tests to keep resolution hermetic.
    lockfile_enabled: bool,
}

impl DependencyResolver {
    pub fn new(
        registry: Arc<RegistryClient>,
        cache: Arc<dyn VersionCache>,
        lockfile_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            lockfile_timeout,
            lockfile_enabled: true,
        }
    }

    pub fn without_lockfile(mut self) -> Self {
        self.lockfile_enabled = false;
        self
    }

    // ─── resolve_pinned ──────────────────────────────────────────────────────

    /// Resolve every request to exactly one [`ResolvedDependency`].
    ///
    /// Output order is not guaranteed to match request order, but the list
    /// covers all requested names 1:1. Search-fallback pins additionally
    /// surface under the candidate's own name.
    pub async fn resolve_pinned(
        &self,
        requests: &[DependencyRequest],
    ) -> (Vec<ResolvedDependency>, LockfileInfo, Vec<String>) {
        let mut resolved: Vec<ResolvedDependency> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        // Dedupe by name, first requested range wins.
        let mut remaining: Vec<DependencyRequest> = Vec::new();
        for request in requests {
            if remaining.iter().any(|r| r.name == request.name) {
                continue;
            }
            remaining.push(request.clone());
        }

        // 1. Curated table.
        remaining.retain(|request| match curated::lookup(&request.name) {
            Some(version) => {
                resolved.push(ResolvedDependency::pinned(
                    &request.name,
                    version,
                    DependencySource::Curated,
                    CONFIDENCE_CURATED,
                ));
                false
            }
            None => true,
        });

        // 2. Shared cache — answers repeats without touching npm or the
        // registry.
        let mut uncached: Vec<DependencyRequest> = Vec::new();
        for request in remaining {
            match self.cache.get(&request.name).await {
                Some(entry) => resolved.push(ResolvedDependency::pinned(
                    &request.name,
                    entry.version,
                    DependencySource::Cache,
                    CONFIDENCE_CACHE,
                )),
                None => uncached.push(request),
            }
        }

        // 3. Lockfile-style deterministic resolution for everything left.
        let mut lockfile_info = LockfileInfo::none();
        let mut remaining = uncached;
        if self.lockfile_enabled && !remaining.is_empty() {
            let outcome = lockfile::resolve(&remaining, self.lockfile_timeout).await;
            warnings.extend(outcome.warnings);
            if !outcome.pinned.is_empty() {
                lockfile_info = LockfileInfo::package_lock();
            }
            let mut unpinned = Vec::new();
            for request in remaining {
                match outcome.pinned.get(&request.name) {
                    Some(version) => {
                        self.cache.put(&request.name, version).await;
                        resolved.push(ResolvedDependency::pinned(
                            &request.name,
                            version,
                            DependencySource::Registry,
                            CONFIDENCE_REGISTRY,
                        ));
                    }
                    None => unpinned.push(request),
                }
            }
            remaining = unpinned;
        }

        // 4/5. Registry latest-tag with search fallback — independent per
        // package, resolved concurrently.
        if !remaining.is_empty() {
            if lockfile_info == LockfileInfo::none() {
                lockfile_info = LockfileInfo::registry_fallback();
            }
            let lookups = remaining
                .iter()
                .map(|request| self.resolve_via_registry(request));
            for (entries, mut lookup_warnings) in join_all(lookups).await {
                resolved.extend(entries);
                warnings.append(&mut lookup_warnings);
            }
        }

        (resolved, lockfile_info, warnings)
    }

    /// Registry ladder for one package: cached pin → latest tag → search.
    async fn resolve_via_registry(
        &self,
        request: &DependencyRequest,
    ) -> (Vec<ResolvedDependency>, Vec<String>) {
        let mut warnings = Vec::new();

        match self.registry.latest_version(&request.name).await {
            LookupOutcome::Found(version) => {
                self.cache.put(&request.name, &version).await;
                (
                    vec![ResolvedDependency::pinned(
                        &request.name,
                        version,
                        DependencySource::Registry,
                        CONFIDENCE_REGISTRY,
                    )],
                    warnings,
                )
            }
            LookupOutcome::NotFound => {
                let candidates = self.registry.search(&request.name, SEARCH_SIZE).await;
                let mut entries = Vec::new();

                if let Some(top) = candidates.first() {
                    warnings.push(format!(
                        "{} not found in registry; suggested candidates returned",
                        request.name
                    ));
                    // Tentative pin under the candidate's own name, never
                    // the original query.
                    if let Some(version) = top.version.clone() {
                        self.cache.put(&top.name, &version).await;
                        entries.push(ResolvedDependency::pinned(
                            &top.name,
                            version,
                            DependencySource::SearchFallback,
                            CONFIDENCE_SEARCH,
                        ));
                    }
                } else {
                    warnings.push(format!("registry returned 404 for {}", request.name));
                }

                entries.push(ResolvedDependency::unresolved(&request.name, candidates));
                (entries, warnings)
            }
            LookupOutcome::Unavailable(reason) => {
                warnings.push(reason);
                (
                    vec![ResolvedDependency::unresolved(&request.name, Vec::new())],
                    warnings,
                )
            }
        }
    }

    // ─── apply_to_manifest ───────────────────────────────────────────────────

    /// Locate the dependency manifest in `files`, resolve its requested
    /// ranges, and rewrite its dependency sections with exact pins.
    ///
    /// No manifest in the set is a no-op returning empty metadata, not an
    /// error. Sections rewrite to: the pin when one was found, else the
    /// original non-empty range, else the literal `*`.
    pub async fn apply_to_manifest(&self, files: &mut [FileRecord]) -> DependencyMeta {
        let Some(index) = files
            .iter()
            .rposition(|f| normalize_path(&f.path).is_some_and(|p| is_manifest_path(&p)))
        else {
            return DependencyMeta::default();
        };

        let mut manifest: Value = match serde_json::from_str(&files[index].content) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) | Err(_) => {
                return DependencyMeta {
                    warnings: vec![format!(
                        "failed to parse {}: not a JSON object",
                        files[index].path
                    )],
                    ..DependencyMeta::default()
                };
            }
        };

        let requests = collect_requests(&manifest);
        debug!(count = requests.len(), "collected dependency requests");

        let (resolved, lockfile_info, warnings) = self.resolve_pinned(&requests).await;

        let pinned: BTreeMap<String, String> = resolved
            .iter()
            .filter_map(|entry| {
                entry
                    .version
                    .clone()
                    .map(|version| (entry.name.clone(), version))
            })
            .collect();

        rewrite_sections(&mut manifest, &pinned);

        let mut meta = DependencyMeta {
            resolved,
            pinned,
            warnings,
            lockfile: lockfile_info,
        };

        match serde_json::to_string_pretty(&manifest) {
            Ok(content) => files[index].content = content,
            Err(e) => meta
                .warnings
                .push(format!("failed to serialize updated manifest: {e}")),
        }

        meta
    }
}

/// Collect dependency requests across all manifest sections. A bare
/// `name@version` key (not a scoped name) splits into name + range; scoped
/// names are preserved atomically.
pub fn collect_requests(manifest: &Value) -> Vec<DependencyRequest> {
    let mut requests: Vec<DependencyRequest> = Vec::new();
    for section in DEPENDENCY_SECTIONS {
        let Some(entries) = manifest.get(section).and_then(Value::as_object) else {
            continue;
        };
        for (name, range) in entries {
            let range = range.as_str().unwrap_or("").to_string();
            let (name, range) = split_inline_version(name, range);
            if requests.iter().any(|r| r.name == name) {
                continue;
            }
            requests.push(DependencyRequest::new(name, range));
        }
    }
    requests
}

fn split_inline_version(name: &str, range: String) -> (String, String) {
    if name.starts_with('@') || name.starts_with("http") {
        return (name.to_string(), range);
    }
    let parts: Vec<&str> = name.split('@').collect();
    if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        return (parts[0].to_string(), parts[1].to_string());
    }
    (name.to_string(), range)
}

fn rewrite_sections(manifest: &mut Value, pinned: &BTreeMap<String, String>) {
    for section in DEPENDENCY_SECTIONS {
        let Some(entries) = manifest.get_mut(section).and_then(Value::as_object_mut) else {
            continue;
        };
        let keys: Vec<String> = entries.keys().cloned().collect();
        for key in keys {
            let (name, _) = split_inline_version(&key, String::new());
            let replacement = match pinned.get(&name) {
                Some(version) => version.clone(),
                None => match entries.get(&key).and_then(Value::as_str) {
                    Some(original) if !original.trim().is_empty() => original.to_string(),
                    _ => "*".to_string(),
                },
            };
            entries.insert(key, Value::String(replacement));
        }
    }
}
