//! Third-party dependency resolution and version pinning.
//!
//! Requests collected from a manifest resolve through a ladder — curated
//! table, shared version cache, lockfile-style deterministic resolution,
//! live registry, fuzzy search fallback — and every requested name yields
//! exactly one [`ResolvedDependency`] carrying its winning source and a
//! confidence score.

pub mod cache;
pub mod curated;
pub mod lockfile;
pub mod registry;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Requests ────────────────────────────────────────────────────────────────

/// One dependency as requested by a manifest section. `requested_range` is
/// empty when the manifest carried no range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRequest {
    pub name: String,
    #[serde(default)]
    pub requested_range: String,
}

impl DependencyRequest {
    pub fn new(name: impl Into<String>, requested_range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requested_range: requested_range.into(),
        }
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Where a pin came from. Lockfile-derived pins report `Registry` — both
/// npm-backed paths collapse to the same label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencySource {
    Curated,
    Cache,
    Registry,
    SearchFallback,
    None,
}

/// A ranked candidate from the registry search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Outcome for one package. Unresolved entries carry confidence 0 and, when
/// the search endpoint produced anything, a non-empty candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: Option<String>,
    pub source: DependencySource,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
}

impl ResolvedDependency {
    pub fn pinned(
        name: impl Into<String>,
        version: impl Into<String>,
        source: DependencySource,
        confidence: f64,
    ) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            source,
            confidence,
            candidates: Vec::new(),
        }
    }

    pub fn unresolved(name: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Self {
            name: name.into(),
            version: None,
            source: DependencySource::None,
            confidence: 0.0,
            candidates,
        }
    }
}

// ─── Meta ────────────────────────────────────────────────────────────────────

/// Lockfile provenance for a resolution round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockfileInfo {
    #[serde(rename = "type")]
    pub kind: String,
}

impl LockfileInfo {
    pub fn package_lock() -> Self {
        Self { kind: "package-lock".to_string() }
    }
    pub fn registry_fallback() -> Self {
        Self { kind: "registry-fallback".to_string() }
    }
    pub fn none() -> Self {
        Self { kind: "none".to_string() }
    }
}

impl Default for LockfileInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// Full dependency metadata attached to a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyMeta {
    pub resolved: Vec<ResolvedDependency>,
    pub pinned: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub lockfile: LockfileInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_serializes_kebab_case() {
        let entry = ResolvedDependency::pinned("left-pad", "1.3.0", DependencySource::SearchFallback, 0.3);
        let json = serde_json::to_value(&entry).expect("serializable");
        assert_eq!(json["source"], "search-fallback");
        // empty candidate list is omitted from the wire shape
        assert!(json.get("candidates").is_none());
    }

    #[test]
    fn unresolved_carries_zero_confidence() {
        let entry = ResolvedDependency::unresolved("no-such-pkg", Vec::new());
        assert_eq!(entry.confidence, 0.0);
        assert_eq!(entry.source, DependencySource::None);
        assert!(entry.version.is_none());
    }
}
