// SPDX-License-Identifier: MIT
//! Package-registry HTTP client: exact-name latest-tag lookups and the
//! fuzzy search endpoint. Best-effort and time-boxed — a non-200, timeout,
//! or malformed body is an unresolved outcome, never an error that
//! propagates.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::deps::Candidate;

/// Default candidate count for search fallback queries.
pub const SEARCH_SIZE: usize = 5;

/// Outcome of an exact-name lookup. `NotFound` (a 404) drives the search
/// fallback; `Unavailable` covers every other degraded case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(String),
    NotFound,
    Unavailable(String),
}

pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `GET {base}/{name}` → the `latest` dist-tag (or best available
    /// version field) for the package.
    pub async fn latest_version(&self, name: &str) -> LookupOutcome {
        let url = format!("{}/{}", self.base_url, encode_package_name(name));
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return LookupOutcome::Unavailable(format!("registry request failed: {e}")),
        };

        match response.status().as_u16() {
            200 => {}
            404 => return LookupOutcome::NotFound,
            status => {
                return LookupOutcome::Unavailable(format!("registry returned {status} for {name}"))
            }
        }

        let document: Value = match response.json().await {
            Ok(document) => document,
            Err(e) => {
                return LookupOutcome::Unavailable(format!("malformed registry response: {e}"))
            }
        };

        match pick_version(&document) {
            Some(version) => {
                debug!(package = name, version, "registry pin");
                LookupOutcome::Found(version)
            }
            None => LookupOutcome::Unavailable(format!("no version found for {name} in registry response")),
        }
    }

    /// `GET {base}/-/v1/search?text={query}&size={size}` → ranked candidate
    /// packages. Empty on any failure.
    pub async fn search(&self, query: &str, size: usize) -> Vec<Candidate> {
        let url = format!("{}/-/v1/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("text", query), ("size", &size.to_string())])
            .send()
            .await;

        let document: Value = match response {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(document) => document,
                Err(e) => {
                    warn!(query, error = %e, "malformed search response");
                    return Vec::new();
                }
            },
            Ok(response) => {
                warn!(query, status = %response.status(), "search unavailable");
                return Vec::new();
            }
            Err(e) => {
                warn!(query, error = %e, "search request failed");
                return Vec::new();
            }
        };

        document
            .get("objects")
            .and_then(Value::as_array)
            .map(|objects| {
                objects
                    .iter()
                    .filter_map(|entry| {
                        let package = entry.get("package")?;
                        Some(Candidate {
                            name: package.get("name")?.as_str()?.to_string(),
                            version: package
                                .get("version")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            description: package
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Percent-encode a package name for the registry path. Scoped names keep
/// their shape but `@` and `/` are escaped (`@scope/pkg` → `%40scope%2Fpkg`),
/// matching how registries address scoped packages.
pub fn encode_package_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Pick a version from a registry package document: `dist-tags.latest`,
/// then a top-level `version`, then the highest semver among `versions`.
fn pick_version(document: &Value) -> Option<String> {
    if let Some(latest) = document
        .pointer("/dist-tags/latest")
        .and_then(Value::as_str)
    {
        return Some(latest.to_string());
    }
    if let Some(version) = document.get("version").and_then(Value::as_str) {
        return Some(version.to_string());
    }
    document
        .get("versions")
        .and_then(Value::as_object)
        .and_then(|versions| {
            versions
                .keys()
                .filter_map(|key| semver::Version::parse(key).ok())
                .max()
                .map(|version| version.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoped_names_encode_atomically() {
        assert_eq!(encode_package_name("react"), "react");
        assert_eq!(encode_package_name("@storyblok/react"), "%40storyblok%2Freact");
    }

    #[test]
    fn dist_tag_wins_over_versions_map() {
        let document = json!({
            "dist-tags": { "latest": "2.0.0" },
            "versions": { "1.0.0": {}, "3.0.0-beta.1": {} },
        });
        assert_eq!(pick_version(&document).as_deref(), Some("2.0.0"));
    }

    #[test]
    fn versions_map_falls_back_to_highest_semver() {
        let document = json!({
            "versions": { "1.2.0": {}, "1.10.0": {}, "0.9.0": {}, "not-semver": {} },
        });
        // 1.10.0 > 1.2.0 numerically, not lexically
        assert_eq!(pick_version(&document).as_deref(), Some("1.10.0"));
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert_eq!(pick_version(&json!({})), None);
    }
}
