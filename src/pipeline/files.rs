//! File-set reconciliation: path normalization and safety, last-writer-wins
//! merge, binary-asset guard, overlay delta computation.

use std::collections::{BTreeMap, HashSet};

use crate::pipeline::FileRecord;

/// The single file that declares package dependencies.
pub const MANIFEST_FILE: &str = "package.json";

/// Extensions the pipeline refuses to carry as text. The transport is
/// UTF-8 JSON; a model emitting one of these produced garbage.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif",
];

// ─── Path handling ───────────────────────────────────────────────────────────

/// Normalize a model- or caller-supplied path to a safe relative form.
///
/// Returns `None` for anything that must not land in a result set: empty
/// paths, absolute paths, drive-letter paths, and any path containing a
/// `..` traversal component. Separators normalize to `/`, and `.`
/// components collapse away.
pub fn normalize_path(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace('\\', "/");
    if cleaned.is_empty() || cleaned.starts_with('/') {
        return None;
    }
    // Windows drive or URL-ish prefix.
    if cleaned.contains(':') {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in cleaned.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// True when the path names the dependency manifest (at any depth).
pub fn is_manifest_path(path: &str) -> bool {
    path == MANIFEST_FILE || path.ends_with(&format!("/{MANIFEST_FILE}"))
}

/// True when the extension marks a known binary/image asset.
pub fn is_binary_path(path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or("");
    path.contains('.') && BINARY_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(ext))
}

// ─── Merge ───────────────────────────────────────────────────────────────────

/// Merge `incoming` into `files` with last-writer-wins semantics per
/// normalized path. Unsafe or empty paths are dropped silently; binary
/// paths are dropped with a warning.
pub fn merge_into(
    files: &mut Vec<FileRecord>,
    incoming: impl IntoIterator<Item = FileRecord>,
    warnings: &mut Vec<String>,
) {
    for record in incoming {
        let Some(path) = normalize_path(&record.path) else {
            continue;
        };
        if is_binary_path(&path) {
            warnings.push(format!(
                "dropped binary asset returned as text: {path}"
            ));
            continue;
        }
        upsert(files, FileRecord::new(path, record.content));
    }
}

/// Replace an existing record at the same path or append.
pub fn upsert(files: &mut Vec<FileRecord>, record: FileRecord) {
    match files.iter_mut().find(|f| f.path == record.path) {
        Some(existing) => existing.content = record.content,
        None => files.push(record),
    }
}

// ─── Overlay delta ───────────────────────────────────────────────────────────

/// Index a base file set by normalized path. Paths listed in `assets` are
/// recorded as present-but-contentless — their bytes never travel through
/// the pipeline, but their presence matters for delta computation.
pub fn base_index(
    base_files: &[FileRecord],
    assets: &[String],
) -> BTreeMap<String, String> {
    let asset_set: HashSet<String> = assets
        .iter()
        .filter_map(|a| normalize_path(a))
        .collect();

    let mut index = BTreeMap::new();
    for record in base_files {
        let Some(path) = normalize_path(&record.path) else {
            continue;
        };
        if asset_set.contains(&path) {
            index.insert(path, String::new());
        } else {
            index.insert(path, record.content.clone());
        }
    }
    // Assets may be listed without a matching base record.
    for asset in asset_set {
        index.entry(asset).or_default();
    }
    index
}

/// Compute the overlay delta: candidates that are new (path absent from the
/// base) or changed (any byte difference). Identical files are dropped, and
/// the manifest is excluded unconditionally — in overlay mode the base
/// project owns it.
pub fn overlay_delta(
    candidates: Vec<FileRecord>,
    base: &BTreeMap<String, String>,
) -> Vec<FileRecord> {
    let mut delta = Vec::new();
    for candidate in candidates {
        if is_manifest_path(&candidate.path) {
            continue;
        }
        match base.get(&candidate.path) {
            Some(existing) if *existing == candidate.content => {}
            _ => upsert(&mut delta, candidate),
        }
    }
    delta
}
