//! Best-effort JSON debug dumps.
//!
//! When a debug log directory is configured, incoming requests and raw
//! model output land there as timestamped JSON files. Strictly advisory:
//! every failure is swallowed with a warning and never affects a request.

use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Write `payload` as `{unix_ts}_{tag}.json` under `dir`, if configured.
pub fn write(dir: Option<&Path>, tag: &str, payload: &Value) {
    let Some(dir) = dir else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(tag, error = %e, "could not create debug log dir");
        return;
    }
    let name = format!("{}_{tag}.json", chrono::Utc::now().timestamp_millis());
    let path = dir.join(name);
    let text = match serde_json::to_string_pretty(payload) {
        Ok(text) => text,
        Err(e) => {
            warn!(tag, error = %e, "could not serialize debug payload");
            return;
        }
    };
    if let Err(e) = std::fs::write(&path, text) {
        warn!(tag, path = %path.display(), error = %e, "could not write debug log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_into_configured_dir() {
        let scratch = tempfile::tempdir().expect("tmp dir");
        write(Some(scratch.path()), "generate_incoming", &json!({"a": 1}));
        let entries: Vec<_> = std::fs::read_dir(scratch.path())
            .expect("readable")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_string_lossy().to_string();
        assert!(name.ends_with("_generate_incoming.json"));
    }

    #[test]
    fn unconfigured_dir_is_a_noop() {
        write(None, "anything", &json!({}));
    }
}
