// =============================================================================
// Persistence helpers — atomic JSON writes with guaranteed cleanup
// =============================================================================
//
// Every on-disk artifact (engine config, state snapshot, trade journal, signal
// versions, ML dataset, EOD reports) goes through these two functions. Writes
// use the tmp + rename pattern so a crash mid-write never corrupts the
// previous file; the tmp file is removed on any failed exit path.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Serialize `value` to pretty JSON and write it atomically to `path`.
///
/// The parent directory is created if missing. On serialisation or write
/// failure the tmp sibling is cleaned up before the error propagates.
pub fn write_json_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialise {}", path.display()))?;

    let tmp_path = path.with_extension("json.tmp");

    if let Err(e) = std::fs::write(&tmp_path, &content) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e)
            .with_context(|| format!("failed to write tmp file {}", tmp_path.display()));
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("failed to rename into {}", path.display()));
    }

    Ok(())
}

/// Load a JSON file into `T`. Returns an error when the file is missing or
/// malformed so the caller can decide between defaulting and aborting.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Load a JSON file, falling back to `T::default()` when the file is missing
/// or malformed. A malformed file is logged once; a missing file is silent
/// (first run).
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
    let path = path.as_ref();

    if !path.exists() {
        return T::default();
    }

    match read_json(path) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable persisted file — using defaults");
            T::default()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn tmp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("meridian-persist-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn roundtrip() {
        let path = tmp_file("roundtrip");
        let value = Sample { name: "abc".into(), count: 7 };
        write_json_atomic(&path, &value).unwrap();
        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back, value);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let path = tmp_file("tmpclean");
        write_json_atomic(&path, &Sample::default()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn default_on_missing() {
        let path = tmp_file("missing-file-does-not-exist");
        let value: Sample = read_json_or_default(&path);
        assert_eq!(value, Sample::default());
    }

    #[test]
    fn default_on_malformed() {
        let path = tmp_file("malformed");
        std::fs::write(&path, "{not json").unwrap();
        let value: Sample = read_json_or_default(&path);
        assert_eq!(value, Sample::default());
        std::fs::remove_file(&path).unwrap();
    }
}
