//! JSON document persistence shared by the config store and usage ledger.

use crate::error::SlidesError;
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;

fn storage_err(path: &Path, detail: impl ToString) -> SlidesError {
    SlidesError::Storage {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
}

/// Serialise `value` and replace `path` atomically (temp file in the same
/// directory, then rename), so readers never observe a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SlidesError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| storage_err(dir, e))?;

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| storage_err(path, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| storage_err(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| storage_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| storage_err(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| storage_err(path, e.error))?;
    Ok(())
}

/// Read a JSON document, `Ok(None)` when the file does not exist yet.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SlidesError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(storage_err(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| storage_err(path, format!("invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u32);

        write_json_atomic(&path, &doc).unwrap();
        let back: Option<BTreeMap<String, u32>> = read_json(&path).unwrap();
        assert_eq!(back, Some(doc));
    }

    #[test]
    fn missing_file_is_none_and_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let missing: Option<Vec<u32>> = read_json(&path).unwrap();
        assert!(missing.is_none());

        std::fs::write(&path, b"{not json").unwrap();
        let err = read_json::<Vec<u32>>(&path).unwrap_err();
        assert!(matches!(err, SlidesError::Storage { .. }));
    }
}
