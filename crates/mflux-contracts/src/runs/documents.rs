use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Writes `payload` as pretty JSON, replacing any previous document whole.
///
/// The bytes land in a sibling temp file first and are renamed into place,
/// so readers never observe a half-written document.
pub fn write_document<T: Serialize>(path: &Path, payload: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let encoded = serde_json::to_string_pretty(payload)?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("document.json");
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp_path, encoded)
        .with_context(|| format!("failed writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

pub fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let parsed = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON document {}", path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{read_document, write_document};

    #[test]
    fn write_replaces_whole_document_without_leftovers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("doc.json");
        write_document(&path, &json!({"a": 1, "b": [1, 2, 3]}))?;
        write_document(&path, &json!({"a": 2}))?;

        let parsed: Value = read_document(&path)?;
        assert_eq!(parsed, json!({"a": 2}));
        let names: Vec<String> = std::fs::read_dir(path.parent().unwrap_or(temp.path()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
        Ok(())
    }

    #[test]
    fn read_reports_invalid_json() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{\"a\":")?;
        let err = read_document::<Value>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid JSON document"));
        Ok(())
    }
}
