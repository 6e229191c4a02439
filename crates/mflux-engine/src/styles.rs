use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mflux_contracts::plan::StyleLookup;
use mflux_contracts::runs::documents::{read_document, write_document};
use mflux_contracts::{CommanderError, CommanderResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleEntry {
    pub name: String,
    /// Appended to prompts as `"{prompt}, {description}"`.
    pub description: String,
}

/// Named prompt suffixes, one `<name>.json` per style.
#[derive(Debug, Clone)]
pub struct StyleRegistry {
    dir: PathBuf,
}

impl StyleRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, name: &str, description: &str) -> Result<StyleEntry> {
        let name = validate_name(name)?;
        let description = description.trim();
        if description.is_empty() {
            return Err(CommanderError::validation("style description", "must not be empty").into());
        }
        let entry = StyleEntry {
            name: name.to_string(),
            description: description.to_string(),
        };
        write_document(&self.path_for(name), &entry)
            .with_context(|| format!("failed to save style '{name}'"))?;
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Result<Option<StyleEntry>> {
        let name = validate_name(name)?;
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        read_document(&path).map(Some)
    }

    /// Every readable style, sorted by name.
    pub fn list(&self) -> Vec<StyleEntry> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut styles = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| match read_document::<StyleEntry>(&path) {
                Ok(style) => Some(style),
                Err(err) => {
                    tracing::warn!(path = %path.display(), "skipping style: {err:#}");
                    None
                }
            })
            .collect::<Vec<StyleEntry>>();
        styles.sort_by(|a, b| a.name.cmp(&b.name));
        styles
    }

    /// Returns false when no such style existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let name = validate_name(name)?;
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to delete {}", path.display()))?;
        Ok(true)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl StyleLookup for StyleRegistry {
    fn style_suffix(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Ok(style) => style.map(|entry| entry.description),
            Err(err) => {
                tracing::warn!("style '{name}' unreadable: {err:#}");
                None
            }
        }
    }
}

fn validate_name(raw: &str) -> CommanderResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CommanderError::validation("style name", "must not be empty"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(CommanderError::validation(
            "style name",
            format!("'{name}' may only contain letters, digits, '-' and '_'"),
        ));
    }
    Ok(name)
}
