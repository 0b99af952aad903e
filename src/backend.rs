use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::entries::{EntrySet, ResourceEntry};

/// Format-agnostic access to language files.
///
/// Implementations must round-trip: writing a set that was just read and
/// reading it back yields an equal set.
pub trait ResourceBackend: Send + Sync {
    fn read_entry_set(&self, path: &Path) -> Result<EntrySet>;

    fn write_entry_set(&self, set: &EntrySet, path: &Path) -> Result<()>;
}

/// Flat JSON object backend.
///
/// Values are either plain strings or `{ "value": "...", "comment": "..." }`.
/// The language code is the last dot-separated segment of the file stem, so
/// `messages.fr.json` is French and `de.json` is German.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBackend;

impl JsonBackend {
    pub fn language_from_path(path: &Path) -> String {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| stem.rsplit('.').next().unwrap_or(stem).to_string())
            .unwrap_or_else(|| "und".to_string())
    }
}

impl ResourceBackend for JsonBackend {
    fn read_entry_set(&self, path: &Path) -> Result<EntrySet> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read resource file: {}", path.display()))?;
        let root: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse resource file: {}", path.display()))?;
        let object = root
            .as_object()
            .ok_or_else(|| anyhow!("Resource file {} is not a JSON object", path.display()))?;

        let mut set = EntrySet::new(Self::language_from_path(path));
        for (key, value) in object {
            let entry = match value {
                Value::String(text) => ResourceEntry::new(key.clone(), text.clone()),
                Value::Object(fields) => ResourceEntry {
                    key: key.clone(),
                    value: fields
                        .get("value")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            anyhow!("Entry '{}' in {} has no string value", key, path.display())
                        })?
                        .to_string(),
                    comment: fields
                        .get("comment")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
                other => {
                    return Err(anyhow!(
                        "Entry '{}' in {} has unsupported value {}",
                        key,
                        path.display(),
                        other
                    ))
                }
            };
            set.insert(entry);
        }

        Ok(set)
    }

    fn write_entry_set(&self, set: &EntrySet, path: &Path) -> Result<()> {
        let mut object = Map::new();
        for entry in set.iter() {
            let value = match &entry.comment {
                None => Value::String(entry.value.clone()),
                Some(comment) => serde_json::json!({
                    "value": entry.value,
                    "comment": comment,
                }),
            };
            object.insert(entry.key.clone(), value);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut json = serde_json::to_string_pretty(&Value::Object(object))
            .context("Failed to serialize resource file")?;
        json.push('\n');
        fs::write(path, json)
            .with_context(|| format!("Failed to write resource file: {}", path.display()))?;

        Ok(())
    }
}
