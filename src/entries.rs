use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A single translation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ResourceEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Two keys that differ only by case inside one language file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseCollision {
    /// Casing that was seen first and kept
    pub kept: String,
    /// Casing that was rejected
    pub rejected: String,
}

/// All entries of one language file at a point in time.
///
/// Keys are unique case-insensitively. The map is indexed by the folded
/// (lowercase) key so iteration is lexicographic and deterministic, while each
/// entry keeps the casing it was first seen with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntrySet {
    pub language_code: String,
    entries: BTreeMap<String, ResourceEntry>,
    collisions: Vec<CaseCollision>,
}

/// Wire/storage shape of an entry set; also the canonical hash input.
#[derive(Serialize, Deserialize)]
struct CanonicalEntrySet {
    language_code: String,
    entries: Vec<ResourceEntry>,
}

pub(crate) fn fold_key(key: &str) -> String {
    key.to_lowercase()
}

impl EntrySet {
    pub fn new(language_code: impl Into<String>) -> Self {
        Self {
            language_code: language_code.into(),
            ..Default::default()
        }
    }

    /// Build a set, keeping the first entry of every case-variant group.
    pub fn from_entries<I>(language_code: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = ResourceEntry>,
    {
        let mut set = Self::new(language_code);
        for entry in entries {
            set.insert(entry);
        }
        set
    }

    /// Insert a new entry. A key that collides case-insensitively with an
    /// existing one is recorded as a collision and dropped.
    ///
    /// Returns `true` if the entry was stored.
    pub fn insert(&mut self, entry: ResourceEntry) -> bool {
        let folded = fold_key(&entry.key);
        match self.entries.get(&folded) {
            Some(existing) if existing.key != entry.key => {
                self.collisions.push(CaseCollision {
                    kept: existing.key.clone(),
                    rejected: entry.key,
                });
                false
            }
            _ => {
                self.entries.insert(folded, entry);
                true
            }
        }
    }

    /// Insert or replace an entry, keeping the live casing when the key
    /// already exists under a different case.
    pub fn upsert(&mut self, mut entry: ResourceEntry) {
        let folded = fold_key(&entry.key);
        if let Some(existing) = self.entries.get(&folded) {
            entry.key = existing.key.clone();
        }
        self.entries.insert(folded, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<ResourceEntry> {
        self.entries.remove(&fold_key(key))
    }

    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&ResourceEntry> {
        self.entries.get(&fold_key(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in folded-key order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.values()
    }

    pub(crate) fn folded(&self) -> &BTreeMap<String, ResourceEntry> {
        &self.entries
    }

    pub fn collisions(&self) -> &[CaseCollision] {
        &self.collisions
    }

    pub fn has_collisions(&self) -> bool {
        !self.collisions.is_empty()
    }

    /// Fail with `CaseVariantKeys` if any case-variant keys were seen.
    pub fn validate(&self, file: &str) -> Result<(), crate::error::LrmError> {
        if self.collisions.is_empty() {
            return Ok(());
        }
        let keys = self
            .collisions
            .iter()
            .map(|c| format!("{} / {}", c.kept, c.rejected))
            .collect();
        Err(crate::error::LrmError::CaseVariantKeys {
            file: file.to_string(),
            keys,
        })
    }

    /// Compact JSON in folded-key order. This is the stored blob format and
    /// the input to [`ContentHash::of_entry_set`].
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let canonical = CanonicalEntrySet {
            language_code: self.language_code.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        // Serializing plain strings into a Vec cannot fail
        serde_json::to_vec(&canonical).unwrap_or_default()
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let canonical: CanonicalEntrySet =
            serde_json::from_slice(bytes).context("Failed to parse stored entry set")?;
        Ok(Self::from_entries(canonical.language_code, canonical.entries))
    }

    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of_entry_set(self)
    }
}

impl Serialize for EntrySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CanonicalEntrySet {
            language_code: self.language_code.clone(),
            entries: self.entries.values().cloned().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntrySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let canonical = CanonicalEntrySet::deserialize(deserializer)?;
        Ok(Self::from_entries(canonical.language_code, canonical.entries))
    }
}

/// Lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn of_entry_set(set: &EntrySet) -> Self {
        Self::of_bytes(&set.canonical_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for display.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup_keeps_first_casing() {
        let set = EntrySet::from_entries(
            "en",
            vec![
                ResourceEntry::new("SaveButton", "Save"),
                ResourceEntry::new("savebutton", "Save!"),
            ],
        );

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("SAVEBUTTON").unwrap().key, "SaveButton");
        assert_eq!(set.get("savebutton").unwrap().value, "Save");
        assert_eq!(
            set.collisions(),
            &[CaseCollision {
                kept: "SaveButton".into(),
                rejected: "savebutton".into()
            }]
        );
        assert!(set.validate("en.json").is_err());
    }

    #[test]
    fn test_reinserting_same_key_replaces_value() {
        let mut set = EntrySet::new("en");
        set.insert(ResourceEntry::new("Title", "One"));
        set.insert(ResourceEntry::new("Title", "Two"));

        assert_eq!(set.get("title").unwrap().value, "Two");
        assert!(!set.has_collisions());
    }

    #[test]
    fn test_upsert_preserves_live_casing() {
        let mut set = EntrySet::from_entries("en", vec![ResourceEntry::new("OK", "Ok")]);
        set.upsert(ResourceEntry::new("ok", "Okay"));

        let entry = set.get("OK").unwrap();
        assert_eq!(entry.key, "OK");
        assert_eq!(entry.value, "Okay");
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let a = EntrySet::from_entries(
            "fr",
            vec![
                ResourceEntry::new("b", "2"),
                ResourceEntry::new("a", "1").with_comment("first"),
            ],
        );
        let b = EntrySet::from_entries(
            "fr",
            vec![
                ResourceEntry::new("a", "1").with_comment("first"),
                ResourceEntry::new("b", "2"),
            ],
        );

        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().as_str().len(), 64);
    }

    #[test]
    fn test_short_hash_counts_characters() {
        assert_eq!(ContentHash("ééééééééééééé".into()).short(), "éééééééééééé");
        assert_eq!(ContentHash("abc".into()).short(), "abc");
    }

    #[test]
    fn test_hash_covers_language_and_comment() {
        let base = EntrySet::from_entries("fr", vec![ResourceEntry::new("a", "1")]);
        let other_lang = EntrySet::from_entries("de", vec![ResourceEntry::new("a", "1")]);
        let commented =
            EntrySet::from_entries("fr", vec![ResourceEntry::new("a", "1").with_comment("c")]);

        assert_ne!(base.content_hash(), other_lang.content_hash());
        assert_ne!(base.content_hash(), commented.content_hash());
    }

    #[test]
    fn test_canonical_bytes_parse_back() {
        let set = EntrySet::from_entries(
            "es",
            vec![ResourceEntry::new("Hello", "Hola").with_comment("greeting")],
        );
        let parsed = EntrySet::from_canonical_bytes(&set.canonical_bytes()).unwrap();
        assert_eq!(parsed, set);
    }
}
