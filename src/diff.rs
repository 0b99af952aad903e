//! Entry-level differences between two revisions of a language file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entries::EntrySet;

/// A key whose value changed between the two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedEntry {
    pub key: String,
    pub old_value: String,
    pub new_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_comment: Option<String>,
}

/// Classification of every key in `keys(before) ∪ keys(after)`.
///
/// Each key lands in exactly one bucket. `unchanged` is only populated when
/// the caller asks for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub added: Vec<String>,
    pub modified: Vec<ModifiedEntry>,
    pub deleted: Vec<String>,
    pub comment_changed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl DiffResult {
    /// Number of keys that differ in any way.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.comment_changed.len()
    }

    /// True when the two revisions carry the same entries.
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// One-line summary such as `+1 ~2 -0 #1`.
    pub fn summary(&self) -> String {
        format!(
            "+{} ~{} -{} #{}",
            self.added.len(),
            self.modified.len(),
            self.deleted.len(),
            self.comment_changed.len()
        )
    }
}

/// Diff of one file, used where several files are compared at once
/// (snapshot diffs, revert previews).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub diff: DiffResult,
}

/// Compare two entry sets of the same file.
///
/// Keys are matched case-insensitively. Output is ordered by folded key;
/// reported casing comes from `after`, or from `before` for deleted keys.
pub fn diff_entry_sets(before: &EntrySet, after: &EntrySet, include_unchanged: bool) -> DiffResult {
    let before_map = before.folded();
    let after_map = after.folded();
    let keys: BTreeSet<&String> = before_map.keys().chain(after_map.keys()).collect();

    let mut result = DiffResult::default();
    for folded in keys {
        match (before_map.get(folded), after_map.get(folded)) {
            (None, Some(new)) => result.added.push(new.key.clone()),
            (Some(old), None) => result.deleted.push(old.key.clone()),
            (Some(old), Some(new)) => {
                if old.value != new.value {
                    result.modified.push(ModifiedEntry {
                        key: new.key.clone(),
                        old_value: old.value.clone(),
                        new_value: new.value.clone(),
                        old_comment: old.comment.clone(),
                        new_comment: new.comment.clone(),
                    });
                } else if old.comment != new.comment {
                    result.comment_changed.push(new.key.clone());
                } else if include_unchanged {
                    result.unchanged.push(new.key.clone());
                }
            }
            (None, None) => unreachable!("key came from one of the two maps"),
        }
    }
    result
}

/// Diff an optional pair, treating a missing side as an empty set.
pub fn diff_optional(
    language_code: &str,
    before: Option<&EntrySet>,
    after: Option<&EntrySet>,
) -> DiffResult {
    let empty = EntrySet::new(language_code);
    diff_entry_sets(before.unwrap_or(&empty), after.unwrap_or(&empty), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::ResourceEntry;
    use rstest::rstest;
    use std::collections::HashSet;

    fn set(entries: &[(&str, &str, Option<&str>)]) -> EntrySet {
        EntrySet::from_entries(
            "en",
            entries.iter().map(|(k, v, c)| ResourceEntry {
                key: k.to_string(),
                value: v.to_string(),
                comment: c.map(str::to_string),
            }),
        )
    }

    fn all_keys(result: &DiffResult) -> Vec<String> {
        let mut keys: Vec<String> = result
            .added
            .iter()
            .chain(result.deleted.iter())
            .chain(result.comment_changed.iter())
            .chain(result.unchanged.iter())
            .cloned()
            .chain(result.modified.iter().map(|m| m.key.clone()))
            .map(|k| k.to_lowercase())
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_save_cancel_scenario() {
        let a = set(&[("Save", "Save", None)]);
        let b = set(&[("Save", "Save All", None), ("Cancel", "Cancel", None)]);

        let result = diff_entry_sets(&a, &b, false);

        assert_eq!(result.added, vec!["Cancel".to_string()]);
        assert_eq!(
            result.modified,
            vec![ModifiedEntry {
                key: "Save".into(),
                old_value: "Save".into(),
                new_value: "Save All".into(),
                old_comment: None,
                new_comment: None,
            }]
        );
        assert!(result.deleted.is_empty());
        assert!(result.comment_changed.is_empty());
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_comment_only_change() {
        let a = set(&[("Title", "Home", Some("page title"))]);
        let b = set(&[("Title", "Home", Some("window title"))]);

        let result = diff_entry_sets(&a, &b, true);
        assert_eq!(result.comment_changed, vec!["Title".to_string()]);
        assert!(result.modified.is_empty());
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_value_change_wins_over_comment_change() {
        let a = set(&[("Title", "Home", Some("a"))]);
        let b = set(&[("Title", "Start", Some("b"))]);

        let result = diff_entry_sets(&a, &b, false);
        assert_eq!(result.modified.len(), 1);
        assert_eq!(result.modified[0].old_comment.as_deref(), Some("a"));
        assert_eq!(result.modified[0].new_comment.as_deref(), Some("b"));
        assert!(result.comment_changed.is_empty());
    }

    #[test]
    fn test_case_insensitive_matching_reports_after_casing() {
        let a = set(&[("save", "Save", None), ("Gone", "x", None)]);
        let b = set(&[("SAVE", "Save", None)]);

        let result = diff_entry_sets(&a, &b, true);
        assert_eq!(result.unchanged, vec!["SAVE".to_string()]);
        assert_eq!(result.deleted, vec!["Gone".to_string()]);
        assert!(result.added.is_empty());
    }

    #[test]
    fn test_output_is_lexicographic() {
        let a = EntrySet::new("en");
        let b = set(&[("zeta", "z", None), ("Alpha", "a", None), ("mid", "m", None)]);

        let result = diff_entry_sets(&a, &b, false);
        assert_eq!(result.added, vec!["Alpha", "mid", "zeta"]);
    }

    #[rstest]
    #[case(&[], &[])]
    #[case(&[("a", "1", None)], &[])]
    #[case(&[], &[("a", "1", None)])]
    #[case(&[("a", "1", None), ("b", "2", None)], &[("b", "3", None), ("c", "4", None)])]
    #[case(&[("a", "1", Some("x")), ("B", "2", None)], &[("A", "1", Some("y")), ("b", "2", None)])]
    fn test_partition_and_symmetry(
        #[case] left: &[(&str, &str, Option<&str>)],
        #[case] right: &[(&str, &str, Option<&str>)],
    ) {
        let a = set(left);
        let b = set(right);

        let forward = diff_entry_sets(&a, &b, true);
        let backward = diff_entry_sets(&b, &a, true);

        // Every key appears exactly once
        let keys = all_keys(&forward);
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());

        let mut expected: Vec<String> = a
            .iter()
            .chain(b.iter())
            .map(|e| e.key.to_lowercase())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        expected.sort();
        assert_eq!(keys, expected);

        // Added and deleted swap when the arguments swap
        let lower = |v: &[String]| v.iter().map(|k| k.to_lowercase()).collect::<Vec<_>>();
        assert_eq!(lower(&forward.added), lower(&backward.deleted));
        assert_eq!(lower(&forward.deleted), lower(&backward.added));
        assert_eq!(forward.modified.len(), backward.modified.len());
    }

    #[test]
    fn test_summary_and_counts() {
        let a = set(&[("a", "1", None), ("b", "2", None)]);
        let b = set(&[("a", "1", Some("note")), ("c", "3", None)]);

        let result = diff_entry_sets(&a, &b, false);
        assert_eq!(result.change_count(), 3);
        assert_eq!(result.summary(), "+1 ~0 -1 #1");
        assert!(!result.is_empty());
    }
}
