//! Revision diff between the previous stored view and a fresh snapshot.
//!
//! A path is:
//! - `Created` if it is in the snapshot but has no previous record,
//! - `Deleted` if it has a previous record but is missing from the snapshot,
//! - `Modified` if both exist and at least one non-meta property changed.
//!
//! Paths whose results cannot be combined (two results claiming the same
//! property) are skipped for this revision and reported.

use crate::annotate::AnnotationResult;
use crate::error::{Result, TrawlError};
use crate::scanner::ScanSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;
use trawl_ids::RecordId;

/// Combined properties of one path as last stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousRecord {
    pub record_id: RecordId,
    pub path: String,
    pub properties: BTreeMap<String, String>,
}

impl PreviousRecord {
    /// Build the record a set of results would have produced.
    pub fn from_results(
        record_id: RecordId,
        path: impl Into<String>,
        results: &[AnnotationResult],
    ) -> Result<Self> {
        let path = path.into();
        Ok(Self {
            properties: combine(&path, results)?,
            record_id,
            path,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Modified,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One path's change in this revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub path: String,
    pub action: ChangeAction,
    pub previous_record: Option<RecordId>,
    /// Absent for deletions.
    pub results: Option<Vec<AnnotationResult>>,
    /// Significant keys that differ from the previous record (modifications only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_keys: Vec<String>,
}

/// A path left out of this revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Changelist {
    pub entries: Vec<ChangeEntry>,
    pub unchanged: usize,
    pub skipped: Vec<SkippedPath>,
}

impl Changelist {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, action: ChangeAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    pub fn created(&self) -> usize {
        self.count(ChangeAction::Created)
    }

    pub fn modified(&self) -> usize {
        self.count(ChangeAction::Modified)
    }

    pub fn deleted(&self) -> usize {
        self.count(ChangeAction::Deleted)
    }
}

/// Merge every result's stored properties into one map.
///
/// Identity keys are already excluded. A key may repeat only when every
/// result defining it declares it meta; the last value wins. Any other
/// repeat, or a captured value reusing a fixed field name, is a collision.
pub fn combine(path: &str, results: &[AnnotationResult]) -> Result<BTreeMap<String, String>> {
    let collision = |key: &str| TrawlError::Collision {
        path: path.to_string(),
        key: key.to_string(),
    };

    let mut combined: BTreeMap<String, (String, bool)> = BTreeMap::new();
    for result in results {
        if let Some(key) = result.shadowed_key() {
            return Err(collision(key));
        }
        for (key, value) in result.properties() {
            let meta = result.is_meta_key(&key);
            match combined.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert((value, meta));
                }
                Entry::Occupied(mut slot) => {
                    if !(meta && slot.get().1) {
                        return Err(collision(slot.key()));
                    }
                    slot.insert((value, meta));
                }
            }
        }
    }
    Ok(combined
        .into_iter()
        .map(|(key, (value, _))| (key, value))
        .collect())
}

/// Keys present in one map but not the other, or present in both with
/// different values.
pub fn changed_keys(
    current: &BTreeMap<String, String>,
    previous: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut changed: BTreeSet<String> = current
        .iter()
        .filter(|(k, v)| previous.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    changed.extend(
        previous
            .keys()
            .filter(|k| !current.contains_key(*k))
            .cloned(),
    );
    changed
}

/// Changed keys that count as a real change.
///
/// A key is masked when every current result that defines it declares it
/// identity or meta. A key no current result defines any more is masked
/// if some result declares it.
pub fn significant_keys(changed: &BTreeSet<String>, results: &[AnnotationResult]) -> Vec<String> {
    let stored: Vec<BTreeMap<String, String>> = results.iter().map(|r| r.properties()).collect();
    changed
        .iter()
        .filter(|key| {
            let mut definers = results
                .iter()
                .zip(&stored)
                .filter(|(_, props)| props.contains_key(key.as_str()))
                .map(|(result, _)| result)
                .peekable();
            let masked = if definers.peek().is_some() {
                definers.all(|r| r.is_masked_key(key))
            } else {
                results.iter().any(|r| r.is_masked_key(key))
            };
            !masked
        })
        .cloned()
        .collect()
}

pub fn is_significant(changed: &BTreeSet<String>, results: &[AnnotationResult]) -> bool {
    !significant_keys(changed, results).is_empty()
}

/// Compare the previous view against the current snapshot.
///
/// Entries come out deletions first, then creations and modifications in
/// path order.
pub fn diff(previous: &HashMap<String, PreviousRecord>, current: &ScanSnapshot) -> Changelist {
    let mut changelist = Changelist::default();

    let mut deleted: Vec<&PreviousRecord> = previous
        .values()
        .filter(|record| !current.contains(&record.path))
        .collect();
    deleted.sort_by(|a, b| a.path.cmp(&b.path));
    changelist
        .entries
        .extend(deleted.into_iter().map(|record| ChangeEntry {
            path: record.path.clone(),
            action: ChangeAction::Deleted,
            previous_record: Some(record.record_id),
            results: None,
            changed_keys: Vec::new(),
        }));

    for (path, results) in current.iter() {
        let combined = match combine(path, results) {
            Ok(combined) => combined,
            Err(e) => {
                warn!(path = %path, error = %e, "Skipping path with conflicting results");
                changelist.skipped.push(SkippedPath {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let Some(record) = previous.get(path) else {
            changelist.entries.push(ChangeEntry {
                path: path.to_string(),
                action: ChangeAction::Created,
                previous_record: None,
                results: Some(results.to_vec()),
                changed_keys: Vec::new(),
            });
            continue;
        };

        let changed = significant_keys(&changed_keys(&combined, &record.properties), results);
        if changed.is_empty() {
            changelist.unchanged += 1;
        } else {
            changelist.entries.push(ChangeEntry {
                path: path.to_string(),
                action: ChangeAction::Modified,
                previous_record: Some(record.record_id),
                results: Some(results.to_vec()),
                changed_keys: changed,
            });
        }
    }

    changelist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::result::fixtures::{file_props, path_tags};
    use crate::annotate::{ContentExtract, FileProps};

    fn previous_of(entries: &[(i64, &str, Vec<AnnotationResult>)]) -> HashMap<String, PreviousRecord> {
        entries
            .iter()
            .map(|(id, path, results)| {
                let record = PreviousRecord::from_results(RecordId::new(*id), *path, results).unwrap();
                (path.to_string(), record)
            })
            .collect()
    }

    fn snapshot(results: Vec<AnnotationResult>) -> ScanSnapshot {
        results.into_iter().collect()
    }

    fn with_props(result: AnnotationResult, edit: impl FnOnce(&mut FileProps)) -> AnnotationResult {
        let AnnotationResult::FileProps(mut props) = result else {
            unreachable!("fixture is file props")
        };
        edit(&mut props);
        AnnotationResult::FileProps(props)
    }

    #[test]
    fn test_created_modified_deleted() {
        let previous = previous_of(&[
            (1, "a", vec![file_props("a", 10)]),
            (2, "b", vec![file_props("b", 20)]),
        ]);
        let current = snapshot(vec![file_props("b", 21), file_props("c", 30)]);

        let changes = diff(&previous, &current);
        let summary: Vec<(&str, ChangeAction, Option<i64>)> = changes
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.action, e.previous_record.map(|r| r.get())))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", ChangeAction::Deleted, Some(1)),
                ("b", ChangeAction::Modified, Some(2)),
                ("c", ChangeAction::Created, None),
            ]
        );
        assert!(changes.entries[0].results.is_none());
        assert_eq!(changes.entries[1].changed_keys, vec!["size".to_string()]);
    }

    #[test]
    fn test_same_results_produce_no_changes() {
        let results = vec![file_props("a", 10), path_tags("a", &[("year", "2024")])];
        let previous = previous_of(&[(1, "a", results.clone())]);
        let changes = diff(&previous, &snapshot(results));
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, 1);
    }

    #[test]
    fn test_meta_only_change_is_not_significant() {
        let previous = previous_of(&[(1, "a", vec![file_props("a", 10)])]);
        let later = with_props(file_props("a", 10), |p| {
            p.processed_at = chrono::Utc::now();
            p.queued_at = chrono::Utc::now();
        });
        let changes = diff(&previous, &snapshot(vec![later]));
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, 1);
    }

    #[test]
    fn test_identity_change_is_not_significant() {
        let previous = previous_of(&[(1, "a", vec![file_props("a", 10)])]);
        let moved = with_props(file_props("a", 10), |p| {
            p.mount_path = "/elsewhere/a".to_string();
            p.rule_id = 99;
        });
        assert!(diff(&previous, &snapshot(vec![moved])).is_empty());
    }

    #[test]
    fn test_removed_key_counts_as_change() {
        let previous = previous_of(&[(1, "a", vec![path_tags("a", &[("year", "2024"), ("sample", "42")])])]);
        let current = snapshot(vec![path_tags("a", &[("year", "2024")])]);
        let changes = diff(&previous, &current);
        assert_eq!(changes.modified(), 1);
        assert_eq!(changes.entries[0].changed_keys, vec!["sample".to_string()]);
    }

    #[test]
    fn test_collision_skips_path() {
        let previous = previous_of(&[(1, "a", vec![path_tags("a", &[("size", "1")])])]);
        let current = snapshot(vec![file_props("a", 10), path_tags("a", &[("size", "10")])]);
        let changes = diff(&previous, &current);
        assert!(changes.is_empty());
        assert_eq!(changes.skipped.len(), 1);
        assert!(changes.skipped[0].reason.contains("size"));
    }

    #[test]
    fn test_combine_meta_keys_may_repeat() {
        let results = vec![file_props("a", 1), file_props("a", 1)];
        assert!(matches!(
            combine("a", &results),
            Err(TrawlError::Collision { .. })
        ));

        let failed = |rule_id: i64, error: &str| {
            AnnotationResult::ContentExtract(ContentExtract {
                path: "a".to_string(),
                rule_id,
                values: BTreeMap::new(),
                error: Some(error.to_string()),
            })
        };
        let combined = combine("a", &[failed(7, "first"), failed(8, "second")]).unwrap();
        assert_eq!(combined["extract_error"], "second");
    }

    #[test]
    fn test_meta_key_claimed_as_capture_collides_in_either_order() {
        let props = file_props("a", 1);
        let tags = path_tags("a", &[("queued_at", "yesterday")]);
        for results in [vec![props.clone(), tags.clone()], vec![tags, props]] {
            match combine("a", &results) {
                Err(TrawlError::Collision { key, .. }) => assert_eq!(key, "queued_at"),
                other => panic!("expected collision, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_capture_named_after_fixed_field_collides() {
        let current = snapshot(vec![path_tags("a", &[("path", "spoofed"), ("year", "2024")])]);
        let changes = diff(&HashMap::new(), &current);
        assert!(changes.is_empty());
        assert_eq!(changes.skipped.len(), 1);
        assert!(changes.skipped[0].reason.contains("'path'"));
    }

    #[test]
    fn test_capture_of_another_variants_identity_key_is_significant() {
        let results = |mount: &str| vec![file_props("a", 1), path_tags("a", &[("mount_path", mount)])];
        let previous = previous_of(&[(1, "a", results("east"))]);
        let changes = diff(&previous, &snapshot(results("west")));
        assert_eq!(changes.modified(), 1);
        assert_eq!(changes.entries[0].changed_keys, vec!["mount_path".to_string()]);
    }

    #[test]
    fn test_changed_keys_symmetric() {
        let a = BTreeMap::from([("x".to_string(), "1".to_string()), ("y".to_string(), "2".to_string())]);
        let b = BTreeMap::from([("y".to_string(), "3".to_string()), ("z".to_string(), "4".to_string())]);
        let changed: Vec<String> = changed_keys(&a, &b).into_iter().collect();
        assert_eq!(changed, vec!["x", "y", "z"]);
        assert!(changed_keys(&a, &a).is_empty());
    }

    #[test]
    fn test_changed_keys_exclude_meta() {
        let previous = previous_of(&[(1, "a", vec![file_props("a", 10)])]);
        let later = with_props(file_props("a", 11), |p| {
            p.processed_at = chrono::Utc::now();
        });
        let changes = diff(&previous, &snapshot(vec![later]));
        assert_eq!(changes.entries[0].changed_keys, vec!["size".to_string()]);

        let meta_only = BTreeSet::from(["queued_at".to_string(), "path".to_string()]);
        assert!(!is_significant(&meta_only, &[file_props("a", 1)]));
    }

    #[test]
    fn test_collision_on_new_path_is_skipped() {
        let current = snapshot(vec![file_props("n", 1), path_tags("n", &[("owner", "x")])]);
        let changes = diff(&HashMap::new(), &current);
        assert!(changes.is_empty());
        assert_eq!(changes.skipped[0].path, "n");
    }

    #[test]
    fn test_empty_previous_everything_created() {
        let changes = diff(&HashMap::new(), &snapshot(vec![file_props("a", 1), file_props("b", 2)]));
        assert_eq!(changes.created(), 2);
        assert_eq!(changes.deleted(), 0);
    }
}
