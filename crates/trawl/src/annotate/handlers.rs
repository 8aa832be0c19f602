//! Rule handlers and the per-item annotator.

use super::extract::ContentExtractor;
use super::probes::{DigestPolicy, OwnerResolver};
use super::result::{AnnotationResult, ContentExtract, FileError, FileProps, PathTags};
use super::Annotate;
use crate::rules::{PathTagRule, RuleKind, RuleMatch, RuleSet};
use crate::scanner::WorkItem;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Content extractors keyed by the rule they serve.
pub type Extractors = HashMap<i64, ContentExtractor>;

/// Produces stat, owner and digest properties.
pub struct FilePropsHandler {
    owner: Arc<dyn OwnerResolver>,
    digest: DigestPolicy,
}

impl FilePropsHandler {
    pub fn new(owner: Arc<dyn OwnerResolver>, digest: DigestPolicy) -> Self {
        Self { owner, digest }
    }

    /// Probe failures are attached to the result; this never fails.
    pub fn generate(&self, rule_id: i64, item: &WorkItem) -> FileProps {
        let mut errors = Vec::new();

        let owner = match self.owner.resolve_owner(&item.physical) {
            Ok(owner) => Some(owner),
            Err(e) => {
                errors.push(FileError::new(e.to_string()));
                None
            }
        };

        let digest = if item.meta.is_dir {
            None
        } else {
            match self.digest.digest(&item.physical) {
                Ok(digest) => digest,
                Err(e) => {
                    errors.push(FileError::new(e.to_string()));
                    None
                }
            }
        };

        FileProps {
            path: item.logical.clone(),
            mount_path: item.physical.display().to_string(),
            rule_id,
            size: item.meta.size,
            mode: item.meta.mode,
            modified: item.meta.modified,
            is_dir: item.meta.is_dir,
            owner,
            digest,
            queued_at: item.queued_at,
            processed_at: Utc::now(),
            errors,
        }
    }
}

/// Turns a path-tag rule match into tags.
pub struct PathTagsHandler;

impl PathTagsHandler {
    /// Match `logical` against the rule's own template.
    pub fn generate(rule: &PathTagRule, logical: &str) -> PathTags {
        let result = rule.compiled.match_path(logical);
        Self::from_match(rule, &result, logical)
    }

    /// Captures on a full match, empty values otherwise.
    pub fn from_match(rule: &PathTagRule, result: &RuleMatch, logical: &str) -> PathTags {
        let values = if result.full {
            result.captures(&rule.compiled)
        } else {
            BTreeMap::new()
        };
        PathTags {
            path: logical.to_string(),
            rule_id: rule.rule.id,
            values,
        }
    }
}

/// Runs one extractor against one item.
pub struct ContentExtractHandler;

impl ContentExtractHandler {
    /// `None` when the extractor does not want this item.
    pub fn generate(extractor: &ContentExtractor, item: &WorkItem) -> Option<ContentExtract> {
        if item.meta.is_dir || !extractor.accepts(&item.physical) {
            return None;
        }
        let (values, error) = match extractor.extract(&item.physical) {
            Ok(values) => (values, None),
            Err(e) => {
                warn!(path = %item.logical, error = %e, "Content extraction failed");
                (BTreeMap::new(), Some(e.to_string()))
            }
        };
        Some(ContentExtract {
            path: item.logical.clone(),
            rule_id: extractor.rule_id(),
            values,
            error,
        })
    }
}

/// Applies a rule set to each work item.
pub struct RuleAnnotator {
    rules: RuleSet,
    file_props: FilePropsHandler,
    extractors: Arc<Extractors>,
}

impl RuleAnnotator {
    pub fn new(rules: RuleSet, file_props: FilePropsHandler, extractors: Arc<Extractors>) -> Self {
        for rule in rules.of_kind(RuleKind::ContentExtract) {
            if !extractors.contains_key(&rule.id) {
                warn!(rule_id = rule.id, "Extract rule has no configured extractor");
            }
        }
        Self {
            rules,
            file_props,
            extractors,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

impl Annotate for RuleAnnotator {
    fn annotate(&self, item: &WorkItem) -> Vec<AnnotationResult> {
        let mut results: Vec<AnnotationResult> = self
            .rules
            .of_kind(RuleKind::FileProps)
            .map(|rule| AnnotationResult::FileProps(self.file_props.generate(rule.id, item)))
            .collect();

        if let Some(selection) = self.rules.select_path_tags(&item.logical) {
            if selection.rule.rule.ignore {
                if selection.result.full {
                    debug!(path = %item.logical, rule_id = selection.rule.rule.id, "Ignored by rule");
                    return results;
                }
            } else {
                results.push(AnnotationResult::PathTags(PathTagsHandler::from_match(
                    selection.rule,
                    &selection.result,
                    &item.logical,
                )));
            }
        }

        for rule in self.rules.of_kind(RuleKind::ContentExtract) {
            let Some(extractor) = self.extractors.get(&rule.id) else {
                continue;
            };
            if let Some(extract) = ContentExtractHandler::generate(extractor, item) {
                results.push(AnnotationResult::ContentExtract(extract));
            }
        }

        results
    }
}
