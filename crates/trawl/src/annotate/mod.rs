//! Annotation of scanned items: results, probes, extractors and handlers.

pub mod extract;
pub mod handlers;
pub mod probes;
pub mod result;

pub use extract::ContentExtractor;
pub use handlers::{
    ContentExtractHandler, Extractors, FilePropsHandler, PathTagsHandler, RuleAnnotator,
};
pub use probes::{digest_file, DigestPolicy, OsOwnerResolver, OwnerResolver};
pub use result::{
    AnnotationResult, ContentDigest, ContentExtract, Description, FileError, FileProps, PathTags,
};

use crate::scanner::WorkItem;

/// Turns one work item into its annotation results.
///
/// Called concurrently from every scan worker.
pub trait Annotate: Send + Sync {
    fn annotate(&self, item: &WorkItem) -> Vec<AnnotationResult>;
}
