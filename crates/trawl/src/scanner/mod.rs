//! Concurrent scan pipeline.
//!
//! # Design
//!
//! ```text
//! walk (calling thread) ──bounded(0)──▶ trawl-worker-0..N ──bounded(N)──▶ trawl-collector
//!   one item at a time                   annotate(item)                   owns the snapshot
//! ```
//!
//! - The work channel is unbuffered, so the walk never runs ahead of the
//!   workers.
//! - Workers exit when the walk drops the work sender; the collector exits
//!   when the last worker drops its result sender, then hands the snapshot
//!   back through its join handle.
//! - The snapshot is owned by the collector thread alone, so no lock is
//!   needed while results stream in.

pub mod walk;

pub use walk::{
    path_covers, walk_root, walk_roots, EntryMeta, RootFailure, ScanRoot, WalkIssue, WalkOptions,
    WalkReport, WorkItem, DEFAULT_EXCLUDE_DIR_NAMES,
};

use crate::annotate::{Annotate, AnnotationResult};
use crate::error::{Result, TrawlError};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Every path seen by one scan and all results produced for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScanSnapshot {
    entries: BTreeMap<String, Vec<AnnotationResult>>,
}

impl ScanSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a result under its own path.
    pub fn insert(&mut self, result: AnnotationResult) {
        self.entries
            .entry(result.path().to_string())
            .or_default()
            .push(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&[AnnotationResult]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AnnotationResult])> {
        self.entries
            .iter()
            .map(|(path, results)| (path.as_str(), results.as_slice()))
    }

    pub fn result_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Status export of the whole snapshot.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromIterator<AnnotationResult> for ScanSnapshot {
    fn from_iter<I: IntoIterator<Item = AnnotationResult>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for result in iter {
            snapshot.insert(result);
        }
        snapshot
    }
}

/// Scan statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub items_dispatched: u64,
    pub items_processed: u64,
    pub results_collected: u64,
    pub probe_errors: u64,
    pub roots_failed: u64,
    pub walk_issues: u64,
    pub duration_ms: u64,
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct ScanOutcome {
    pub snapshot: ScanSnapshot,
    pub stats: ScanStats,
    pub failed_roots: Vec<RootFailure>,
    pub issues: Vec<WalkIssue>,
}

/// Producer, worker pool and collector for one scan.
#[derive(Debug, Clone)]
pub struct ScanPipeline {
    workers: usize,
    walk: WalkOptions,
}

impl ScanPipeline {
    pub fn new(workers: usize, walk: WalkOptions) -> Self {
        Self {
            workers: workers.max(1),
            walk,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Walk `roots` and annotate every entry.
    ///
    /// Fails with `NoRoots` when there is nothing to walk or every root
    /// failed; a partial failure is reported in the outcome instead.
    pub fn run(&self, roots: &[ScanRoot], annotator: Arc<dyn Annotate>) -> Result<ScanOutcome> {
        if roots.is_empty() {
            return Err(TrawlError::NoRoots("no roots configured".to_string()));
        }
        info!(roots = roots.len(), workers = self.workers, "Starting scan");

        let outcome = self.execute(annotator, |tx| walk_roots(roots, &self.walk, tx))?;

        if outcome.failed_roots.len() == roots.len() {
            let reasons = outcome
                .failed_roots
                .iter()
                .map(|f| format!("{}: {}", f.root, f.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TrawlError::NoRoots(reasons));
        }
        Ok(outcome)
    }

    /// Annotate a fixed list of items without touching the filesystem walk.
    pub fn run_items(&self, items: Vec<WorkItem>, annotator: Arc<dyn Annotate>) -> Result<ScanOutcome> {
        self.execute(annotator, move |tx| {
            let mut report = WalkReport::default();
            for item in items {
                tx.send(item)
                    .map_err(|_| TrawlError::InvalidState("all scan workers exited".to_string()))?;
                report.dispatched += 1;
            }
            Ok(report)
        })
    }

    fn execute<F>(&self, annotator: Arc<dyn Annotate>, produce: F) -> Result<ScanOutcome>
    where
        F: FnOnce(&Sender<WorkItem>) -> Result<WalkReport>,
    {
        let start = Instant::now();
        let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(0);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<AnnotationResult>(self.workers);

        let collector = thread::Builder::new()
            .name("trawl-collector".to_string())
            .spawn(move || collect(result_rx))?;

        let mut handles = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            let annotator = Arc::clone(&annotator);
            let handle = thread::Builder::new()
                .name(format!("trawl-worker-{}", i))
                .spawn(move || worker_loop(rx, tx, annotator.as_ref()))?;
            handles.push(handle);
        }
        drop(work_rx);
        drop(result_tx);

        let produced = produce(&work_tx);
        drop(work_tx);

        let mut processed = 0;
        let mut panicked = 0;
        for handle in handles {
            match handle.join() {
                Ok(n) => processed += n,
                Err(_) => panicked += 1,
            }
        }
        let (snapshot, results_collected, probe_errors) = collector
            .join()
            .map_err(|_| TrawlError::InvalidState("scan collector panicked".to_string()))?;
        if panicked > 0 {
            return Err(TrawlError::InvalidState(format!(
                "{} scan workers panicked",
                panicked
            )));
        }
        let report = produced?;

        let stats = ScanStats {
            items_dispatched: report.dispatched,
            items_processed: processed,
            results_collected,
            probe_errors,
            roots_failed: report.failed_roots.len() as u64,
            walk_issues: report.issues.len() as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if stats.items_dispatched != stats.items_processed {
            warn!(
                dispatched = stats.items_dispatched,
                processed = stats.items_processed,
                "Not every dispatched item was processed"
            );
        }
        info!(
            paths = snapshot.len(),
            dispatched = stats.items_dispatched,
            results = stats.results_collected,
            probe_errors = stats.probe_errors,
            roots_failed = stats.roots_failed,
            duration_ms = stats.duration_ms,
            "Scan complete"
        );

        Ok(ScanOutcome {
            snapshot,
            stats,
            failed_roots: report.failed_roots,
            issues: report.issues,
        })
    }
}

fn worker_loop(rx: Receiver<WorkItem>, tx: Sender<AnnotationResult>, annotator: &dyn Annotate) -> u64 {
    let mut processed = 0;
    for item in rx.iter() {
        for result in annotator.annotate(&item) {
            if tx.send(result).is_err() {
                debug!("Collector gone, worker exiting");
                return processed;
            }
        }
        processed += 1;
    }
    processed
}

fn collect(rx: Receiver<AnnotationResult>) -> (ScanSnapshot, u64, u64) {
    let mut snapshot = ScanSnapshot::new();
    let mut results = 0;
    let mut probe_errors = 0;
    for result in rx.iter() {
        results += 1;
        probe_errors += result.error_count() as u64;
        snapshot.insert(result);
    }
    (snapshot, results, probe_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::PathTags;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;

    /// One result per item, with a per-item delay to shuffle completion order.
    struct EchoAnnotator {
        delay: bool,
    }

    impl Annotate for EchoAnnotator {
        fn annotate(&self, item: &WorkItem) -> Vec<AnnotationResult> {
            if self.delay {
                let jitter = item.logical.len() as u64 % 3;
                thread::sleep(Duration::from_millis(jitter));
            }
            vec![AnnotationResult::PathTags(PathTags {
                path: item.logical.clone(),
                rule_id: 1,
                values: BTreeMap::new(),
            })]
        }
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem {
                logical: format!("root/file_{:04}", i),
                physical: PathBuf::from(format!("/tmp/file_{:04}", i)),
                meta: EntryMeta {
                    size: i as u64,
                    mode: 0o644,
                    modified: None,
                    is_dir: false,
                },
                queued_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_every_item_collected() {
        let pipeline = ScanPipeline::new(4, WalkOptions::default());
        let outcome = pipeline
            .run_items(items(200), Arc::new(EchoAnnotator { delay: true }))
            .unwrap();
        assert_eq!(outcome.snapshot.len(), 200);
        assert_eq!(outcome.stats.items_dispatched, 200);
        assert_eq!(outcome.stats.items_processed, 200);
        assert_eq!(outcome.stats.results_collected, 200);
        assert!(outcome.snapshot.contains("root/file_0199"));
    }

    #[test]
    fn test_zero_workers_clamped_to_one() {
        let pipeline = ScanPipeline::new(0, WalkOptions::default());
        assert_eq!(pipeline.workers(), 1);
        let outcome = pipeline
            .run_items(items(5), Arc::new(EchoAnnotator { delay: false }))
            .unwrap();
        assert_eq!(outcome.snapshot.len(), 5);
    }

    #[test]
    fn test_empty_input() {
        let pipeline = ScanPipeline::new(3, WalkOptions::default());
        let outcome = pipeline
            .run_items(Vec::new(), Arc::new(EchoAnnotator { delay: false }))
            .unwrap();
        assert!(outcome.snapshot.is_empty());
        assert_eq!(outcome.stats.results_collected, 0);
    }

    #[test]
    fn test_no_roots_is_an_error() {
        let pipeline = ScanPipeline::new(2, WalkOptions::default());
        let err = pipeline
            .run(&[], Arc::new(EchoAnnotator { delay: false }))
            .unwrap_err();
        assert!(matches!(err, TrawlError::NoRoots(_)));
    }

    #[test]
    fn test_all_roots_failing_is_an_error() {
        let pipeline = ScanPipeline::new(2, WalkOptions::default());
        let roots = vec![ScanRoot::new("a", "/definitely/not/here/a")];
        let err = pipeline
            .run(&roots, Arc::new(EchoAnnotator { delay: false }))
            .unwrap_err();
        assert!(matches!(err, TrawlError::NoRoots(_)));
    }

    #[test]
    fn test_snapshot_json_export() {
        let snapshot: ScanSnapshot = vec![AnnotationResult::PathTags(PathTags {
            path: "a/b".to_string(),
            rule_id: 3,
            values: BTreeMap::from([("x".to_string(), "1".to_string())]),
        })]
        .into_iter()
        .collect();
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["a/b"][0]["ruleId"], 3);
        assert_eq!(json["a/b"][0]["values"]["x"], "1");
    }
}
