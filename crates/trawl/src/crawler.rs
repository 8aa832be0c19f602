//! Crawl cycle orchestration and the periodic loop.

use crate::annotate::{
    ContentExtractor, DigestPolicy, Extractors, FilePropsHandler, OsOwnerResolver, OwnerResolver,
    RuleAnnotator,
};
use crate::config::TrawlConfig;
use crate::diff::{diff, ChangeAction, Changelist};
use crate::error::{Result, TrawlError};
use crate::rules::RuleSet;
use crate::scanner::{
    path_covers, RootFailure, ScanPipeline, ScanRoot, ScanSnapshot, ScanStats, WalkIssue,
};
use crate::store::{RecordStore, ScanRecord};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use trawl_ids::{RecordId, ScanId};

/// Granularity of shutdown checks while waiting for the next cycle.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Drop deletions the walk cannot vouch for: anything under a root that
/// failed or under an entry that could not be read.
fn suppress_unverified_deletions(
    changes: &mut Changelist,
    failed_roots: &[RootFailure],
    issues: &[WalkIssue],
) {
    let unseen: Vec<&str> = failed_roots
        .iter()
        .map(|f| f.root.as_str())
        .chain(issues.iter().map(|i| i.path.as_str()))
        .collect();
    if unseen.is_empty() {
        return;
    }

    let before = changes.entries.len();
    changes.entries.retain(|entry| {
        entry.action != ChangeAction::Deleted
            || !unseen.iter().any(|prefix| path_covers(prefix, &entry.path))
    });
    let kept = before - changes.entries.len();
    if kept > 0 {
        warn!(records = kept, "Keeping records under paths that could not be read");
    }
}

/// What one crawl cycle did.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub scan: ScanRecord,
    pub changes: Changelist,
    pub record_ids: Vec<RecordId>,
    pub stats: ScanStats,
    pub failed_roots: Vec<RootFailure>,
    pub rules_dropped: Vec<i64>,
}

pub struct Crawler {
    config: TrawlConfig,
    roots: Vec<ScanRoot>,
    store: Arc<dyn RecordStore>,
    owner: Arc<dyn OwnerResolver>,
    extractors: Arc<Extractors>,
    pipeline: ScanPipeline,
    latest: RwLock<Option<Arc<ScanSnapshot>>>,
}

impl Crawler {
    pub fn new(config: TrawlConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        let mut extractors = Extractors::new();
        for extractor in &config.extractors {
            extractors.insert(extractor.rule_id, ContentExtractor::new(extractor.clone())?);
        }
        Ok(Self {
            roots: config.scan_roots(),
            pipeline: ScanPipeline::new(config.workers, config.walk_options()),
            store,
            owner: Arc::new(OsOwnerResolver),
            extractors: Arc::new(extractors),
            latest: RwLock::new(None),
            config,
        })
    }

    /// Replace the owner lookup used by the file-props handler.
    pub fn with_owner_resolver(mut self, owner: Arc<dyn OwnerResolver>) -> Self {
        self.owner = owner;
        self
    }

    pub fn config(&self) -> &TrawlConfig {
        &self.config
    }

    /// The snapshot published by the last successful cycle.
    pub fn latest(&self) -> Option<Arc<ScanSnapshot>> {
        match self.latest.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, snapshot: ScanSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.latest.write() {
            Ok(mut guard) => *guard = Some(snapshot),
            Err(poisoned) => *poisoned.into_inner() = Some(snapshot),
        }
    }

    /// Assemble local and store rules for this cycle.
    pub fn load_rules(&self) -> Result<RuleSet> {
        let remote = self.store.fetch_rules()?;
        let rules = RuleSet::assemble(self.config.rules.clone(), remote, self.config.trailing_policy());
        if rules.is_empty() {
            return Err(TrawlError::NoRules);
        }
        Ok(rules)
    }

    /// Scan, diff against the stored view, commit, publish.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let rules = self.load_rules()?;
        let rules_dropped = rules.dropped().to_vec();
        let previous = self.store.previous_records()?;
        let scan = self.store.open_scan()?;
        info!(scan_id = %scan.scan_id, rules = rules.len(), previous = previous.len(), "Crawl cycle started");

        let annotator = RuleAnnotator::new(
            rules,
            FilePropsHandler::new(
                Arc::clone(&self.owner),
                DigestPolicy::new(self.config.compute_hash),
            ),
            Arc::clone(&self.extractors),
        );

        let outcome = match self.pipeline.run(&self.roots, Arc::new(annotator)) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.abandon_scan(&scan.scan_id);
                return Err(e);
            }
        };

        let mut changes = diff(&previous, &outcome.snapshot);
        suppress_unverified_deletions(&mut changes, &outcome.failed_roots, &outcome.issues);
        for skipped in &changes.skipped {
            error!(path = %skipped.path, reason = %skipped.reason, "Path skipped from changelist");
        }

        let record_ids = match self.store.commit_changes(&scan.scan_id, &changes) {
            Ok(ids) => ids,
            Err(e) => {
                self.abandon_scan(&scan.scan_id);
                return Err(e);
            }
        };
        let scan = self.store.close_scan(&scan.scan_id)?;
        info!(
            scan_id = %scan.scan_id,
            created = scan.created,
            modified = scan.modified,
            deleted = scan.deleted,
            skipped = scan.skipped,
            unchanged = changes.unchanged,
            "Crawl cycle complete"
        );

        self.publish(outcome.snapshot);
        Ok(CycleReport {
            scan,
            changes,
            record_ids,
            stats: outcome.stats,
            failed_roots: outcome.failed_roots,
            rules_dropped,
        })
    }

    /// Close a scan that will commit nothing more.
    fn abandon_scan(&self, scan_id: &ScanId) {
        if let Err(e) = self.store.close_scan(scan_id) {
            warn!(scan_id = %scan_id, error = %e, "Failed to close aborted scan");
        }
    }

    /// Run cycles every poll interval until `shutdown` is set.
    ///
    /// A failed cycle is logged and retried on the next tick.
    pub fn run(&self, shutdown: &AtomicBool) {
        let interval = self.config.poll_interval();
        info!(interval_secs = interval.as_secs(), roots = self.roots.len(), "Crawler started");

        while !shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.run_cycle() {
                error!(error = %e, "Crawl cycle failed, retrying next interval");
            }

            let deadline = Instant::now() + interval;
            while !shutdown.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep(SHUTDOWN_POLL.min(deadline - now));
            }
        }

        info!("Crawler stopped");
    }
}
