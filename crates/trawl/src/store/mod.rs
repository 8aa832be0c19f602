//! Persistence of rules, scans and per-path file records.
//!
//! Records are append-only. Every change to a path adds a record that
//! links back to the one it supersedes through `prev_id`, so the history
//! of a path can be walked backwards. Deletions are stored as tombstones
//! and drop out of the next scan's previous view.

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::diff::{ChangeAction, Changelist, PreviousRecord};
use crate::error::{Result, TrawlError};
use crate::rules::Rule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use trawl_ids::{RecordId, ScanId};

/// One flattened property of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub rule_id: i64,
    pub tag: String,
    pub value: String,
}

/// A path's state as of one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub record_id: RecordId,
    pub path: String,
    pub action: ChangeAction,
    pub action_at: DateTime<Utc>,
    pub scan_id: ScanId,
    pub prev_id: Option<RecordId>,
    #[serde(default)]
    pub results: Vec<StoredResult>,
}

impl FileRecord {
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .map(|r| (r.tag.clone(), r.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
}

/// Bookkeeping for one crawl cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
    pub skipped: u64,
}

/// Persistence adapter used by the crawler.
pub trait RecordStore: Send + Sync {
    /// Rules maintained in the store, merged with the local table each cycle.
    fn fetch_rules(&self) -> Result<Vec<Rule>>;

    /// Latest live record per path, keyed by path.
    fn previous_records(&self) -> Result<HashMap<String, PreviousRecord>>;

    fn open_scan(&self) -> Result<ScanRecord>;

    /// Store one record per changelist entry, returning the assigned IDs in
    /// entry order.
    fn commit_changes(&self, scan_id: &ScanId, changes: &Changelist) -> Result<Vec<RecordId>>;

    fn close_scan(&self, scan_id: &ScanId) -> Result<ScanRecord>;

    /// Every record for one path, oldest first.
    fn history(&self, path: &str) -> Result<Vec<FileRecord>>;
}

/// The whole persisted state. Shared by both store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Ledger {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub scans: Vec<ScanRecord>,
    #[serde(default)]
    pub records: Vec<FileRecord>,
}

impl Ledger {
    fn next_record_id(&self) -> RecordId {
        self.records
            .last()
            .map(|r| r.record_id.next())
            .unwrap_or_else(|| RecordId::new(1))
    }

    fn scan_mut(&mut self, scan_id: &ScanId) -> Result<&mut ScanRecord> {
        self.scans
            .iter_mut()
            .find(|s| &s.scan_id == scan_id)
            .ok_or_else(|| TrawlError::Store(format!("unknown scan {}", scan_id)))
    }

    pub fn previous_records(&self) -> HashMap<String, PreviousRecord> {
        let mut latest: HashMap<String, PreviousRecord> = HashMap::new();
        for record in &self.records {
            if record.action == ChangeAction::Deleted {
                latest.remove(&record.path);
                continue;
            }
            latest.insert(
                record.path.clone(),
                PreviousRecord {
                    record_id: record.record_id,
                    path: record.path.clone(),
                    properties: record.properties(),
                },
            );
        }
        latest
    }

    pub fn open_scan(&mut self) -> ScanRecord {
        let scan = ScanRecord {
            scan_id: ScanId::new(),
            status: ScanStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            created: 0,
            modified: 0,
            deleted: 0,
            skipped: 0,
        };
        self.scans.push(scan.clone());
        scan
    }

    pub fn commit_changes(&mut self, scan_id: &ScanId, changes: &Changelist) -> Result<Vec<RecordId>> {
        let scan = self.scan_mut(scan_id)?;
        if scan.status != ScanStatus::Running {
            return Err(TrawlError::Store(format!("scan {} is already closed", scan_id)));
        }
        scan.created += changes.created() as u64;
        scan.modified += changes.modified() as u64;
        scan.deleted += changes.deleted() as u64;
        scan.skipped += changes.skipped.len() as u64;

        let now = Utc::now();
        let mut next = self.next_record_id();
        let mut ids = Vec::with_capacity(changes.entries.len());
        for entry in &changes.entries {
            let results = entry
                .results
                .iter()
                .flatten()
                .flat_map(|result| {
                    let rule_id = result.rule_id();
                    result
                        .properties()
                        .into_iter()
                        .map(move |(tag, value)| StoredResult { rule_id, tag, value })
                })
                .collect();
            self.records.push(FileRecord {
                record_id: next,
                path: entry.path.clone(),
                action: entry.action,
                action_at: now,
                scan_id: scan_id.clone(),
                prev_id: entry.previous_record,
                results,
            });
            ids.push(next);
            next = next.next();
        }
        Ok(ids)
    }

    pub fn close_scan(&mut self, scan_id: &ScanId) -> Result<ScanRecord> {
        let scan = self.scan_mut(scan_id)?;
        scan.status = ScanStatus::Completed;
        scan.completed_at = Some(Utc::now());
        Ok(scan.clone())
    }

    pub fn history(&self, path: &str) -> Vec<FileRecord> {
        self.records
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}
