use super::{FileRecord, Ledger, RecordStore, ScanRecord};
use crate::diff::{Changelist, PreviousRecord};
use crate::error::{Result, TrawlError};
use crate::rules::Rule;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use trawl_ids::{RecordId, ScanId};

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store's rule table.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                rules,
                ..Ledger::default()
            }),
        }
    }

    pub fn scans(&self) -> Result<Vec<ScanRecord>> {
        Ok(self.lock()?.scans.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| TrawlError::Store("memory store lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn fetch_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.lock()?.rules.clone())
    }

    fn previous_records(&self) -> Result<HashMap<String, PreviousRecord>> {
        Ok(self.lock()?.previous_records())
    }

    fn open_scan(&self) -> Result<ScanRecord> {
        Ok(self.lock()?.open_scan())
    }

    fn commit_changes(&self, scan_id: &ScanId, changes: &Changelist) -> Result<Vec<RecordId>> {
        self.lock()?.commit_changes(scan_id, changes)
    }

    fn close_scan(&self, scan_id: &ScanId) -> Result<ScanRecord> {
        self.lock()?.close_scan(scan_id)
    }

    fn history(&self, path: &str) -> Result<Vec<FileRecord>> {
        Ok(self.lock()?.history(path))
    }
}
