use super::{FileRecord, Ledger, RecordStore, ScanRecord};
use crate::diff::{Changelist, PreviousRecord};
use crate::error::{Result, TrawlError};
use crate::rules::Rule;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use trawl_ids::{RecordId, ScanId};

/// Store backed by a single JSON document.
///
/// Every mutation rewrites the document through a temp file and a rename,
/// so a crash leaves either the old or the new state on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl JsonFileStore {
    /// Open the document at `path`, starting empty if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ledger = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let ledger: Ledger = serde_json::from_str(&content).map_err(|e| {
                TrawlError::Store(format!("failed to parse {}: {}", path.display(), e))
            })?;
            info!(
                path = %path.display(),
                records = ledger.records.len(),
                scans = ledger.scans.len(),
                "Opened record store"
            );
            ledger
        } else {
            debug!(path = %path.display(), "Record store does not exist yet, starting empty");
            Ledger::default()
        };
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the store's rule table and persist it.
    pub fn replace_rules(&self, rules: Vec<Rule>) -> Result<()> {
        self.update(|ledger| {
            ledger.rules = rules;
            Ok(())
        })
    }

    /// Apply `change` to a copy of the ledger and swap it in only once the
    /// copy is on disk, so memory never runs ahead of the document.
    fn update<T>(&self, change: impl FnOnce(&mut Ledger) -> Result<T>) -> Result<T> {
        let mut ledger = self.lock()?;
        let mut next = ledger.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *ledger = next;
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| TrawlError::Store("record store lock poisoned".to_string()))
    }

    fn persist(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let content = serde_json::to_string_pretty(ledger)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn fetch_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.lock()?.rules.clone())
    }

    fn previous_records(&self) -> Result<HashMap<String, PreviousRecord>> {
        Ok(self.lock()?.previous_records())
    }

    fn open_scan(&self) -> Result<ScanRecord> {
        self.update(|ledger| Ok(ledger.open_scan()))
    }

    fn commit_changes(&self, scan_id: &ScanId, changes: &Changelist) -> Result<Vec<RecordId>> {
        self.update(|ledger| ledger.commit_changes(scan_id, changes))
    }

    fn close_scan(&self, scan_id: &ScanId) -> Result<ScanRecord> {
        self.update(|ledger| ledger.close_scan(scan_id))
    }

    fn history(&self, path: &str) -> Result<Vec<FileRecord>> {
        Ok(self.lock()?.history(path))
    }
}
