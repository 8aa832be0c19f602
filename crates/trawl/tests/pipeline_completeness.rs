//! The scan pipeline must deliver every result of every item exactly once,
//! whatever order the workers finish in.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trawl::annotate::{Annotate, AnnotationResult, PathTags};
use trawl::scanner::{EntryMeta, ScanPipeline, WalkOptions, WorkItem};

/// Emits `1 + index % 3` results per item after a short, uneven delay.
struct SlowAnnotator {
    calls: AtomicU64,
}

impl Annotate for SlowAnnotator {
    fn annotate(&self, item: &WorkItem) -> Vec<AnnotationResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_micros((call * 7919) % 700));

        let index = item.meta.size;
        (0..=(index % 3))
            .map(|n| {
                AnnotationResult::PathTags(PathTags {
                    path: item.logical.clone(),
                    rule_id: n as i64,
                    values: BTreeMap::from([("n".to_string(), n.to_string())]),
                })
            })
            .collect()
    }
}

fn items(count: u64) -> Vec<WorkItem> {
    (0..count)
        .map(|i| WorkItem {
            logical: format!("share/dir_{}/file_{}.dat", i % 10, i),
            physical: PathBuf::from(format!("/mnt/share/dir_{}/file_{}.dat", i % 10, i)),
            meta: EntryMeta {
                size: i,
                mode: 0o100644,
                modified: None,
                is_dir: false,
            },
            queued_at: Utc::now(),
        })
        .collect()
}

fn expected_results(count: u64) -> u64 {
    (0..count).map(|i| 1 + i % 3).sum()
}

#[test]
fn test_no_item_lost_or_duplicated_across_runs() {
    const ITEMS: u64 = 300;
    let pipeline = ScanPipeline::new(4, WalkOptions::default());

    for run in 0..10 {
        let annotator = Arc::new(SlowAnnotator {
            calls: AtomicU64::new(0),
        });
        let outcome = pipeline.run_items(items(ITEMS), annotator.clone()).unwrap();

        assert_eq!(outcome.snapshot.len(), ITEMS as usize, "run {}", run);
        assert_eq!(outcome.stats.items_dispatched, ITEMS);
        assert_eq!(outcome.stats.items_processed, ITEMS);
        assert_eq!(outcome.stats.results_collected, expected_results(ITEMS));
        assert_eq!(annotator.calls.load(Ordering::SeqCst), ITEMS);

        for i in 0..ITEMS {
            let path = format!("share/dir_{}/file_{}.dat", i % 10, i);
            let results = outcome.snapshot.get(&path).unwrap();
            assert_eq!(results.len() as u64, 1 + i % 3, "{}", path);

            // Results of one item arrive in the order its worker produced them.
            let rule_ids: Vec<i64> = results.iter().map(|r| r.rule_id()).collect();
            let expected: Vec<i64> = (0..=(i % 3) as i64).collect();
            assert_eq!(rule_ids, expected);
        }
    }
}

#[test]
fn test_more_workers_than_items() {
    let pipeline = ScanPipeline::new(16, WalkOptions::default());
    let outcome = pipeline
        .run_items(
            items(3),
            Arc::new(SlowAnnotator {
                calls: AtomicU64::new(0),
            }),
        )
        .unwrap();
    assert_eq!(outcome.snapshot.len(), 3);
    assert_eq!(outcome.snapshot.result_count() as u64, expected_results(3));
}

#[test]
fn test_single_worker_is_still_complete() {
    let pipeline = ScanPipeline::new(1, WalkOptions::default());
    let outcome = pipeline
        .run_items(
            items(50),
            Arc::new(SlowAnnotator {
                calls: AtomicU64::new(0),
            }),
        )
        .unwrap();
    assert_eq!(outcome.snapshot.len(), 50);
    assert_eq!(outcome.stats.results_collected, expected_results(50));
}
