//! Trawl: periodic filesystem crawler.
//!
//! Walks configured roots, annotates every file and directory against
//! path-template rules and file-property probes, and records what was
//! created, modified or deleted since the previous crawl.
//!
//! # Modules
//!
//! - [`rules`]: template compilation, matching and best-rule selection
//! - [`annotate`]: annotation results and the handlers that produce them
//! - [`scanner`]: the walk / worker pool / collector pipeline
//! - [`diff`]: changelist computation between revisions
//! - [`store`]: record persistence
//! - [`crawler`]: one crawl cycle and the periodic loop

pub mod annotate;
pub mod config;
pub mod crawler;
pub mod diff;
pub mod error;
pub mod rules;
pub mod scanner;
pub mod store;

pub use annotate::{Annotate, AnnotationResult};
pub use config::TrawlConfig;
pub use crawler::{Crawler, CycleReport};
pub use diff::{ChangeAction, ChangeEntry, Changelist};
pub use error::{Result, TrawlError};
pub use rules::{CompiledRule, Rule, RuleKind, RuleSet, TrailingPolicy};
pub use scanner::{ScanPipeline, ScanRoot, ScanSnapshot, ScanStats};
pub use store::{JsonFileStore, MemoryStore, RecordStore};
