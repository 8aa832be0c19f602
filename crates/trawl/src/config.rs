//! Crawler configuration
//!
//! Read from `$TRAWL_HOME/config.toml` (default `~/.trawl/config.toml`).
//! Every field has a default, so an empty file is a valid config.

use crate::error::{Result, TrawlError};
use crate::rules::{Rule, TrailingPolicy};
use crate::scanner::{ScanRoot, WalkOptions, DEFAULT_EXCLUDE_DIR_NAMES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A configured root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Logical path, used for matching and records
    pub path: String,
    /// Where the root is mounted on this host, if not at `path` itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

impl RootConfig {
    pub fn to_scan_root(&self) -> ScanRoot {
        let physical = self.mount_point.as_deref().unwrap_or(&self.path);
        ScanRoot::new(self.path.clone(), physical)
    }
}

/// External command serving one content-extract rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub rule_id: i64,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// File extensions handled (empty = all files)
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default = "default_extractor_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrawlConfig {
    /// Scan worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between crawl cycles in watch mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Compute a SHA-256 digest of every file (I/O heavy)
    #[serde(default)]
    pub compute_hash: bool,

    /// Trailing placeholders stop at `/` instead of absorbing nested paths
    #[serde(default = "default_true")]
    pub disallow_nested_paths: bool,

    /// Record store document
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default)]
    pub follow_symlinks: bool,

    #[serde(default = "default_exclude_dir_names")]
    pub exclude_dir_names: Vec<String>,

    #[serde(default)]
    pub roots: Vec<RootConfig>,

    /// Local rule table, merged with the store's rules each cycle
    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub extractors: Vec<ExtractorConfig>,
}

impl Default for TrawlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval(),
            compute_hash: false,
            disallow_nested_paths: true,
            store_path: default_store_path(),
            follow_symlinks: false,
            exclude_dir_names: default_exclude_dir_names(),
            roots: Vec::new(),
            rules: Vec::new(),
            extractors: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_poll_interval() -> u64 { 3600 }
fn default_true() -> bool { true }
fn default_extractor_timeout() -> u64 { 5 }
fn default_store_path() -> PathBuf {
    trawl_logging::trawl_home().join("records.json")
}
fn default_exclude_dir_names() -> Vec<String> {
    DEFAULT_EXCLUDE_DIR_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    trawl_logging::trawl_home().join("config.toml")
}

impl TrawlConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| TrawlError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TrawlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self).map_err(|e| TrawlError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(TrawlError::Config("poll_interval_secs must be positive".to_string()));
        }
        for extractor in &self.extractors {
            if extractor.command.trim().is_empty() {
                return Err(TrawlError::Config(format!(
                    "extractor for rule {} has no command",
                    extractor.rule_id
                )));
            }
            if extractor.timeout_secs == 0 {
                return Err(TrawlError::Config(format!(
                    "extractor for rule {} needs a positive timeout_secs",
                    extractor.rule_id
                )));
            }
        }
        Ok(())
    }

    pub fn trailing_policy(&self) -> TrailingPolicy {
        if self.disallow_nested_paths {
            TrailingPolicy::StopAtSeparator
        } else {
            TrailingPolicy::ToEnd
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn scan_roots(&self) -> Vec<ScanRoot> {
        self.roots.iter().map(RootConfig::to_scan_root).collect()
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            follow_symlinks: self.follow_symlinks,
            exclude_dir_names: self.exclude_dir_names.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleKind;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TrawlConfig::parse("").unwrap();
        assert_eq!(config.poll_interval_secs, 3600);
        assert!(config.workers >= 1);
        assert!(!config.compute_hash);
        assert_eq!(config.trailing_policy(), TrailingPolicy::StopAtSeparator);
        assert!(config.exclude_dir_names.iter().any(|d| d == ".git"));
        assert!(config.store_path.ends_with("records.json"));
    }

    #[test]
    fn test_full_config() {
        let config = TrawlConfig::parse(
            r#"
            workers = 2
            poll_interval_secs = 60
            compute_hash = true
            disallow_nested_paths = false

            [[roots]]
            path = "share/research"
            mount_point = "/mnt/research"

            [[roots]]
            path = "/srv/data"

            [[rules]]
            id = 1
            kind = "fileprops"

            [[rules]]
            id = 2
            kind = "pathtags"
            template = "<year>/<project>_<sample>.csv"
            priority = 10
            principal = "lab-admins"

            [[extractors]]
            rule_id = 3
            command = "wsp-extract"
            extensions = ["wsp"]
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.trailing_policy(), TrailingPolicy::ToEnd);
        let roots = config.scan_roots();
        assert_eq!(roots[0].logical, "share/research");
        assert_eq!(roots[0].physical, PathBuf::from("/mnt/research"));
        assert_eq!(roots[1].physical, PathBuf::from("/srv/data"));
        assert_eq!(config.rules[1].kind, RuleKind::PathTags);
        assert_eq!(config.rules[1].principal.as_deref(), Some("lab-admins"));
        assert_eq!(config.extractors[0].timeout_secs, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            TrawlConfig::parse("poll_interval_secs = 0"),
            Err(TrawlError::Config(_))
        ));
        assert!(TrawlConfig::parse("workers = \"many\"").is_err());
    }

    #[test]
    fn test_zero_extractor_timeout_rejected() {
        let toml = r#"
            [[extractors]]
            rule_id = 3
            command = "exif-dump"
            timeout_secs = 0
        "#;
        match TrawlConfig::parse(toml) {
            Err(TrawlError::Config(message)) => assert!(message.contains("timeout_secs")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/config.toml");
        let mut config = TrawlConfig::default();
        config.roots.push(RootConfig {
            path: "data".to_string(),
            mount_point: None,
        });
        config.rules.push(Rule::path_tags(1, "<a>/<b>"));
        config.save(&path).unwrap();

        let loaded = TrawlConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = TrawlConfig::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, TrawlConfig::default());
    }
}
