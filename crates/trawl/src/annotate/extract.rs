//! Content extraction through external commands.
//!
//! ```text
//! ContentExtractor
//!     │
//!     └── spawn <command> <args..> <physical path>
//!         ├── timeout: timeout_secs (default 5)
//!         └── stdout: one JSON object, flattened to string values
//! ```
//!
//! Workers are plain threads, so each extractor owns a small tokio runtime
//! and blocks on the child process.

use crate::config::ExtractorConfig;
use crate::error::{Result, TrawlError};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

pub struct ContentExtractor {
    config: ExtractorConfig,
    timeout: Duration,
    runtime: Runtime,
}

impl std::fmt::Debug for ContentExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContentExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("trawl-extract-{}", config.rule_id))
            .enable_all()
            .build()?;
        Ok(Self {
            timeout: Duration::from_secs(config.timeout_secs),
            config,
            runtime,
        })
    }

    pub fn rule_id(&self) -> i64 {
        self.config.rule_id
    }

    /// Whether this extractor wants a file with this name.
    ///
    /// An empty extension list accepts every file.
    pub fn accepts(&self, physical: &Path) -> bool {
        if self.config.extensions.is_empty() {
            return true;
        }
        let Some(ext) = physical.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config
            .extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Run the command against one file and return its flattened output.
    pub fn extract(&self, physical: &Path) -> Result<BTreeMap<String, String>> {
        let path = physical.display().to_string();
        debug!(command = %self.config.command, path = %path, "Running extractor");

        let outcome = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, self.spawn(physical)).await });

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(command = %self.config.command, path = %path, "Extractor timed out after {:?}", self.timeout);
                Err(TrawlError::Probe {
                    path,
                    message: format!("extractor timed out after {:?}", self.timeout),
                })
            }
        }
    }

    async fn spawn(&self, physical: &Path) -> Result<BTreeMap<String, String>> {
        let path = physical.display().to_string();
        let probe_error = |message: String| TrawlError::Probe {
            path: path.clone(),
            message,
        };

        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(physical)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| probe_error(format!("spawn {}: {}", self.config.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(probe_error(format!(
                "extractor exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| probe_error("extractor output is not valid UTF-8".to_string()))?;
        parse_output(stdout.trim()).map_err(probe_error)
    }
}

/// Parse extractor stdout: a JSON object whose values become strings.
fn parse_output(stdout: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    if stdout.is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| format!("extractor output is not JSON: {}", e))?;
    let serde_json::Value::Object(object) = value else {
        return Err("extractor output is not a JSON object".to_string());
    };
    Ok(object
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str], extensions: &[&str], timeout_secs: u64) -> ExtractorConfig {
        ExtractorConfig {
            rule_id: 9,
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            timeout_secs,
        }
    }

    #[test]
    fn test_parse_output_stringifies_values() {
        let map = parse_output(r#"{"name": "plate", "wells": 96, "ok": true, "none": null}"#).unwrap();
        assert_eq!(map["name"], "plate");
        assert_eq!(map["wells"], "96");
        assert_eq!(map["ok"], "true");
        assert_eq!(map["none"], "");
        assert!(parse_output("").unwrap().is_empty());
        assert!(parse_output("[1, 2]").is_err());
        assert!(parse_output("not json").is_err());
    }

    #[test]
    fn test_accepts_extensions() {
        let extractor = ContentExtractor::new(config("true", &[], &[".wsp", "CSV"], 5)).unwrap();
        assert!(extractor.accepts(Path::new("/data/run1.wsp")));
        assert!(extractor.accepts(Path::new("/data/run1.csv")));
        assert!(!extractor.accepts(Path::new("/data/run1.txt")));
        assert!(!extractor.accepts(Path::new("/data/Makefile")));

        let any = ContentExtractor::new(config("true", &[], &[], 5)).unwrap();
        assert!(any.accepts(Path::new("/data/Makefile")));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_runs_command_with_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("plate.wsp");
        std::fs::write(&file, "a\nb\n").unwrap();

        let script = r#"printf '{"file":"%s","lines":%s}' "$(basename "$1")" "$(wc -l < "$1" | tr -d ' ')""#;
        let extractor =
            ContentExtractor::new(config("sh", &["-c", script, "extract"], &["wsp"], 5)).unwrap();
        let values = extractor.extract(&file).unwrap();
        assert_eq!(values["file"], "plate.wsp");
        assert_eq!(values["lines"], "2");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_failure_and_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("x.wsp");
        std::fs::write(&file, "x").unwrap();

        let failing = ContentExtractor::new(config("sh", &["-c", "exit 3", "extract"], &[], 5)).unwrap();
        assert!(matches!(failing.extract(&file), Err(TrawlError::Probe { .. })));

        let slow = ContentExtractor::new(config("sh", &["-c", "sleep 5", "extract"], &[], 1)).unwrap();
        let err = slow.extract(&file).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
