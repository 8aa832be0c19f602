//! Error types for the crawler

use std::io;
use thiserror::Error;

/// Trawl error type
#[derive(Error, Debug)]
pub enum TrawlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// A rule template could not be compiled. Fatal to that rule only.
    #[error("Malformed rule '{rule}' at offset {offset}: {reason}")]
    MalformedRule {
        rule: String,
        offset: usize,
        reason: String,
    },

    /// Owner lookup, hashing or content extraction failed for one file.
    #[error("Probe failed for {path}: {message}")]
    Probe { path: String, message: String },

    /// A configured root could not be walked at all.
    #[error("Cannot walk root {root}: {message}")]
    WalkFailure { root: String, message: String },

    /// Two annotation results for one path claimed the same property, or a
    /// captured value reused a fixed field name.
    #[error("Property '{key}' defined more than once for {path}")]
    Collision { path: String, key: String },

    #[error("No rules loaded")]
    NoRules,

    #[error("No usable roots: {0}")]
    NoRoots(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_convert() {
        fn open_missing() -> Result<()> {
            std::fs::File::open("/nonexistent/trawl/records.json")?;
            Ok(())
        }
        assert!(matches!(open_missing(), Err(TrawlError::Io(_))));
    }

    #[test]
    fn test_collision_names_path_and_key() {
        let err = TrawlError::Collision {
            path: "share/a.csv".to_string(),
            key: "size".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Property 'size' defined more than once for share/a.csv"
        );
    }
}
