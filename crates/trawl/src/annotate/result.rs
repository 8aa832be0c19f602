//! Annotation results produced by rule handlers.
//!
//! Every variant flattens to a string property map through an explicit
//! field table and declares which of its keys are identity (`ignored`) and
//! which are provenance (`meta`). Identity keys never reach storage or the
//! diff; meta keys are stored but never count as a real change.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity keys shared by all variants.
pub const KEY_PATH: &str = "path";
pub const KEY_MOUNT_PATH: &str = "mount_path";
pub const KEY_RULE_ID: &str = "rule_id";

/// Provenance keys.
pub const KEY_QUEUED_AT: &str = "queued_at";
pub const KEY_PROCESSED_AT: &str = "processed_at";
pub const KEY_ERRORS: &str = "errors";
pub const KEY_EXTRACT_ERROR: &str = "extract_error";

/// A whole-file digest, rendered as `algorithm:hex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentDigest {
    pub algorithm: String,
    pub value: Vec<u8>,
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.value))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_string()
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| format!("digest '{}' is not algorithm:hex", s))?;
        let value = hex::decode(encoded).map_err(|e| format!("digest '{}': {}", s, e))?;
        Ok(Self {
            algorithm: algorithm.to_string(),
            value,
        })
    }
}

/// A probe failure recorded against a file instead of aborting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl FileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Stat, owner and digest of one file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProps {
    pub path: String,
    pub mount_path: String,
    pub rule_id: i64,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
    pub owner: Option<String>,
    pub digest: Option<ContentDigest>,
    pub queued_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub errors: Vec<FileError>,
}

/// Placeholder captures of the path-tag rule a path resolved to.
///
/// `values` is empty when the rule was the closest candidate but did not
/// fully match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathTags {
    pub path: String,
    pub rule_id: i64,
    pub values: BTreeMap<String, String>,
}

/// Key/value output of an external content extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentExtract {
    pub path: String,
    pub rule_id: i64,
    pub values: BTreeMap<String, String>,
    pub error: Option<String>,
}

/// One handler's annotation of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnnotationResult {
    FileProps(FileProps),
    PathTags(PathTags),
    ContentExtract(ContentExtract),
}

/// Identity and key classification of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description<'a> {
    pub path: &'a str,
    pub rule_id: i64,
    pub ignored_keys: &'static [&'static str],
    pub meta_keys: &'static [&'static str],
}

type Field<T> = (&'static str, fn(&T) -> String);

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const FILE_PROPS_FIELDS: &[Field<FileProps>] = &[
    (KEY_PATH, |p: &FileProps| p.path.clone()),
    (KEY_MOUNT_PATH, |p: &FileProps| p.mount_path.clone()),
    (KEY_RULE_ID, |p: &FileProps| p.rule_id.to_string()),
    ("size", |p: &FileProps| p.size.to_string()),
    ("mode", |p: &FileProps| format!("{:o}", p.mode)),
    ("mod_time", |p: &FileProps| p.modified.as_ref().map(timestamp).unwrap_or_default()),
    ("is_dir", |p: &FileProps| p.is_dir.to_string()),
    ("owner", |p: &FileProps| p.owner.clone().unwrap_or_default()),
    ("hash", |p: &FileProps| p.digest.as_ref().map(|d| d.to_string()).unwrap_or_default()),
    (KEY_QUEUED_AT, |p: &FileProps| timestamp(&p.queued_at)),
    (KEY_PROCESSED_AT, |p: &FileProps| timestamp(&p.processed_at)),
    (KEY_ERRORS, |p: &FileProps| {
        p.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }),
];
const FILE_PROPS_IGNORED: &[&str] = &[KEY_PATH, KEY_MOUNT_PATH, KEY_RULE_ID];
const FILE_PROPS_META: &[&str] = &[KEY_QUEUED_AT, KEY_PROCESSED_AT, KEY_ERRORS];

const PATH_TAGS_FIELDS: &[Field<PathTags>] = &[
    (KEY_PATH, |p: &PathTags| p.path.clone()),
    (KEY_RULE_ID, |p: &PathTags| p.rule_id.to_string()),
];
const PATH_TAGS_IGNORED: &[&str] = &[KEY_PATH, KEY_RULE_ID];
const PATH_TAGS_META: &[&str] = &[];

const CONTENT_EXTRACT_FIELDS: &[Field<ContentExtract>] = &[
    (KEY_PATH, |c: &ContentExtract| c.path.clone()),
    (KEY_RULE_ID, |c: &ContentExtract| c.rule_id.to_string()),
    (KEY_EXTRACT_ERROR, |c: &ContentExtract| c.error.clone().unwrap_or_default()),
];
const CONTENT_EXTRACT_IGNORED: &[&str] = &[KEY_PATH, KEY_RULE_ID];
const CONTENT_EXTRACT_META: &[&str] = &[KEY_EXTRACT_ERROR];

fn flatten_fields<T>(value: &T, fields: &[Field<T>]) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(key, render)| (key.to_string(), render(value)))
        .collect()
}

/// Dynamic values first, then the fixed fields, so identity keys always
/// hold their real value.
fn flatten_with_values<T>(
    value: &T,
    fields: &[Field<T>],
    values: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut map = values.clone();
    map.extend(flatten_fields(value, fields));
    map
}

fn first_shadowed<'a, T>(values: &'a BTreeMap<String, String>, fields: &[Field<T>]) -> Option<&'a str> {
    values
        .keys()
        .map(String::as_str)
        .find(|key| fields.iter().any(|(name, _)| name == key))
}

impl AnnotationResult {
    /// Every property, identity keys included, as strings.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        match self {
            Self::FileProps(p) => flatten_fields(p, FILE_PROPS_FIELDS),
            Self::PathTags(p) => flatten_with_values(p, PATH_TAGS_FIELDS, &p.values),
            Self::ContentExtract(c) => flatten_with_values(c, CONTENT_EXTRACT_FIELDS, &c.values),
        }
    }

    pub fn describe(&self) -> Description<'_> {
        match self {
            Self::FileProps(p) => Description {
                path: &p.path,
                rule_id: p.rule_id,
                ignored_keys: FILE_PROPS_IGNORED,
                meta_keys: FILE_PROPS_META,
            },
            Self::PathTags(p) => Description {
                path: &p.path,
                rule_id: p.rule_id,
                ignored_keys: PATH_TAGS_IGNORED,
                meta_keys: PATH_TAGS_META,
            },
            Self::ContentExtract(c) => Description {
                path: &c.path,
                rule_id: c.rule_id,
                ignored_keys: CONTENT_EXTRACT_IGNORED,
                meta_keys: CONTENT_EXTRACT_META,
            },
        }
    }

    /// Flattened properties minus identity keys: what gets stored and diffed.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let ignored = self.describe().ignored_keys;
        let mut map = self.flatten();
        map.retain(|k, _| !ignored.contains(&k.as_str()));
        map
    }

    pub fn path(&self) -> &str {
        self.describe().path
    }

    pub fn rule_id(&self) -> i64 {
        self.describe().rule_id
    }

    pub fn is_meta_key(&self, key: &str) -> bool {
        self.describe().meta_keys.contains(&key)
    }

    /// Identity or meta: either way not a real change.
    pub fn is_masked_key(&self, key: &str) -> bool {
        let d = self.describe();
        d.ignored_keys.contains(&key) || d.meta_keys.contains(&key)
    }

    /// A captured or extracted key that reuses one of this variant's fixed
    /// field names. Its value never survives `flatten`.
    pub fn shadowed_key(&self) -> Option<&str> {
        match self {
            Self::FileProps(_) => None,
            Self::PathTags(p) => first_shadowed(&p.values, PATH_TAGS_FIELDS),
            Self::ContentExtract(c) => first_shadowed(&c.values, CONTENT_EXTRACT_FIELDS),
        }
    }

    /// Probe failures carried by this result.
    pub fn error_count(&self) -> usize {
        match self {
            Self::FileProps(p) => p.errors.len(),
            Self::PathTags(_) => 0,
            Self::ContentExtract(c) => usize::from(c.error.is_some()),
        }
    }
}
