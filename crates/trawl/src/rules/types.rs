//! Rule records as loaded from the local table and the record store.

use serde::{Deserialize, Serialize};

/// Which handler produces annotations for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Template captures become path tags.
    #[serde(rename = "pathtags")]
    PathTags,
    /// Stat, owner and optional digest of the file.
    #[serde(rename = "fileprops")]
    FileProps,
    /// Opaque content extractor invoked per matching extension.
    #[serde(rename = "extract")]
    ContentExtract,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathTags => "pathtags",
            Self::FileProps => "fileprops",
            Self::ContentExtract => "extract",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pathtags" => Some(Self::PathTags),
            "fileprops" => Some(Self::FileProps),
            "extract" => Some(Self::ContentExtract),
            _ => None,
        }
    }
}

/// A rule record. Immutable for the duration of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique identifier
    pub id: i64,
    /// Path template, e.g. `<year>/<project>_<sample>.csv`
    #[serde(default)]
    pub template: String,
    /// Priority (higher = evaluated first within its group)
    #[serde(default)]
    pub priority: i32,
    /// Ignore rules get first refusal and suppress tagging when they match
    #[serde(default)]
    pub ignore: bool,
    pub kind: RuleKind,
    /// Owning principal (user or group) responsible for matching data
    #[serde(default)]
    pub principal: Option<String>,
}

impl Rule {
    pub fn path_tags(id: i64, template: &str) -> Self {
        Self {
            id,
            template: template.to_string(),
            priority: 0,
            ignore: false,
            kind: RuleKind::PathTags,
            principal: None,
        }
    }

    pub fn file_props(id: i64) -> Self {
        Self {
            id,
            template: String::new(),
            priority: 0,
            ignore: false,
            kind: RuleKind::FileProps,
            principal: None,
        }
    }

    pub fn content_extract(id: i64) -> Self {
        Self {
            id,
            template: String::new(),
            priority: 0,
            ignore: false,
            kind: RuleKind::ContentExtract,
            principal: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_kind_roundtrip() {
        for kind in [RuleKind::PathTags, RuleKind::FileProps, RuleKind::ContentExtract] {
            assert_eq!(RuleKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RuleKind::parse("PathTags"), Some(RuleKind::PathTags));
        assert!(RuleKind::parse("csv").is_none());
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: Rule =
            serde_json::from_str(r#"{"id": 7, "template": "<a>_<b>", "kind": "pathtags"}"#)
                .unwrap();
        assert_eq!(rule.id, 7);
        assert!(!rule.ignore);
        assert_eq!(rule.priority, 0);
        assert!(rule.principal.is_none());
    }
}
