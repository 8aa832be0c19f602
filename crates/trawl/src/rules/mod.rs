//! Path-template rules: compilation, matching and rule-set assembly.

pub mod compiler;
pub mod matcher;
pub mod types;

pub use compiler::{CompiledRule, Token, TokenKind, TrailingPolicy};
pub use matcher::{match_all, parse_path, select_best, MatchFailure, RuleMatch, TokenMatch};
pub use types::{Rule, RuleKind};

use tracing::warn;

/// A path-tag rule together with its compiled template.
#[derive(Debug, Clone)]
pub struct PathTagRule {
    pub rule: Rule,
    pub compiled: CompiledRule,
}

/// Ordered, compiled rule set for one scan.
///
/// Ignore rules come first so they get first refusal during best-match
/// selection; within each group higher priority sorts earlier and the
/// load order is otherwise preserved.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    path_tags: Vec<PathTagRule>,
    compiled: Vec<CompiledRule>,
    dropped: Vec<i64>,
}

/// Which path-tag rule a path resolved to.
#[derive(Debug, Clone)]
pub struct PathTagSelection<'a> {
    pub rule: &'a PathTagRule,
    pub result: RuleMatch,
}

impl RuleSet {
    /// Concatenate local and remote rules, order them, and compile path-tag
    /// templates. Malformed templates are dropped with a warning.
    pub fn assemble(local: Vec<Rule>, remote: Vec<Rule>, trailing: TrailingPolicy) -> Self {
        let mut rules: Vec<Rule> = local.into_iter().chain(remote).collect();
        rules.sort_by(|a, b| b.ignore.cmp(&a.ignore).then(b.priority.cmp(&a.priority)));

        let mut path_tags = Vec::new();
        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.kind == RuleKind::PathTags {
                match CompiledRule::compile(&rule.template, trailing) {
                    Ok(compiled) => path_tags.push(PathTagRule {
                        rule: rule.clone(),
                        compiled,
                    }),
                    Err(e) => {
                        warn!(rule_id = rule.id, error = %e, "Dropping malformed rule");
                        dropped.push(rule.id);
                        continue;
                    }
                }
            }
            kept.push(rule);
        }

        let compiled = path_tags.iter().map(|p| p.compiled.clone()).collect();
        Self {
            rules: kept,
            path_tags,
            compiled,
            dropped,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// All usable rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn path_tag_rules(&self) -> &[PathTagRule] {
        &self.path_tags
    }

    /// Rules of one kind in evaluation order.
    pub fn of_kind(&self, kind: RuleKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.kind == kind)
    }

    /// IDs of rules dropped because their template did not compile.
    pub fn dropped(&self) -> &[i64] {
        &self.dropped
    }

    /// Resolve the best path-tag rule for a logical path.
    pub fn select_path_tags(&self, logical_path: &str) -> Option<PathTagSelection<'_>> {
        let (index, result) = parse_path(logical_path, &self.compiled, false)?;
        Some(PathTagSelection {
            rule: &self.path_tags[index],
            result,
        })
    }
}
