//! Matching paths against compiled rules and picking the best rule.

use super::compiler::{normalize_separators, CompiledRule, Token, TrailingPolicy};
use std::collections::BTreeMap;

/// The part of the subject one token consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatch {
    pub token_index: usize,
    pub value: String,
    pub span: (usize, usize),
}

/// Why a match stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFailure {
    EmptySubject,
    LiteralMismatch { expected: String, at: usize },
    TerminatorNotFound { terminator: String, from: usize },
}

impl std::fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySubject => write!(f, "cannot match an empty subject"),
            Self::LiteralMismatch { expected, at } => {
                write!(f, "expected `{}` at offset {}", expected, at)
            }
            Self::TerminatorNotFound { terminator, from } => {
                write!(f, "terminator `{}` not found after offset {}", terminator, from)
            }
        }
    }
}

/// Outcome of matching one rule against one subject.
///
/// `cursor` is the end of the last token that matched, so a failed match
/// still reports how far it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub matches: Vec<TokenMatch>,
    pub cursor: usize,
    pub full: bool,
    pub failure: Option<MatchFailure>,
}

impl RuleMatch {
    /// Placeholder name -> captured value. Literal tokens contribute nothing.
    pub fn captures(&self, rule: &CompiledRule) -> BTreeMap<String, String> {
        let tokens = rule.tokens();
        self.matches
            .iter()
            .filter_map(|m| tokens.get(m.token_index).map(|t| (t, m)))
            .filter(|(t, _)| !t.is_literal())
            .map(|(t, m)| (t.name().to_string(), m.value.clone()))
            .collect()
    }
}

impl CompiledRule {
    /// Match `subject` token by token from the left.
    pub fn match_path(&self, subject: &str) -> RuleMatch {
        let subject = normalize_separators(subject);
        let mut matches = Vec::with_capacity(self.tokens().len());
        let mut cursor = 0;

        if subject.is_empty() {
            return RuleMatch {
                matches,
                cursor,
                full: false,
                failure: Some(MatchFailure::EmptySubject),
            };
        }

        for (index, token) in self.tokens().iter().enumerate() {
            match self.match_token(index, token, &subject, cursor) {
                Ok(end) => {
                    matches.push(TokenMatch {
                        token_index: index,
                        value: subject[cursor..end].to_string(),
                        span: (cursor, end),
                    });
                    cursor = end;
                }
                Err(failure) => {
                    return RuleMatch {
                        matches,
                        cursor,
                        full: false,
                        failure: Some(failure),
                    };
                }
            }
        }

        RuleMatch {
            full: cursor == subject.len(),
            matches,
            cursor,
            failure: None,
        }
    }

    fn match_token(
        &self,
        index: usize,
        token: &Token,
        subject: &str,
        cursor: usize,
    ) -> Result<usize, MatchFailure> {
        let rest = &subject[cursor..];
        if token.is_literal() {
            return if rest.starts_with(token.text.as_str()) {
                Ok(cursor + token.text.len())
            } else {
                Err(MatchFailure::LiteralMismatch {
                    expected: token.text.clone(),
                    at: cursor,
                })
            };
        }

        let Some(terminator) = token.terminator.as_deref() else {
            return Ok(subject.len());
        };
        match rest.find(terminator) {
            Some(idx) => Ok(cursor + idx),
            // A trailing placeholder bounded only by the separator policy
            // may run to the end of the subject.
            None if self.trailing() == TrailingPolicy::StopAtSeparator
                && self.is_trailing_placeholder(index) =>
            {
                Ok(subject.len())
            }
            None => Err(MatchFailure::TerminatorNotFound {
                terminator: terminator.to_string(),
                from: cursor,
            }),
        }
    }
}

/// Match `subject` against every rule independently, in list order.
pub fn match_all<'a, I>(rules: I, subject: &str) -> Vec<RuleMatch>
where
    I: IntoIterator<Item = &'a CompiledRule>,
{
    rules.into_iter().map(|rule| rule.match_path(subject)).collect()
}

/// Pick the winning rule index.
///
/// The first full match wins outright, which is why ignore rules are
/// ordered first. Otherwise the furthest cursor wins, ties going to the
/// earlier rule. `None` if no rule advanced at all.
pub fn select_best(results: &[RuleMatch]) -> Option<usize> {
    let mut best = None;
    let mut furthest = 0;
    for (i, result) in results.iter().enumerate() {
        if result.full {
            return Some(i);
        }
        if result.cursor > furthest {
            furthest = result.cursor;
            best = Some(i);
        }
    }
    best
}

/// Best match of `subject` across `rules`, returned with its index.
///
/// With `only_full`, a partial winner is treated as no match.
pub fn parse_path<'a>(
    subject: &str,
    rules: &'a [CompiledRule],
    only_full: bool,
) -> Option<(usize, RuleMatch)> {
    let mut results = match_all(rules, subject);
    let index = select_best(&results)?;
    let winner = results.swap_remove(index);
    if only_full && !winner.full {
        return None;
    }
    Some((index, winner))
}
