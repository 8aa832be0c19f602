//! Template compilation.
//!
//! A template is literal text interleaved with `<name>` placeholders:
//!
//! ```text
//! <year>/<project>_<sample>.csv
//! ^^^^^^ ^^^^^^^^^ ^^^^^^^^
//!   |    |    |    |   |    '.csv'  literal
//!   |    |    |    |   '<sample>'   placeholder, terminator ".csv"
//!   |    |    |    '_'              literal
//!   |    |    '<project>'           placeholder, terminator "_"
//!   |    '/'                        literal
//!   '<year>'                        placeholder, terminator "/"
//! ```
//!
//! Compilation segments the template first, then back-patches each
//! placeholder's terminator from the literal that follows it, so matching
//! never needs lookahead.

use crate::error::{Result, TrawlError};
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new("<[^>]+>").unwrap_or_else(|e| unreachable!("placeholder regex is valid: {e}"))
});

/// Path separator used for logical paths and templates.
pub const PATH_SEPARATOR: &str = "/";

/// How a placeholder with no following literal is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingPolicy {
    /// Capture through the end of the subject.
    ToEnd,
    /// Capture up to the next path separator, so a trailing placeholder
    /// cannot absorb nested directories.
    #[default]
    StopAtSeparator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Literal,
    Placeholder,
}

/// One contiguous segment of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Literal text, or the placeholder including its delimiters.
    pub text: String,
    /// Byte range of this token within the template.
    pub span: (usize, usize),
    /// Literal that bounds a placeholder's capture.
    pub terminator: Option<String>,
}

impl Token {
    pub fn is_literal(&self) -> bool {
        self.kind == TokenKind::Literal
    }

    /// Placeholder name without the angle brackets.
    pub fn name(&self) -> &str {
        self.text.trim_start_matches('<').trim_end_matches('>')
    }
}

/// A template compiled into an ordered token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    template: String,
    tokens: Vec<Token>,
    trailing: TrailingPolicy,
}

impl CompiledRule {
    /// Compile a template. Backslashes are normalised to `/` first.
    pub fn compile(template: &str, trailing: TrailingPolicy) -> Result<Self> {
        let template = normalize_separators(template);
        if template.is_empty() {
            return Err(TrawlError::MalformedRule {
                rule: template,
                offset: 0,
                reason: "empty template".to_string(),
            });
        }

        let mut tokens = Vec::new();
        let mut offset = 0;
        for found in PLACEHOLDER.find_iter(&template) {
            let (start, stop) = (found.start(), found.end());
            if start == offset && start != 0 {
                return Err(TrawlError::MalformedRule {
                    rule: template.clone(),
                    offset: start,
                    reason: format!(
                        "placeholder {} directly follows another placeholder",
                        found.as_str()
                    ),
                });
            }
            if start != offset {
                tokens.push(Token {
                    kind: TokenKind::Literal,
                    text: template[offset..start].to_string(),
                    span: (offset, start),
                    terminator: None,
                });
            }
            tokens.push(Token {
                kind: TokenKind::Placeholder,
                text: found.as_str().to_string(),
                span: (start, stop),
                terminator: None,
            });
            offset = stop;
        }
        if offset != template.len() {
            tokens.push(Token {
                kind: TokenKind::Literal,
                text: template[offset..].to_string(),
                span: (offset, template.len()),
                terminator: None,
            });
        }

        for i in 1..tokens.len() {
            if tokens[i].is_literal() && !tokens[i - 1].is_literal() {
                let text = tokens[i].text.clone();
                tokens[i - 1].terminator = Some(text);
            }
        }

        if trailing == TrailingPolicy::StopAtSeparator {
            if let Some(last) = tokens.last_mut() {
                if !last.is_literal() {
                    last.terminator = Some(PATH_SEPARATOR.to_string());
                }
            }
        }

        Ok(Self {
            template,
            tokens,
            trailing,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn trailing(&self) -> TrailingPolicy {
        self.trailing
    }

    /// Placeholder names in template order.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.tokens
            .iter()
            .filter(|t| !t.is_literal())
            .map(|t| t.name())
    }

    /// Whether `index` is the last token and a placeholder.
    pub(crate) fn is_trailing_placeholder(&self, index: usize) -> bool {
        index + 1 == self.tokens.len() && !self.tokens[index].is_literal()
    }
}

/// Replace Windows separators with `/`.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', PATH_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(rule: &CompiledRule) -> Vec<(TokenKind, &str, Option<&str>)> {
        rule.tokens()
            .iter()
            .map(|t| (t.kind, t.text.as_str(), t.terminator.as_deref()))
            .collect()
    }

    #[test]
    fn segments_literals_and_placeholders() {
        let rule = CompiledRule::compile("<year>/<project>_<sample>.csv", TrailingPolicy::ToEnd)
            .unwrap();
        assert_eq!(
            kinds(&rule),
            vec![
                (TokenKind::Placeholder, "<year>", Some("/")),
                (TokenKind::Literal, "/", None),
                (TokenKind::Placeholder, "<project>", Some("_")),
                (TokenKind::Literal, "_", None),
                (TokenKind::Placeholder, "<sample>", Some(".csv")),
                (TokenKind::Literal, ".csv", None),
            ]
        );
    }

    #[test]
    fn tokens_partition_the_template() {
        let template = "data/<a>-<b>.<ext>";
        let rule = CompiledRule::compile(template, TrailingPolicy::ToEnd).unwrap();
        let mut cursor = 0;
        for token in rule.tokens() {
            assert_eq!(token.span.0, cursor);
            assert_eq!(&template[token.span.0..token.span.1], token.text);
            cursor = token.span.1;
        }
        assert_eq!(cursor, template.len());
    }

    #[test]
    fn adjacent_placeholders_are_rejected() {
        let err = CompiledRule::compile("<a><b>", TrailingPolicy::ToEnd).unwrap_err();
        match err {
            TrawlError::MalformedRule { offset, .. } => assert_eq!(offset, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn leading_placeholder_is_allowed() {
        let rule = CompiledRule::compile("<a>.txt", TrailingPolicy::ToEnd).unwrap();
        assert_eq!(rule.tokens().len(), 2);
    }

    #[test]
    fn empty_template_is_rejected() {
        assert!(matches!(
            CompiledRule::compile("", TrailingPolicy::ToEnd),
            Err(TrawlError::MalformedRule { .. })
        ));
    }

    #[test]
    fn trailing_placeholder_policy() {
        let open = CompiledRule::compile("logs/<name>", TrailingPolicy::ToEnd).unwrap();
        assert_eq!(open.tokens()[1].terminator, None);

        let strict = CompiledRule::compile("logs/<name>", TrailingPolicy::StopAtSeparator).unwrap();
        assert_eq!(strict.tokens()[1].terminator.as_deref(), Some("/"));
    }

    #[test]
    fn backslashes_are_normalised() {
        let rule = CompiledRule::compile(r"R:\<client>\<project>", TrailingPolicy::ToEnd).unwrap();
        assert_eq!(rule.template(), "R:/<client>/<project>");
        assert_eq!(
            rule.placeholder_names().collect::<Vec<_>>(),
            vec!["client", "project"]
        );
    }

    #[test]
    fn literal_only_template() {
        let rule = CompiledRule::compile("README.md", TrailingPolicy::ToEnd).unwrap();
        assert_eq!(rule.tokens().len(), 1);
        assert!(rule.tokens()[0].is_literal());
    }

    #[test]
    fn unicode_placeholder_names() {
        let rule = CompiledRule::compile("<дата>_<проект>", TrailingPolicy::ToEnd).unwrap();
        assert_eq!(
            rule.placeholder_names().collect::<Vec<_>>(),
            vec!["дата", "проект"]
        );
    }
}
