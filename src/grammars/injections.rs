//! Injection selector parsing and matching.
//!
//! Selectors are the small language used by `injectionSelector` and the keys
//! of a grammar's `injections` map, e.g.
//! `L:text.html -comment, R:source.js meta.embedded`. `L:` injections are
//! tried before the host grammar's own patterns, `R:` (and unprefixed) ones
//! after.

use std::sync::LazyLock;

use onig::Regex;

use crate::scope::{scope_pattern_matches, ScopeStack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum InjectionPrecedence {
    /// `L:` prefix, wins over the host grammar's patterns
    Left,
    /// `R:` prefix or none
    Right,
}

/// One alternative of a parsed selector, with its precedence.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InjectionMatcher {
    matcher: SelectorMatcher,
    pub precedence: InjectionPrecedence,
}

impl InjectionMatcher {
    pub(crate) fn matches(&self, scopes: &ScopeStack) -> bool {
        let names = scopes.to_vec();
        self.matcher.matches(&names)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorMatcher {
    /// Consecutive identifiers, e.g. `text.html meta.tag`: each must select
    /// a scope deeper than the previous one's (ordered subsequence)
    Path(Vec<String>),
    /// Space-separated operands must all hold
    And(Vec<SelectorMatcher>),
    /// `,`/`|`-separated alternatives
    Or(Vec<SelectorMatcher>),
    /// `-` prefix
    Not(Box<SelectorMatcher>),
}

impl SelectorMatcher {
    fn matches(&self, scopes: &[String]) -> bool {
        match self {
            SelectorMatcher::Path(identifiers) => {
                let mut from = 0;
                for ident in identifiers {
                    let Some(hit) = scopes[from..]
                        .iter()
                        .position(|s| scope_pattern_matches(s, ident))
                    else {
                        return false;
                    };
                    from += hit + 1;
                }
                true
            }
            SelectorMatcher::And(inner) => inner.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(inner) => inner.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(inner) => !inner.matches(scopes),
        }
    }
}

static TOKEN_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([LR]:|[\w.:]+[\w*.:\-]*|[,|\-()])").ok());

fn tokenize(selector: &str) -> Vec<&str> {
    let Some(regex) = TOKEN_REGEX.as_ref() else {
        return Vec::new();
    };
    regex
        .find_iter(selector)
        .map(|(start, end)| &selector[start..end])
        .collect()
}

fn is_identifier(token: &str) -> bool {
    !token.is_empty()
        && token != "-"
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-' | '*'))
}

fn parse_operand(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    match tokens.get(*position)? {
        &"-" => {
            *position += 1;
            let negated = parse_operand(tokens, position)?;
            Some(SelectorMatcher::Not(Box::new(negated)))
        }
        &"(" => {
            *position += 1;
            let inner = parse_alternatives(tokens, position);
            if tokens.get(*position) == Some(&")") {
                *position += 1;
            }
            Some(inner)
        }
        _ => {
            let mut identifiers = Vec::new();
            while let Some(token) = tokens.get(*position) {
                if !is_identifier(token) {
                    break;
                }
                // `meta.tag.*` selects like its base `meta.tag`
                let ident = match token.find(".*") {
                    Some(pos) => token[..pos].trim_end_matches('.'),
                    None => token,
                };
                identifiers.push(ident.to_string());
                *position += 1;
            }
            if identifiers.is_empty() {
                None
            } else {
                Some(SelectorMatcher::Path(identifiers))
            }
        }
    }
}

fn parse_conjunction(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut matchers = Vec::new();
    while let Some(m) = parse_operand(tokens, position) {
        matchers.push(m);
    }
    match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(SelectorMatcher::And(matchers)),
    }
}

fn parse_alternatives(tokens: &[&str], position: &mut usize) -> SelectorMatcher {
    let mut out = Vec::new();
    while let Some(m) = parse_conjunction(tokens, position) {
        if !out.contains(&m) {
            out.push(m);
        }
        if matches!(tokens.get(*position), Some(&"|") | Some(&",")) {
            *position += 1;
        } else {
            break;
        }
    }
    if out.len() == 1 {
        out.pop().unwrap()
    } else {
        SelectorMatcher::Or(out)
    }
}

/// Parses a full selector string into its comma-separated alternatives, each
/// carrying the `L:`/`R:` precedence that prefixed it.
pub(crate) fn parse_injection_selector(selector: &str) -> Vec<InjectionMatcher> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Vec::new();
    }

    let tokens = tokenize(selector);
    let mut position = 0;
    let mut out = Vec::new();
    let mut precedence = InjectionPrecedence::Right;

    while position < tokens.len() {
        match tokens[position] {
            "L:" => {
                precedence = InjectionPrecedence::Left;
                position += 1;
                continue;
            }
            "R:" => {
                precedence = InjectionPrecedence::Right;
                position += 1;
                continue;
            }
            _ => {}
        }

        match parse_conjunction(&tokens, &mut position) {
            Some(matcher) => {
                out.push(InjectionMatcher { matcher, precedence });
                precedence = InjectionPrecedence::Right;
                if tokens.get(position) == Some(&",") {
                    position += 1;
                } else {
                    break;
                }
            }
            None => break,
        }
    }

    out
}
