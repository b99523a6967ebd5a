//! Compilation of raw grammars into a flat rule arena.
//!
//! Rules live in one `Vec<Rule>` per grammar and reference each other by
//! [`RuleId`]. Repository entries are compiled at most once: when an entry is
//! first needed its arena slot is reserved *before* its body is compiled, so
//! include cycles (`#foo` → `#bar` → `#foo`) terminate by reusing the
//! reserved id. Unresolvable includes degrade to a "missing patterns" flag
//! and a warning instead of failing the grammar.

use std::collections::HashMap;
use std::ops::Deref;

use log::warn;

use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::oniguruma::{MatchRanges, OnigString};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct RuleId(pub u32);

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The root rule of every compiled grammar.
pub(crate) const ROOT_RULE: RuleId = RuleId(0);

/// An uncompiled regex plus the two facts the scanner layer needs before
/// compiling it: whether it carries `\A`/`\G` (anchored variants differ) and
/// whether it carries back-references (must be resolved against the begin
/// match before compiling).
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct RegexSource {
    pattern: String,
    pub has_anchor: bool,
    pub has_backrefs: bool,
}

impl RegexSource {
    pub(crate) fn new(pattern: String) -> Self {
        let has_anchor = pattern.contains("\\A") || pattern.contains("\\G");
        let has_backrefs = (1..=9).any(|i| pattern.contains(&format!("\\{i}")));
        Self { pattern, has_anchor, has_backrefs }
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// A pattern-list entry: either a rule in this grammar's arena or a symbolic
/// reference resolved at scan time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum PatternRef {
    Rule(RuleId),
    /// `$self`: the current grammar's root
    SelfRef,
    /// `$base`: the root of the grammar the tokenization started in
    Base,
    /// `source.other`: another grammar's root
    Grammar(String),
    /// `source.other#entry`: a named entry of another grammar's repository
    GrammarRule(String, String),
}

#[derive(Debug, Clone)]
pub(crate) struct MatchRule {
    pub name: Option<String>,
    pub pattern: RegexSource,
    pub captures: Vec<Option<RuleId>>,
}

#[derive(Debug, Clone)]
pub(crate) struct BeginEndRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: RegexSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexSource,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<PatternRef>,
    pub has_missing_patterns: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BeginWhileRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: RegexSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexSource,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<PatternRef>,
    pub has_missing_patterns: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct IncludeOnlyRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub patterns: Vec<PatternRef>,
    pub has_missing_patterns: bool,
}

/// A capture group's rule. When the raw capture carried nested `patterns`,
/// the captured substring is re-tokenized with `retokenize_with`.
#[derive(Debug, Clone)]
pub(crate) struct CaptureRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub retokenize_with: Option<RuleId>,
}

#[derive(Debug, Clone)]
pub(crate) enum Rule {
    Match(MatchRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    IncludeOnly(IncludeOnlyRule),
    Capture(CaptureRule),
    /// Slot reserved while the rule's body is being compiled. Must not
    /// survive compilation; the tokenizer treats it as an empty container.
    Reserved,
}

impl Rule {
    pub(crate) fn patterns(&self) -> &[PatternRef] {
        match self {
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::Match(_) | Rule::Capture(_) | Rule::Reserved => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledGrammar {
    pub scope_name: String,
    pub name: Option<String>,
    pub file_types: Vec<String>,
    pub first_line_match: Option<String>,
    pub rules: Vec<Rule>,
    /// Top-level repository, addressable from other grammars via
    /// `scope#entry` includes
    pub repository: HashMap<String, RuleId>,
    /// This grammar's own `injections` map: selector source → rule
    pub injections: Vec<(String, RuleId)>,
    pub injection_selector: Option<String>,
    pub inject_to: Vec<String>,
}

impl CompiledGrammar {
    pub(crate) fn compile(raw: RawGrammar) -> Self {
        let mut compiler = Compiler::default();

        let top_frame: HashMap<String, usize> = raw
            .repository
            .into_iter()
            .map(|(name, entry)| {
                compiler.entries.push(RepoEntry { raw: entry.into_rule(), id: None });
                (name, compiler.entries.len() - 1)
            })
            .collect();
        compiler.frames.push(top_frame.clone());

        let root = RawRule {
            patterns: Some(raw.patterns),
            ..RawRule::default()
        };
        let root_id = compiler.compile_rule(root);
        debug_assert_eq!(root_id, ROOT_RULE);

        // compile every named entry so `scope#entry` includes from other
        // grammars can address them; sorted for deterministic rule ids
        let mut names: Vec<&String> = top_frame.keys().collect();
        names.sort();
        let indices: Vec<usize> = names.iter().map(|n| top_frame[n.as_str()]).collect();
        for idx in indices {
            compiler.ensure_entry(idx);
        }

        let mut raw_injections: Vec<(String, RawRule)> = raw.injections.into_iter().collect();
        raw_injections.sort_by(|a, b| a.0.cmp(&b.0));
        let injections = raw_injections
            .into_iter()
            .map(|(selector, rule)| (selector, compiler.compile_rule(rule)))
            .collect();

        let repository = top_frame
            .into_iter()
            .filter_map(|(name, idx)| Some((name, compiler.entries[idx].id?)))
            .collect();

        Self {
            scope_name: raw.scope_name,
            name: raw.name,
            file_types: raw.file_types,
            first_line_match: raw.first_line_match,
            rules: compiler.rules,
            repository,
            injections,
            injection_selector: raw.injection_selector,
            inject_to: raw.inject_to,
        }
    }

    pub(crate) fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[*id as usize]
    }
}

struct RepoEntry {
    raw: RawRule,
    id: Option<RuleId>,
}

#[derive(Default)]
struct Compiler {
    rules: Vec<Rule>,
    entries: Vec<RepoEntry>,
    /// Repository scoping frames, innermost last. Maps entry name to its
    /// index in `entries`.
    frames: Vec<HashMap<String, usize>>,
}

impl Compiler {
    fn reserve(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule::Reserved);
        id
    }

    fn compile_rule(&mut self, raw: RawRule) -> RuleId {
        let id = self.reserve();
        self.fill_rule(id, raw);
        id
    }

    /// Compiles a repository entry, reserving its id before recursing into
    /// its body so cyclic includes resolve to the reserved id.
    fn ensure_entry(&mut self, idx: usize) -> RuleId {
        if let Some(id) = self.entries[idx].id {
            return id;
        }
        let id = self.reserve();
        self.entries[idx].id = Some(id);
        let raw = self.entries[idx].raw.clone();
        self.fill_rule(id, raw);
        id
    }

    fn fill_rule(&mut self, id: RuleId, raw: RawRule) {
        let pushed_frame = match raw.repository {
            Some(repo) if !repo.is_empty() => {
                let frame = repo
                    .into_iter()
                    .map(|(name, entry)| {
                        self.entries.push(RepoEntry { raw: entry.into_rule(), id: None });
                        (name, self.entries.len() - 1)
                    })
                    .collect();
                self.frames.push(frame);
                true
            }
            _ => false,
        };

        let rule = if let Some(pattern) = raw.match_ {
            Rule::Match(MatchRule {
                name: raw.name,
                pattern: RegexSource::new(pattern),
                captures: self.compile_captures(raw.captures),
            })
        } else if let Some(begin) = raw.begin {
            let begin_captures = raw.begin_captures.or_else(|| raw.captures.clone());
            if let Some(while_) = raw.while_ {
                let (patterns, has_missing_patterns) =
                    self.compile_patterns(raw.patterns.unwrap_or_default());
                Rule::BeginWhile(BeginWhileRule {
                    name: raw.name,
                    content_name: raw.content_name,
                    begin: RegexSource::new(begin),
                    begin_captures: self.compile_captures(begin_captures),
                    while_: RegexSource::new(while_),
                    while_captures: self
                        .compile_captures(raw.while_captures.or(raw.captures)),
                    patterns,
                    has_missing_patterns,
                })
            } else if let Some(end) = raw.end {
                let (patterns, has_missing_patterns) =
                    self.compile_patterns(raw.patterns.unwrap_or_default());
                Rule::BeginEnd(BeginEndRule {
                    name: raw.name,
                    content_name: raw.content_name,
                    begin: RegexSource::new(begin),
                    begin_captures: self.compile_captures(begin_captures),
                    end: RegexSource::new(end),
                    end_captures: self.compile_captures(raw.end_captures.or(raw.captures)),
                    apply_end_pattern_last: raw.apply_end_pattern_last.unwrap_or(false),
                    patterns,
                    has_missing_patterns,
                })
            } else {
                // begin without end or while is almost certainly a typo for
                // match; treat it as one
                Rule::Match(MatchRule {
                    name: raw.name,
                    pattern: RegexSource::new(begin),
                    captures: self.compile_captures(begin_captures),
                })
            }
        } else {
            // a lone include is equivalent to a one-entry pattern list, but
            // explicit patterns win when both are present
            let patterns = match raw.patterns {
                Some(patterns) if !patterns.is_empty() => patterns,
                _ => match raw.include {
                    Some(include) => vec![RawRule {
                        include: Some(include),
                        ..RawRule::default()
                    }],
                    None => Vec::new(),
                },
            };
            let (patterns, has_missing_patterns) = self.compile_patterns(patterns);
            Rule::IncludeOnly(IncludeOnlyRule {
                name: raw.name,
                content_name: raw.content_name,
                patterns,
                has_missing_patterns,
            })
        };

        if pushed_frame {
            self.frames.pop();
        }
        self.rules[*id as usize] = rule;
    }

    fn compile_patterns(&mut self, raw_patterns: Vec<RawRule>) -> (Vec<PatternRef>, bool) {
        let mut out = Vec::with_capacity(raw_patterns.len());
        let mut has_missing = false;

        for raw in raw_patterns {
            if let Some(include) = raw.include {
                match self.resolve_include(&include) {
                    Some(pattern_ref) => out.push(pattern_ref),
                    None => {
                        warn!("dropping unresolvable include {include:?}");
                        has_missing = true;
                    }
                }
            } else {
                out.push(PatternRef::Rule(self.compile_rule(raw)));
            }
        }

        (out, has_missing)
    }

    fn resolve_include(&mut self, include: &str) -> Option<PatternRef> {
        match include {
            "$self" => Some(PatternRef::SelfRef),
            "$base" => Some(PatternRef::Base),
            _ => {
                if let Some(name) = include.strip_prefix('#') {
                    let idx = self
                        .frames
                        .iter()
                        .rev()
                        .find_map(|frame| frame.get(name).copied())?;
                    Some(PatternRef::Rule(self.ensure_entry(idx)))
                } else if let Some((scope, entry)) = include.split_once('#') {
                    Some(PatternRef::GrammarRule(scope.to_string(), entry.to_string()))
                } else {
                    Some(PatternRef::Grammar(include.to_string()))
                }
            }
        }
    }

    fn compile_captures(&mut self, captures: Option<RawCaptures>) -> Vec<Option<RuleId>> {
        let Some(captures) = captures else {
            return Vec::new();
        };
        let Some(max) = captures.0.keys().max().copied() else {
            return Vec::new();
        };

        let mut out: Vec<Option<RuleId>> = vec![None; max as usize + 1];
        for (group, raw) in captures.0 {
            let retokenize_with = match &raw.patterns {
                Some(patterns) if !patterns.is_empty() => Some(self.compile_rule(raw.clone())),
                _ => None,
            };
            let id = self.reserve();
            self.rules[*id as usize] = Rule::Capture(CaptureRule {
                name: raw.name,
                content_name: raw.content_name,
                retokenize_with,
            });
            out[group as usize] = Some(id);
        }
        out
    }
}

/// Substitutes `$n`, `${n}`, `${n:/downcase}` and `${n:/upcase}` in a scope
/// name with the corresponding captured text.
pub(crate) fn replace_captures(template: &str, line: &OnigString, ranges: &MatchRanges) -> String {
    if !template.contains('$') {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        rest = &rest[dollar..];

        let (group, transform, consumed) = match parse_capture_ref(rest) {
            Some(parsed) => parsed,
            None => {
                out.push('$');
                rest = &rest[1..];
                continue;
            }
        };

        let captured = ranges
            .group(group)
            .map(|span| line.slice(span.start, span.end))
            .unwrap_or("");
        match transform {
            Some(CaseTransform::Downcase) => out.push_str(&captured.to_lowercase()),
            Some(CaseTransform::Upcase) => out.push_str(&captured.to_uppercase()),
            None => out.push_str(captured),
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

enum CaseTransform {
    Downcase,
    Upcase,
}

/// Parses `$n`, `${n}` or `${n:/downcase|upcase}` at the start of `s`,
/// returning the group number, transform and consumed byte count.
fn parse_capture_ref(s: &str) -> Option<(usize, Option<CaseTransform>, usize)> {
    let body = s.strip_prefix('$')?;
    if let Some(braced) = body.strip_prefix('{') {
        let close = braced.find('}')?;
        let inner = &braced[..close];
        let consumed = 1 + 1 + close + 1; // $  {  inner  }
        let (digits, transform) = match inner.split_once(":/") {
            Some((digits, "downcase")) => (digits, Some(CaseTransform::Downcase)),
            Some((digits, "upcase")) => (digits, Some(CaseTransform::Upcase)),
            Some(_) => return None,
            None => (inner, None),
        };
        let group = digits.parse::<usize>().ok()?;
        Some((group, transform, consumed))
    } else {
        let digits_len = body.bytes().take_while(u8::is_ascii_digit).count();
        if digits_len == 0 {
            return None;
        }
        let group = body[..digits_len].parse::<usize>().ok()?;
        Some((group, None, 1 + digits_len))
    }
}

/// Substitutes `\1`..`\9` in a dynamic end/while pattern with the text
/// captured by the begin match, regex-escaped.
pub(crate) fn resolve_backrefs(pattern: &str, line: &OnigString, ranges: &MatchRanges) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(d) = chars.peek().copied()
            && d.is_ascii_digit()
        {
            chars.next();
            let group = d.to_digit(10).unwrap() as usize;
            if let Some(span) = ranges.group(group) {
                escape_regex_into(line.slice(span.start, span.end), &mut out);
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn escape_regex_into(text: &str, out: &mut String) {
    for c in text.chars() {
        if c.is_whitespace()
            || matches!(
                c,
                '-' | '\\' | '{' | '}' | '*' | '+' | '?' | '|' | '^' | '$' | '.' | ','
                    | '[' | ']' | '(' | ')' | '#'
            )
        {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::raw::RawGrammar;
    use crate::oniguruma::OnigRegExp;

    fn compile(json: &str) -> CompiledGrammar {
        CompiledGrammar::compile(RawGrammar::parse(json).unwrap())
    }

    #[test]
    fn cyclic_includes_terminate_and_share_ids() {
        let grammar = compile(
            r##"{
                "scopeName": "source.cycle",
                "patterns": [{ "include": "#foo" }],
                "repository": {
                    "foo": { "begin": "f", "end": "F", "patterns": [{ "include": "#bar" }] },
                    "bar": { "begin": "b", "end": "B", "patterns": [{ "include": "#foo" }] }
                }
            }"##,
        );

        let foo = grammar.repository["foo"];
        let bar = grammar.repository["bar"];
        let Rule::BeginEnd(foo_rule) = grammar.rule(foo) else {
            panic!("foo should be begin/end");
        };
        let Rule::BeginEnd(bar_rule) = grammar.rule(bar) else {
            panic!("bar should be begin/end");
        };
        assert_eq!(foo_rule.patterns, vec![PatternRef::Rule(bar)]);
        assert_eq!(bar_rule.patterns, vec![PatternRef::Rule(foo)]);
        assert!(!grammar.rules.iter().any(|r| matches!(r, Rule::Reserved)));
    }

    #[test]
    fn include_kinds() {
        let grammar = compile(
            r##"{
                "scopeName": "source.inc",
                "patterns": [
                    { "include": "$self" },
                    { "include": "$base" },
                    { "include": "source.other" },
                    { "include": "source.other#entry" },
                    { "include": "#gone" }
                ]
            }"##,
        );
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE) else {
            panic!("root should be include-only");
        };
        assert_eq!(
            root.patterns,
            vec![
                PatternRef::SelfRef,
                PatternRef::Base,
                PatternRef::Grammar("source.other".to_string()),
                PatternRef::GrammarRule("source.other".to_string(), "entry".to_string()),
            ]
        );
        assert!(root.has_missing_patterns);
    }

    #[test]
    fn captures_with_patterns_get_a_retokenize_rule() {
        let grammar = compile(
            r##"{
                "scopeName": "source.caps",
                "patterns": [{
                    "match": "(\\w+)",
                    "captures": {
                        "1": { "name": "inner", "patterns": [{ "match": "x", "name": "x" }] }
                    }
                }]
            }"##,
        );
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE) else {
            panic!();
        };
        let PatternRef::Rule(match_id) = root.patterns[0] else {
            panic!();
        };
        let Rule::Match(m) = grammar.rule(match_id) else {
            panic!();
        };
        let Rule::Capture(cap) = grammar.rule(m.captures[1].unwrap()) else {
            panic!("capture 1 should be a capture rule");
        };
        assert_eq!(cap.name.as_deref(), Some("inner"));
        assert!(cap.retokenize_with.is_some());
    }

    #[test]
    fn local_repository_shadows_outer() {
        let grammar = compile(
            r##"{
                "scopeName": "source.shadow",
                "patterns": [{
                    "begin": "a", "end": "z",
                    "repository": { "x": { "match": "inner" } },
                    "patterns": [{ "include": "#x" }]
                }],
                "repository": { "x": { "match": "outer" } }
            }"##,
        );
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE) else {
            panic!();
        };
        let PatternRef::Rule(be_id) = root.patterns[0] else {
            panic!();
        };
        let Rule::BeginEnd(be) = grammar.rule(be_id) else {
            panic!();
        };
        let PatternRef::Rule(x_id) = be.patterns[0] else {
            panic!();
        };
        let Rule::Match(x) = grammar.rule(x_id) else {
            panic!();
        };
        assert_eq!(x.pattern.pattern(), "inner");
    }

    #[test]
    fn repository_cannot_shadow_self_and_base() {
        let grammar = compile(
            r##"{
                "scopeName": "source.builtin",
                "patterns": [{ "include": "$self" }, { "include": "$base" }],
                "repository": {
                    "$self": { "match": "bogus" },
                    "$base": { "match": "bogus" }
                }
            }"##,
        );
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE) else {
            panic!();
        };
        assert_eq!(root.patterns, vec![PatternRef::SelfRef, PatternRef::Base]);
        assert!(!root.has_missing_patterns);
    }

    #[test]
    fn capture_substitution() {
        let line = OnigString::new("Foo Bar".to_string());
        let re = OnigRegExp::new(r"(\w+) (\w+)").unwrap();
        let ranges = re.search(&line, 0).unwrap();
        assert_eq!(replace_captures("a.$1.b", &line, &ranges), "a.Foo.b");
        assert_eq!(replace_captures("${2:/downcase}", &line, &ranges), "bar");
        assert_eq!(replace_captures("${1:/upcase}", &line, &ranges), "FOO");
        assert_eq!(replace_captures("$9", &line, &ranges), "");
        assert_eq!(replace_captures("price$", &line, &ranges), "price$");
    }

    #[test]
    fn backref_resolution_escapes_captured_text() {
        let line = OnigString::new("q(x)q".to_string());
        let re = OnigRegExp::new(r"q(\(x\))").unwrap();
        let ranges = re.search(&line, 0).unwrap();
        assert_eq!(resolve_backrefs(r"\1end", &line, &ranges), r"\(x\)end");
        assert_eq!(resolve_backrefs(r"\2end", &line, &ranges), "end");
    }

    #[test]
    fn regex_source_flags() {
        assert!(RegexSource::new(r"\Gfoo".to_string()).has_anchor);
        assert!(RegexSource::new(r"\Afoo".to_string()).has_anchor);
        assert!(!RegexSource::new("foo".to_string()).has_anchor);
        assert!(RegexSource::new(r"x\1".to_string()).has_backrefs);
        assert!(!RegexSource::new("x".to_string()).has_backrefs);
    }
}
