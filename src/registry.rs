//! The registry: owns compiled grammars and themes, resolves cross-grammar
//! references, and hands out [`Grammar`] handles for tokenization.
//!
//! Grammars arrive through a caller-supplied [`GrammarSource`]. Registering a
//! scope walks its cross-grammar includes breadth-first and compiles every
//! reachable grammar; scopes the source cannot provide are tolerated (their
//! includes simply never match). Scanner construction is the expensive part
//! of tokenization, so compiled pattern sets are memoized in a concurrent
//! map keyed by rule and anchor variant.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::{Error, TintaResult};
use crate::grammars::injections::parse_injection_selector;
use crate::grammars::{
    CompiledGrammar, InjectionMatcher, PatternRef, RawGrammar, Rule, RuleId, ROOT_RULE,
};
use crate::oniguruma::{AnchorActive, MatchRanges, OnigRegExp, OnigScanner, OnigString};
use crate::themes::{ColorMap, Theme};
use crate::tokenizer::attrs::{StandardTokenType, TokenTypeMatcher};
use crate::tokenizer::stack::{RuleHandle, StateStack};
use crate::tokenizer::{TokenizeLine2Result, TokenizeLineResult, Tokenizer};

/// Where a grammar's content comes from. The registry never touches the
/// filesystem itself.
pub trait GrammarSource {
    /// The raw grammar document (JSON, YAML or PList-XML) for a scope name,
    /// or `None` if the source does not know it.
    fn load(&self, scope_name: &str) -> Option<String>;

    /// Scope names of additional grammars that should be injected into
    /// `scope_name`, beyond what `injectTo` declarations already wire up.
    fn injections(&self, scope_name: &str) -> Option<Vec<String>> {
        let _ = scope_name;
        None
    }
}

/// Per-grammar registration options for the packed tokenization path.
#[derive(Debug, Clone, Default)]
pub struct GrammarConfiguration {
    /// Encoded into bits 0-7 of every token's metadata
    pub language_id: u32,
    /// Scope selector → standard token type overrides
    pub token_types: HashMap<String, StandardTokenType>,
}

/// An injection wired into a host grammar: who matches and what to scan.
pub(crate) struct LinkedInjection {
    pub matchers: Vec<InjectionMatcher>,
    pub rule: RuleHandle,
}

/// What a pattern-set entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchTarget {
    /// The enclosing rule's own end (or while) pattern
    End,
    Rule(RuleHandle),
}

/// A compiled scanner plus, per pattern, the rule it belongs to.
pub(crate) struct PatternSet {
    targets: Vec<MatchTarget>,
    scanner: OnigScanner,
}

impl PatternSet {
    pub(crate) fn find_next_match(
        &self,
        line: &OnigString,
        start_char: usize,
    ) -> Option<(MatchTarget, MatchRanges)> {
        let m = self.scanner.find_next_match(line, start_char)?;
        Some((self.targets[m.index], m.ranges))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScannerKey {
    base: usize,
    grammar: usize,
    rule: RuleId,
    anchor: AnchorActive,
    while_only: bool,
}

struct GrammarEntry {
    grammar: CompiledGrammar,
    language_id: u32,
    token_types: TokenTypeMatcher,
    /// Scope names the source declared as injected into this grammar
    extra_injection_scopes: Vec<String>,
    injections: Vec<LinkedInjection>,
}

/// The front object of the crate.
#[derive(Default)]
pub struct Registry {
    grammars: Vec<GrammarEntry>,
    by_scope: HashMap<String, usize>,
    themes: HashMap<String, Theme>,
    active_theme: Option<String>,
    scanners: papaya::HashMap<ScannerKey, Arc<PatternSet>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `scope_name` and everything it transitively includes.
    ///
    /// Only the root scope is required to exist: a referenced grammar the
    /// source cannot provide is logged and skipped, and its includes never
    /// match. Re-registering a known scope only updates its configuration.
    pub fn add_grammar(
        &mut self,
        source: &dyn GrammarSource,
        scope_name: &str,
        configuration: Option<GrammarConfiguration>,
    ) -> TintaResult<()> {
        if !self.by_scope.contains_key(scope_name) {
            let content = source
                .load(scope_name)
                .ok_or_else(|| Error::UnresolvableScope(scope_name.to_string()))?;
            let raw = RawGrammar::parse(&content)?;
            let compiled = CompiledGrammar::compile(raw);

            let mut queue: VecDeque<String> = VecDeque::new();
            let mut seen: HashSet<String> = HashSet::new();
            seen.insert(scope_name.to_string());
            self.insert_grammar(source, compiled, &mut queue, &mut seen);

            while let Some(scope) = queue.pop_front() {
                if self.by_scope.contains_key(&scope) {
                    continue;
                }
                let Some(content) = source.load(&scope) else {
                    warn!("referenced grammar {scope:?} is not available");
                    continue;
                };
                let compiled = match RawGrammar::parse(&content) {
                    Ok(raw) => CompiledGrammar::compile(raw),
                    Err(err) => {
                        warn!("referenced grammar {scope:?} failed to parse: {err}");
                        continue;
                    }
                };
                self.insert_grammar(source, compiled, &mut queue, &mut seen);
            }
        }

        if let Some(configuration) = configuration {
            let idx = self.by_scope[scope_name];
            self.grammars[idx].language_id = configuration.language_id;
            self.grammars[idx].token_types = TokenTypeMatcher::new(&configuration.token_types);
        }

        self.link();
        Ok(())
    }

    /// A handle for tokenizing with a registered grammar.
    pub fn grammar(&self, scope_name: &str) -> TintaResult<Grammar<'_>> {
        match self.by_scope.get(scope_name) {
            Some(&index) => Ok(Grammar { registry: self, index }),
            None => Err(Error::GrammarNotFound(scope_name.to_string())),
        }
    }

    /// Looks a grammar up by one of its declared `fileTypes` entries, e.g.
    /// an extension like `"rs"`.
    pub fn grammar_for_file_type(&self, file_type: &str) -> Option<Grammar<'_>> {
        self.grammars
            .iter()
            .position(|e| e.grammar.file_types.iter().any(|t| t == file_type))
            .map(|index| Grammar { registry: self, index })
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.grammars.iter().map(|e| e.grammar.scope_name.as_str())
    }

    /// Adds a theme, keyed by its name.
    pub fn add_theme(&mut self, theme: Theme) -> &mut Self {
        let name = theme.name().unwrap_or("default").to_string();
        if self.active_theme.is_none() {
            self.active_theme = Some(name.clone());
        }
        self.themes.insert(name, theme);
        self
    }

    /// Makes a previously added theme the one `tokenize_line2` resolves
    /// colors against.
    pub fn set_theme(&mut self, name: &str) -> TintaResult<()> {
        if !self.themes.contains_key(name) {
            return Err(Error::ThemeNotFound(name.to_string()));
        }
        self.active_theme = Some(name.to_string());
        Ok(())
    }

    pub fn theme(&self) -> Option<&Theme> {
        self.themes.get(self.active_theme.as_deref()?)
    }

    /// The active theme's color table; metadata color ids index into it.
    pub fn color_map(&self) -> Option<&ColorMap> {
        self.theme().map(Theme::color_map)
    }

    fn insert_grammar(
        &mut self,
        source: &dyn GrammarSource,
        compiled: CompiledGrammar,
        queue: &mut VecDeque<String>,
        seen: &mut HashSet<String>,
    ) {
        for scope in referenced_scopes(&compiled) {
            if seen.insert(scope.clone()) {
                queue.push_back(scope);
            }
        }

        let extra = source
            .injections(&compiled.scope_name)
            .unwrap_or_default();
        for scope in &extra {
            if seen.insert(scope.clone()) {
                queue.push_back(scope.clone());
            }
        }

        let index = self.grammars.len();
        self.by_scope.insert(compiled.scope_name.clone(), index);
        self.grammars.push(GrammarEntry {
            grammar: compiled,
            language_id: 0,
            token_types: TokenTypeMatcher::default(),
            extra_injection_scopes: extra,
            injections: Vec::new(),
        });
    }

    /// Rewires every grammar's injection list. Run after each registration:
    /// a newly added grammar can inject into (or satisfy includes of) any
    /// grammar already present.
    fn link(&mut self) {
        for idx in 0..self.grammars.len() {
            let host_scope = self.grammars[idx].grammar.scope_name.clone();
            let mut injections: Vec<LinkedInjection> = Vec::new();

            for (selector, rule) in &self.grammars[idx].grammar.injections {
                injections.push(LinkedInjection {
                    matchers: parse_injection_selector(selector),
                    rule: RuleHandle { grammar: idx, rule: *rule },
                });
            }

            let mut external: Vec<usize> = (0..self.grammars.len())
                .filter(|&other| {
                    other != idx
                        && (self.grammars[other].grammar.inject_to.contains(&host_scope)
                            || self.grammars[idx]
                                .extra_injection_scopes
                                .contains(&self.grammars[other].grammar.scope_name))
                })
                .collect();
            external.sort_by(|&a, &b| {
                self.grammars[a]
                    .grammar
                    .scope_name
                    .cmp(&self.grammars[b].grammar.scope_name)
            });
            for other in external {
                match &self.grammars[other].grammar.injection_selector {
                    Some(selector) => injections.push(LinkedInjection {
                        matchers: parse_injection_selector(selector),
                        rule: RuleHandle { grammar: other, rule: ROOT_RULE },
                    }),
                    None => warn!(
                        "grammar {:?} injects into {host_scope:?} without an injectionSelector",
                        self.grammars[other].grammar.scope_name
                    ),
                }
            }

            self.grammars[idx].injections = injections;
        }

        // cached scanners may have been built while an include's target
        // grammar was still missing
        self.scanners.pin().clear();
    }

    pub(crate) fn compiled(&self, index: usize) -> &CompiledGrammar {
        &self.grammars[index].grammar
    }

    pub(crate) fn rule(&self, handle: RuleHandle) -> &Rule {
        self.grammars[handle.grammar].grammar.rule(handle.rule)
    }

    pub(crate) fn injections(&self, index: usize) -> &[LinkedInjection] {
        &self.grammars[index].injections
    }

    pub(crate) fn language_id(&self, index: usize) -> u32 {
        self.grammars[index].language_id
    }

    pub(crate) fn token_types(&self, index: usize) -> &TokenTypeMatcher {
        &self.grammars[index].token_types
    }

    /// The scanner for a rule's body patterns, with the rule's own end
    /// pattern spliced in for begin/end rules. Static sets are memoized per
    /// anchor variant; a dynamic end (resolved back-references) forces a
    /// fresh build because its text depends on the begin match.
    pub(crate) fn pattern_set(
        &self,
        base: usize,
        handle: RuleHandle,
        dynamic_end: Option<&str>,
        anchor: AnchorActive,
    ) -> Arc<PatternSet> {
        if dynamic_end.is_none() {
            let key = ScannerKey {
                base,
                grammar: handle.grammar,
                rule: handle.rule,
                anchor,
                while_only: false,
            };
            let scanners = self.scanners.pin();
            if let Some(set) = scanners.get(&key) {
                return set.clone();
            }
            let set = Arc::new(self.build_pattern_set(base, handle, None, anchor));
            scanners.insert(key, set.clone());
            return set;
        }
        Arc::new(self.build_pattern_set(base, handle, dynamic_end, anchor))
    }

    /// The single-pattern scanner used to re-validate a begin/while rule at
    /// the start of a line.
    pub(crate) fn while_pattern_set(
        &self,
        base: usize,
        handle: RuleHandle,
        dynamic_while: Option<&str>,
        anchor: AnchorActive,
    ) -> Arc<PatternSet> {
        let build = |pattern: &str| {
            let anchored = anchor.replace_anchors(pattern);
            Arc::new(PatternSet {
                targets: vec![MatchTarget::End],
                scanner: OnigScanner::new(&[anchored.as_ref()]),
            })
        };

        if let Some(pattern) = dynamic_while {
            return build(pattern);
        }

        let key = ScannerKey {
            base,
            grammar: handle.grammar,
            rule: handle.rule,
            anchor,
            while_only: true,
        };
        let scanners = self.scanners.pin();
        if let Some(set) = scanners.get(&key) {
            return set.clone();
        }
        let pattern = match self.rule(handle) {
            Rule::BeginWhile(rule) => rule.while_.pattern().to_string(),
            _ => String::new(),
        };
        let set = build(&pattern);
        scanners.insert(key, set.clone());
        set
    }

    fn build_pattern_set(
        &self,
        base: usize,
        handle: RuleHandle,
        dynamic_end: Option<&str>,
        anchor: AnchorActive,
    ) -> PatternSet {
        let mut targets = Vec::new();
        let mut patterns: Vec<String> = Vec::new();
        let mut visited: HashSet<RuleHandle> = HashSet::new();
        visited.insert(handle);

        let rule = self.rule(handle);
        self.collect_refs(
            base,
            handle.grammar,
            rule.patterns(),
            &mut targets,
            &mut patterns,
            &mut visited,
        );

        if let Rule::BeginEnd(rule) = rule {
            let end = dynamic_end.unwrap_or(rule.end.pattern()).to_string();
            if rule.apply_end_pattern_last {
                targets.push(MatchTarget::End);
                patterns.push(end);
            } else {
                targets.insert(0, MatchTarget::End);
                patterns.insert(0, end);
            }
        }

        let anchored: Vec<_> = patterns.iter().map(|p| anchor.replace_anchors(p)).collect();
        PatternSet {
            targets,
            scanner: OnigScanner::new(&anchored),
        }
    }

    fn collect_refs(
        &self,
        base: usize,
        grammar: usize,
        refs: &[PatternRef],
        targets: &mut Vec<MatchTarget>,
        patterns: &mut Vec<String>,
        visited: &mut HashSet<RuleHandle>,
    ) {
        for pattern_ref in refs {
            match pattern_ref {
                PatternRef::Rule(id) => {
                    let handle = RuleHandle { grammar, rule: *id };
                    self.collect_rule(base, handle, targets, patterns, visited);
                }
                PatternRef::SelfRef => {
                    let handle = RuleHandle { grammar, rule: ROOT_RULE };
                    self.collect_rule(base, handle, targets, patterns, visited);
                }
                PatternRef::Base => {
                    let handle = RuleHandle { grammar: base, rule: ROOT_RULE };
                    self.collect_rule(base, handle, targets, patterns, visited);
                }
                PatternRef::Grammar(scope) => {
                    if let Some(&other) = self.by_scope.get(scope) {
                        let handle = RuleHandle { grammar: other, rule: ROOT_RULE };
                        self.collect_rule(base, handle, targets, patterns, visited);
                    }
                }
                PatternRef::GrammarRule(scope, entry) => {
                    if let Some(&other) = self.by_scope.get(scope)
                        && let Some(&id) = self.grammars[other].grammar.repository.get(entry)
                    {
                        let handle = RuleHandle { grammar: other, rule: id };
                        self.collect_rule(base, handle, targets, patterns, visited);
                    }
                }
            }
        }
    }

    fn collect_rule(
        &self,
        base: usize,
        handle: RuleHandle,
        targets: &mut Vec<MatchTarget>,
        patterns: &mut Vec<String>,
        visited: &mut HashSet<RuleHandle>,
    ) {
        match self.rule(handle) {
            Rule::Match(rule) => {
                targets.push(MatchTarget::Rule(handle));
                patterns.push(rule.pattern.pattern().to_string());
            }
            Rule::BeginEnd(rule) => {
                targets.push(MatchTarget::Rule(handle));
                patterns.push(rule.begin.pattern().to_string());
            }
            Rule::BeginWhile(rule) => {
                targets.push(MatchTarget::Rule(handle));
                patterns.push(rule.begin.pattern().to_string());
            }
            Rule::IncludeOnly(rule) => {
                if visited.insert(handle) {
                    self.collect_refs(
                        base,
                        handle.grammar,
                        &rule.patterns,
                        targets,
                        patterns,
                        visited,
                    );
                }
            }
            Rule::Capture(_) | Rule::Reserved => {}
        }
    }
}

/// Scope names referenced by cross-grammar includes.
fn referenced_scopes(grammar: &CompiledGrammar) -> Vec<String> {
    let mut out = Vec::new();
    for rule in &grammar.rules {
        for pattern_ref in rule.patterns() {
            match pattern_ref {
                PatternRef::Grammar(scope) | PatternRef::GrammarRule(scope, _) => {
                    if !out.contains(scope) {
                        out.push(scope.clone());
                    }
                }
                _ => {}
            }
        }
    }
    out
}

/// A registered grammar, borrowed from its registry.
#[derive(Clone, Copy)]
pub struct Grammar<'r> {
    registry: &'r Registry,
    index: usize,
}

impl Grammar<'_> {
    pub fn scope_name(&self) -> &str {
        &self.registry.compiled(self.index).scope_name
    }

    pub fn name(&self) -> Option<&str> {
        self.registry.compiled(self.index).name.as_deref()
    }

    pub fn file_types(&self) -> &[String] {
        &self.registry.compiled(self.index).file_types
    }

    /// Tests the grammar's `firstLineMatch` against a file's first line.
    /// Grammars without one match nothing.
    pub fn matches_first_line(&self, line: &str) -> bool {
        let Some(pattern) = &self.registry.compiled(self.index).first_line_match else {
            return false;
        };
        let Ok(regex) = OnigRegExp::new(pattern) else {
            return false;
        };
        regex.search(&OnigString::new(line.to_string()), 0).is_some()
    }

    /// Tokenizes one line (without its terminator). Pass the previous line's
    /// `state` to continue a document, `None` for its first line. Spans are
    /// char offsets into `line`.
    pub fn tokenize_line(
        &self,
        line: &str,
        prev_state: Option<&StateStack>,
        time_limit: Option<Duration>,
    ) -> TokenizeLineResult {
        let deadline = time_limit.map(|limit| Instant::now() + limit);
        Tokenizer::new(self.registry, self.index, deadline).tokenize_line(line, prev_state)
    }

    /// Like [`tokenize_line`](Self::tokenize_line), but packs each token's
    /// attributes against the registry's active theme.
    pub fn tokenize_line2(
        &self,
        line: &str,
        prev_state: Option<&StateStack>,
        time_limit: Option<Duration>,
    ) -> TokenizeLine2Result {
        let deadline = time_limit.map(|limit| Instant::now() + limit);
        Tokenizer::new(self.registry, self.index, deadline).tokenize_line2(line, prev_state)
    }
}
