//! The line tokenizer.
//!
//! One line at a time: scan the active rule's pattern set (plus any
//! injections) for the earliest match, emit the text skipped over as a token
//! of the current scopes, then push, pop or stay according to the matched
//! rule, until the line is exhausted. The synthetic `\n` appended to every
//! line lets grammars whose begin/end patterns straddle the terminator see
//! it; tokens covering it are trimmed away before returning.

pub(crate) mod attrs;
pub(crate) mod stack;

use std::collections::HashMap;
use std::ops::Range;
use std::time::Instant;

use crate::grammars::compiled::{replace_captures, resolve_backrefs};
use crate::grammars::{InjectionPrecedence, Rule, RuleId};
use crate::oniguruma::{AnchorActive, MatchRanges, OnigString};
use crate::registry::{MatchTarget, Registry};
use crate::scope::ScopeStack;
use crate::tokenizer::attrs::EncodedTokenAttributes;
use crate::tokenizer::stack::{Frame, RuleHandle, StateStack};

/// One scoped region of a line, in char positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub span: Range<usize>,
    /// Scope names, outermost first
    pub scopes: Vec<String>,
}

/// The outcome of tokenizing one line. `state` is handed back to tokenize
/// the next line; when `stopped_early` is set the time limit was hit and
/// `tokens` covers only a prefix of the line.
#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    pub tokens: Vec<Token>,
    pub state: StateStack,
    pub stopped_early: bool,
}

/// Like [`TokenizeLineResult`] but with tokens encoded as
/// `[start, metadata, start, metadata, ..]` pairs; see
/// [`EncodedTokenAttributes`] for the metadata layout.
#[derive(Debug, Clone)]
pub struct TokenizeLine2Result {
    pub tokens: Vec<u32>,
    pub state: StateStack,
    pub stopped_early: bool,
}

/// Collects tokens as the scan position advances. `produce(end)` emits
/// everything between the previous token's end and `end`; empty spans are
/// skipped.
#[derive(Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    last_end: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end: usize, scopes: &ScopeStack) {
        if end <= self.last_end {
            return;
        }
        self.tokens.push(Token {
            span: self.last_end..end,
            scopes: scopes.to_vec(),
        });
        self.last_end = end;
    }

    /// Drops or trims whatever covered the synthetic line terminator.
    fn finalize(mut self, line_char_len: usize) -> Vec<Token> {
        let actual = line_char_len.saturating_sub(1);
        while let Some(last) = self.tokens.last_mut() {
            if last.span.start >= actual {
                self.tokens.pop();
                continue;
            }
            if last.span.end > actual {
                last.span.end = actual;
            }
            break;
        }
        self.tokens
    }
}

pub(crate) struct Tokenizer<'r> {
    registry: &'r Registry,
    /// Index of the grammar the tokenization started in; `$base` includes
    /// and injections resolve against it
    base: usize,
    deadline: Option<Instant>,
}

impl<'r> Tokenizer<'r> {
    pub(crate) fn new(registry: &'r Registry, base: usize, deadline: Option<Instant>) -> Self {
        Self { registry, base, deadline }
    }

    pub(crate) fn tokenize_line(
        &mut self,
        line: &str,
        prev_state: Option<&StateStack>,
    ) -> TokenizeLineResult {
        let is_first_line = prev_state.is_none();
        let stack = match prev_state {
            Some(state) => state.reset_for_new_line(),
            None => self.initial_stack(),
        };

        let text = OnigString::new(format!("{line}\n"));
        let mut acc = TokenAccumulator::default();
        let (state, stopped_early) =
            self.tokenize_string(&text, is_first_line, 0, stack, &mut acc, true);
        TokenizeLineResult {
            tokens: acc.finalize(text.char_len()),
            state,
            stopped_early,
        }
    }

    pub(crate) fn tokenize_line2(
        &mut self,
        line: &str,
        prev_state: Option<&StateStack>,
    ) -> TokenizeLine2Result {
        let result = self.tokenize_line(line, prev_state);
        let tokens = self.encode_tokens(&result);
        TokenizeLine2Result {
            tokens,
            state: result.state,
            stopped_early: result.stopped_early,
        }
    }

    fn initial_stack(&self) -> StateStack {
        let scopes = ScopeStack::empty().push(&self.registry.compiled(self.base).scope_name);
        StateStack::new(Frame {
            rule: RuleHandle { grammar: self.base, rule: crate::grammars::ROOT_RULE },
            name_scopes: scopes.clone(),
            content_scopes: scopes,
            end_pattern: None,
            begin_rule_has_captured_eol: false,
            anchor_position: None,
            enter_position: None,
        })
    }

    fn out_of_time(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// The inner loop over one prepared line (or, during capture
    /// re-tokenization, a prefix of it). Returns the resulting stack and
    /// whether the time limit cut the scan short.
    fn tokenize_string(
        &mut self,
        line: &OnigString,
        mut is_first_line: bool,
        start_pos: usize,
        mut stack: StateStack,
        acc: &mut TokenAccumulator,
        check_while: bool,
    ) -> (StateStack, bool) {
        let line_len = line.char_len();
        let mut pos = start_pos;
        let mut anchor: Option<usize> = None;
        // a zero-width match at an active \G position gets one rescan with
        // the anchor neutralized before we skip a char outright
        let mut suppress_g = false;

        if check_while {
            let outcome = self.check_while_conditions(line, is_first_line, pos, stack, acc);
            match outcome {
                WhileOutcome::Continue { stack: s, pos: p, anchor: a, is_first_line: f } => {
                    stack = s;
                    pos = p;
                    anchor = a;
                    is_first_line = f;
                }
                WhileOutcome::Stopped { stack: s } => return (s, true),
            }
        }

        loop {
            if self.out_of_time() {
                return (stack, true);
            }

            let anchor_for_scan = if suppress_g { None } else { anchor };
            let anchor_active = AnchorActive::new(is_first_line, anchor_for_scan, pos);
            let Some((target, ranges)) =
                self.match_rule_or_injections(line, pos, &stack, anchor_active)
            else {
                acc.produce(line_len, stack.current_scopes());
                break;
            };

            let capture_start = ranges.whole().start;
            let capture_end = ranges.whole().end;
            let has_advanced = capture_end > pos;

            match target {
                MatchTarget::End => {
                    let Rule::BeginEnd(rule) = self.registry.rule(stack.top().rule) else {
                        break;
                    };
                    let end_captures = rule.end_captures.clone();
                    let grammar = stack.top().rule.grammar;

                    acc.produce(capture_start, stack.current_scopes());
                    // the rule's contentName no longer applies to its own
                    // end match
                    let closing = stack.with_top(|f| f.content_scopes = f.name_scopes.clone());
                    if self.resolve_captures(
                        acc,
                        line,
                        &closing,
                        grammar,
                        &end_captures,
                        &ranges,
                        is_first_line,
                    ) {
                        return (closing, true);
                    }
                    acc.produce(capture_end, closing.current_scopes());

                    let popped_frame = closing.top().clone();
                    stack = closing.pop();
                    anchor = popped_frame.anchor_position;

                    if !has_advanced && popped_frame.enter_position == Some(pos) {
                        // pushed and popped at the same position; scanning on
                        // would loop on this rule forever
                        stack = closing;
                        acc.produce(line_len, stack.current_scopes());
                        break;
                    }
                }
                MatchTarget::Rule(handle) => match self.registry.rule(handle).clone() {
                    Rule::BeginEnd(rule) => {
                        acc.produce(capture_start, stack.current_scopes());
                        let before_push_rule = stack.top().rule;

                        let name_scopes = scopes_with(
                            stack.current_scopes(),
                            rule.name.as_deref(),
                            line,
                            &ranges,
                        );
                        stack = stack.push(Frame {
                            rule: handle,
                            name_scopes: name_scopes.clone(),
                            content_scopes: name_scopes,
                            end_pattern: None,
                            begin_rule_has_captured_eol: capture_end == line_len,
                            anchor_position: anchor,
                            enter_position: Some(pos),
                        });
                        if self.resolve_captures(
                            acc,
                            line,
                            &stack,
                            handle.grammar,
                            &rule.begin_captures,
                            &ranges,
                            is_first_line,
                        ) {
                            return (stack, true);
                        }
                        acc.produce(capture_end, stack.current_scopes());
                        anchor = Some(capture_end);

                        stack = stack.with_top(|f| {
                            f.content_scopes = scopes_with(
                                &f.name_scopes,
                                rule.content_name.as_deref(),
                                line,
                                &ranges,
                            );
                            if rule.end.has_backrefs {
                                f.end_pattern =
                                    Some(resolve_backrefs(rule.end.pattern(), line, &ranges));
                            }
                        });

                        if !has_advanced && before_push_rule == handle {
                            // the same rule reopened itself without consuming
                            // anything
                            stack = stack.pop();
                            acc.produce(line_len, stack.current_scopes());
                            break;
                        }
                    }
                    Rule::BeginWhile(rule) => {
                        acc.produce(capture_start, stack.current_scopes());
                        let before_push_rule = stack.top().rule;

                        let name_scopes = scopes_with(
                            stack.current_scopes(),
                            rule.name.as_deref(),
                            line,
                            &ranges,
                        );
                        stack = stack.push(Frame {
                            rule: handle,
                            name_scopes: name_scopes.clone(),
                            content_scopes: name_scopes,
                            end_pattern: None,
                            begin_rule_has_captured_eol: capture_end == line_len,
                            anchor_position: anchor,
                            enter_position: Some(pos),
                        });
                        if self.resolve_captures(
                            acc,
                            line,
                            &stack,
                            handle.grammar,
                            &rule.begin_captures,
                            &ranges,
                            is_first_line,
                        ) {
                            return (stack, true);
                        }
                        acc.produce(capture_end, stack.current_scopes());
                        anchor = Some(capture_end);

                        stack = stack.with_top(|f| {
                            f.content_scopes = scopes_with(
                                &f.name_scopes,
                                rule.content_name.as_deref(),
                                line,
                                &ranges,
                            );
                            if rule.while_.has_backrefs {
                                f.end_pattern =
                                    Some(resolve_backrefs(rule.while_.pattern(), line, &ranges));
                            }
                        });

                        if !has_advanced && before_push_rule == handle {
                            stack = stack.pop();
                            acc.produce(line_len, stack.current_scopes());
                            break;
                        }
                    }
                    Rule::Match(rule) => {
                        acc.produce(capture_start, stack.current_scopes());
                        // the rule's name scopes apply only for the duration
                        // of this one match
                        let name_scopes = scopes_with(
                            stack.current_scopes(),
                            rule.name.as_deref(),
                            line,
                            &ranges,
                        );
                        let matched = stack.push(Frame {
                            rule: handle,
                            name_scopes: name_scopes.clone(),
                            content_scopes: name_scopes,
                            end_pattern: None,
                            begin_rule_has_captured_eol: false,
                            anchor_position: None,
                            enter_position: Some(pos),
                        });
                        if self.resolve_captures(
                            acc,
                            line,
                            &matched,
                            handle.grammar,
                            &rule.captures,
                            &ranges,
                            is_first_line,
                        ) {
                            return (stack, true);
                        }
                        acc.produce(capture_end, matched.current_scopes());

                        if !has_advanced {
                            if !suppress_g && anchor == Some(pos) {
                                suppress_g = true;
                                continue;
                            }
                            // the grammar is stuck; skip one char and carry on
                            pos += 1;
                            suppress_g = false;
                            is_first_line = false;
                            continue;
                        }
                    }
                    Rule::IncludeOnly(_) | Rule::Capture(_) | Rule::Reserved => {
                        pos = capture_end.max(pos + 1);
                        continue;
                    }
                },
            }

            if has_advanced {
                pos = capture_end;
                is_first_line = false;
                suppress_g = false;
            }
        }

        (stack, false)
    }

    /// Re-validates every open begin/while rule against the new line,
    /// outermost first, popping the first one whose `while` no longer holds
    /// (and with it everything opened inside it).
    fn check_while_conditions(
        &mut self,
        line: &OnigString,
        mut is_first_line: bool,
        mut pos: usize,
        stack: StateStack,
        acc: &mut TokenAccumulator,
    ) -> WhileOutcome {
        let mut anchor: Option<usize> = if stack.top().begin_rule_has_captured_eol {
            Some(0)
        } else {
            None
        };
        let mut stack = stack;

        for prefix in stack.prefixes_outer_to_inner() {
            let handle = prefix.top().rule;
            let Rule::BeginWhile(rule) = self.registry.rule(handle) else {
                continue;
            };
            let while_captures = rule.while_captures.clone();
            if self.out_of_time() {
                return WhileOutcome::Stopped { stack };
            }

            let anchor_active = AnchorActive::new(is_first_line, anchor, pos);
            let set = self.registry.while_pattern_set(
                self.base,
                handle,
                prefix.top().end_pattern.as_deref(),
                anchor_active,
            );
            match set.find_next_match(line, pos) {
                Some((_, ranges)) => {
                    let whole = ranges.whole();
                    acc.produce(whole.start, prefix.current_scopes());
                    if self.resolve_captures(
                        acc,
                        line,
                        &prefix,
                        handle.grammar,
                        &while_captures,
                        &ranges,
                        is_first_line,
                    ) {
                        return WhileOutcome::Stopped { stack };
                    }
                    acc.produce(whole.end, prefix.current_scopes());
                    anchor = Some(whole.end);
                    if whole.end > pos {
                        pos = whole.end;
                        is_first_line = false;
                    }
                }
                None => {
                    stack = prefix.pop();
                    break;
                }
            }
        }

        WhileOutcome::Continue { stack, pos, anchor, is_first_line }
    }

    /// Scans the active rule's patterns and the base grammar's injections,
    /// returning whichever matches earliest. A left-precedence injection
    /// also wins ties against the grammar's own match.
    fn match_rule_or_injections(
        &self,
        line: &OnigString,
        pos: usize,
        stack: &StateStack,
        anchor_active: AnchorActive,
    ) -> Option<(MatchTarget, MatchRanges)> {
        let top = stack.top();
        let own = self
            .registry
            .pattern_set(self.base, top.rule, top.end_pattern.as_deref(), anchor_active)
            .find_next_match(line, pos);

        let injections = self.registry.injections(self.base);
        if injections.is_empty() {
            return own;
        }

        let scopes = stack.current_scopes();
        let mut best: Option<(InjectionPrecedence, MatchTarget, MatchRanges)> = None;
        for injection in injections {
            let Some(matcher) = injection.matchers.iter().find(|m| m.matches(scopes)) else {
                continue;
            };
            let set =
                self.registry
                    .pattern_set(self.base, injection.rule, None, anchor_active);
            let Some((target, ranges)) = set.find_next_match(line, pos) else {
                continue;
            };
            let start = ranges.whole().start;
            if best
                .as_ref()
                .is_some_and(|(_, _, b)| start >= b.whole().start)
            {
                continue;
            }
            let unbeatable = start == pos;
            best = Some((matcher.precedence, target, ranges));
            if unbeatable {
                break;
            }
        }

        match (own, best) {
            (own, None) => own,
            (None, Some((_, target, ranges))) => Some((target, ranges)),
            (Some((own_target, own_ranges)), Some((precedence, target, ranges))) => {
                let own_start = own_ranges.whole().start;
                let injection_start = ranges.whole().start;
                if injection_start < own_start
                    || (injection_start == own_start
                        && precedence == InjectionPrecedence::Left)
                {
                    Some((target, ranges))
                } else {
                    Some((own_target, own_ranges))
                }
            }
        }
    }

    /// Emits tokens for a match's capture groups. Overlapping captures nest
    /// on a local scope stack; a capture with its own patterns re-tokenizes
    /// the captured text instead. Returns `true` when a nested tokenization
    /// ran out of time.
    #[allow(clippy::too_many_arguments)]
    fn resolve_captures(
        &mut self,
        acc: &mut TokenAccumulator,
        line: &OnigString,
        stack: &StateStack,
        grammar: usize,
        captures: &[Option<RuleId>],
        ranges: &MatchRanges,
        is_first_line: bool,
    ) -> bool {
        if captures.is_empty() {
            return false;
        }

        let len = captures.len().min(ranges.captures.len());
        let whole_end = ranges.whole().end;
        let mut local_stack: Vec<(ScopeStack, usize)> = Vec::new();

        for group in 0..len {
            let Some(rule_id) = captures[group] else { continue };
            let Some(span) = ranges.group(group) else { continue };
            if span.len() == 0 {
                continue;
            }
            if span.start > whole_end {
                break;
            }

            while let Some((scopes, end)) = local_stack.last() {
                if *end > span.start {
                    break;
                }
                acc.produce(*end, scopes);
                local_stack.pop();
            }
            match local_stack.last() {
                Some((scopes, _)) => acc.produce(span.start, scopes),
                None => acc.produce(span.start, stack.current_scopes()),
            }

            let Rule::Capture(capture) = self.registry.compiled(grammar).rule(rule_id) else {
                continue;
            };
            let capture = capture.clone();

            if let Some(retokenize_with) = capture.retokenize_with {
                let name_scopes = scopes_with(
                    stack.current_scopes(),
                    capture.name.as_deref(),
                    line,
                    ranges,
                );
                let content_scopes =
                    scopes_with(&name_scopes, capture.content_name.as_deref(), line, ranges);
                let sub_stack = stack.push(Frame {
                    rule: RuleHandle { grammar, rule: retokenize_with },
                    name_scopes,
                    content_scopes,
                    end_pattern: None,
                    begin_rule_has_captured_eol: false,
                    anchor_position: None,
                    enter_position: Some(span.start),
                });
                let sub_line = OnigString::new(line.slice(0, span.end).to_string());
                let sub_first_line = is_first_line && span.start == 0;
                let (_, stopped) =
                    self.tokenize_string(&sub_line, sub_first_line, span.start, sub_stack, acc, false);
                if stopped {
                    return true;
                }
                continue;
            }

            let base = match local_stack.last() {
                Some((scopes, _)) => scopes.clone(),
                None => stack.current_scopes().clone(),
            };
            let scopes = scopes_with(&base, capture.name.as_deref(), line, ranges);
            local_stack.push((scopes, span.end));
        }

        while let Some((scopes, end)) = local_stack.pop() {
            acc.produce(end, &scopes);
        }
        false
    }

    /// Packs a plain tokenization into `[start, metadata]` pairs, merging
    /// neighbours whose metadata came out identical.
    fn encode_tokens(&self, result: &TokenizeLineResult) -> Vec<u32> {
        let language_id = self.registry.language_id(self.base);
        let token_types = self.registry.token_types(self.base);
        let theme = self.registry.theme();

        let mut defaults = EncodedTokenAttributes::default().set(
            Some(language_id),
            Some(attrs::StandardTokenType::Other),
            None,
            0,
            0,
        );
        if let Some(theme) = theme {
            let base = theme.defaults();
            defaults = defaults.set(
                None,
                None,
                base.font_style.or(Some(crate::themes::FontStyle::empty())),
                base.foreground_id,
                base.background_id,
            );
        }

        let mut memo: HashMap<Vec<String>, u32> = HashMap::new();
        let mut out = Vec::with_capacity(result.tokens.len() * 2);
        for token in &result.tokens {
            let metadata = match memo.get(&token.scopes) {
                Some(metadata) => *metadata,
                None => {
                    let mut attrs = defaults;
                    let mut scope_stack = ScopeStack::empty();
                    for name in &token.scopes {
                        scope_stack = scope_stack.push(name);
                        if let Some(theme) = theme
                            && let Some(style) = theme.match_scope(&scope_stack)
                        {
                            attrs = attrs.set(
                                None,
                                None,
                                style.font_style,
                                style.foreground_id,
                                style.background_id,
                            );
                        }
                    }
                    if !token_types.is_empty()
                        && let Some(token_type) = token_types.match_scopes(&scope_stack)
                    {
                        attrs = attrs.set(None, Some(token_type), None, 0, 0);
                    }
                    memo.insert(token.scopes.clone(), attrs.0);
                    attrs.0
                }
            };

            if out.len() >= 2 && out[out.len() - 1] == metadata {
                continue;
            }
            out.push(token.span.start as u32);
            out.push(metadata);
        }

        if out.is_empty() {
            out.push(0);
            out.push(defaults.0);
        }
        out
    }
}

enum WhileOutcome {
    Continue {
        stack: StateStack,
        pos: usize,
        anchor: Option<usize>,
        is_first_line: bool,
    },
    Stopped {
        stack: StateStack,
    },
}

/// Base scopes plus a rule name with its capture references substituted.
fn scopes_with(
    base: &ScopeStack,
    name: Option<&str>,
    line: &OnigString,
    ranges: &MatchRanges,
) -> ScopeStack {
    match name {
        Some(name) => base.push_all(&replace_captures(name, line, ranges)),
        None => base.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::registry::{GrammarConfiguration, GrammarSource, Registry};
    use crate::themes::{RawTheme, Theme};

    struct Single(&'static str, &'static str);

    impl GrammarSource for Single {
        fn load(&self, scope_name: &str) -> Option<String> {
            (scope_name == self.0).then(|| self.1.to_string())
        }
    }

    struct Many(Vec<(&'static str, &'static str)>);

    impl GrammarSource for Many {
        fn load(&self, scope_name: &str) -> Option<String> {
            self.0
                .iter()
                .find(|(scope, _)| *scope == scope_name)
                .map(|(_, content)| content.to_string())
        }
    }

    fn registry_with(scope: &'static str, grammar: &'static str) -> Registry {
        let mut registry = Registry::new();
        registry.add_grammar(&Single(scope, grammar), scope, None).unwrap();
        registry
    }

    /// (span, scopes) pairs for terse comparisons.
    fn flat(tokens: &[Token]) -> Vec<(Range<usize>, Vec<&str>)> {
        tokens
            .iter()
            .map(|t| {
                (
                    t.span.clone(),
                    t.scopes.iter().map(String::as_str).collect(),
                )
            })
            .collect()
    }

    fn assert_covers(tokens: &[Token], len: usize) {
        let mut expected_start = 0;
        for token in tokens {
            assert_eq!(token.span.start, expected_start, "tokens must be contiguous");
            assert!(token.span.end > token.span.start);
            expected_start = token.span.end;
        }
        assert_eq!(expected_start, len, "tokens must cover the whole line");
    }

    const MINI: &str = r##"{
        "scopeName": "source.mini",
        "patterns": [
            { "include": "#keyword" },
            { "include": "#string" },
            { "include": "#comment" }
        ],
        "repository": {
            "keyword": { "match": "\\b(function|return)\\b", "name": "keyword.control.mini" },
            "string": {
                "begin": "\"",
                "end": "\"",
                "name": "string.quoted.double.mini",
                "beginCaptures": { "0": { "name": "punctuation.definition.string.begin.mini" } },
                "endCaptures": { "0": { "name": "punctuation.definition.string.end.mini" } }
            },
            "comment": { "begin": "/\\*", "end": "\\*/", "name": "comment.block.mini" }
        }
    }"##;

    #[test]
    fn keywords_strings_and_captures() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();
        let line = r#"function f() { return "hi"; }"#;
        let result = grammar.tokenize_line(line, None, None);

        assert!(!result.stopped_early);
        assert_covers(&result.tokens, line.chars().count());
        assert_eq!(
            flat(&result.tokens),
            vec![
                (0..8, vec!["source.mini", "keyword.control.mini"]),
                (8..15, vec!["source.mini"]),
                (15..21, vec!["source.mini", "keyword.control.mini"]),
                (21..22, vec!["source.mini"]),
                (
                    22..23,
                    vec![
                        "source.mini",
                        "string.quoted.double.mini",
                        "punctuation.definition.string.begin.mini"
                    ]
                ),
                (23..25, vec!["source.mini", "string.quoted.double.mini"]),
                (
                    25..26,
                    vec![
                        "source.mini",
                        "string.quoted.double.mini",
                        "punctuation.definition.string.end.mini"
                    ]
                ),
                (26..29, vec!["source.mini"]),
            ]
        );
    }

    #[test]
    fn state_carries_across_lines() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();

        let first = grammar.tokenize_line("a /* x", None, None);
        assert_eq!(
            flat(&first.tokens),
            vec![
                (0..2, vec!["source.mini"]),
                (2..4, vec!["source.mini", "comment.block.mini"]),
                (4..6, vec!["source.mini", "comment.block.mini"]),
            ]
        );

        let second = grammar.tokenize_line("y */ b", Some(&first.state), None);
        assert_eq!(
            flat(&second.tokens),
            vec![
                (0..2, vec!["source.mini", "comment.block.mini"]),
                (2..4, vec!["source.mini", "comment.block.mini"]),
                (4..6, vec!["source.mini"]),
            ]
        );
    }

    #[test]
    fn tokenization_is_deterministic() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();
        let line = r#"return "a /* b */ c""#;
        let a = grammar.tokenize_line(line, None, None);
        let b = grammar.tokenize_line(line, None, None);
        assert_eq!(a.tokens, b.tokens);
        assert_eq!(a.state, b.state);
    }

    #[test]
    fn empty_line_has_no_tokens_but_keeps_state() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();
        let opened = grammar.tokenize_line("/* c", None, None);
        let empty = grammar.tokenize_line("", Some(&opened.state), None);
        assert!(empty.tokens.is_empty());
        assert_eq!(empty.state, opened.state);

        let after = grammar.tokenize_line("still */", Some(&empty.state), None);
        assert_eq!(
            after.tokens[0].scopes,
            vec!["source.mini", "comment.block.mini"]
        );
    }

    #[test]
    fn nested_self_includes() {
        let registry = registry_with(
            "source.paren",
            r##"{
                "scopeName": "source.paren",
                "patterns": [{
                    "begin": "\\(", "end": "\\)", "name": "meta.paren",
                    "patterns": [{ "include": "$self" }]
                }]
            }"##,
        );
        let grammar = registry.grammar("source.paren").unwrap();
        let result = grammar.tokenize_line("((x))", None, None);
        assert_eq!(
            flat(&result.tokens),
            vec![
                (0..1, vec!["source.paren", "meta.paren"]),
                (1..2, vec!["source.paren", "meta.paren", "meta.paren"]),
                (2..3, vec!["source.paren", "meta.paren", "meta.paren"]),
                (3..4, vec!["source.paren", "meta.paren", "meta.paren"]),
                (4..5, vec!["source.paren", "meta.paren"]),
            ]
        );
    }

    #[test]
    fn while_rule_holds_and_pops() {
        let registry = registry_with(
            "text.quote",
            r##"{
                "scopeName": "text.quote",
                "patterns": [{
                    "begin": "^> ", "while": "^> ", "name": "markup.quote",
                    "patterns": [{ "match": "\\w+", "name": "word.quote" }]
                }]
            }"##,
        );
        let grammar = registry.grammar("text.quote").unwrap();

        let first = grammar.tokenize_line("> hello", None, None);
        assert_eq!(
            flat(&first.tokens),
            vec![
                (0..2, vec!["text.quote", "markup.quote"]),
                (2..7, vec!["text.quote", "markup.quote", "word.quote"]),
            ]
        );

        let second = grammar.tokenize_line("> world", Some(&first.state), None);
        assert_eq!(
            flat(&second.tokens),
            vec![
                (0..2, vec!["text.quote", "markup.quote"]),
                (2..7, vec!["text.quote", "markup.quote", "word.quote"]),
            ]
        );

        let third = grammar.tokenize_line("done", Some(&second.state), None);
        assert_eq!(flat(&third.tokens), vec![(0..4, vec!["text.quote"])]);
        assert!(third.state.is_root());
    }

    #[test]
    fn end_pattern_back_references() {
        let registry = registry_with(
            "source.raw",
            r##"{
                "scopeName": "source.raw",
                "patterns": [{
                    "begin": "(=+)\\[", "end": "\\]\\1", "name": "string.raw"
                }]
            }"##,
        );
        let grammar = registry.grammar("source.raw").unwrap();

        let closed = grammar.tokenize_line("==[x]==.", None, None);
        assert_eq!(
            flat(&closed.tokens),
            vec![
                (0..3, vec!["source.raw", "string.raw"]),
                (3..4, vec!["source.raw", "string.raw"]),
                (4..7, vec!["source.raw", "string.raw"]),
                (7..8, vec!["source.raw"]),
            ]
        );

        // a shorter delimiter must not close it
        let open = grammar.tokenize_line("==[x]=", None, None);
        assert!(!open.state.is_root());
    }

    #[test]
    fn zero_width_matches_terminate() {
        let registry = registry_with(
            "source.zw",
            r##"{
                "scopeName": "source.zw",
                "patterns": [{ "match": "(?=x)", "name": "zw" }]
            }"##,
        );
        let grammar = registry.grammar("source.zw").unwrap();
        let result = grammar.tokenize_line("axa", None, None);
        assert!(!result.stopped_early);
        assert_covers(&result.tokens, 3);
    }

    #[test]
    fn cyclic_includes_tokenize_without_hanging() {
        let registry = registry_with(
            "source.cycle",
            r##"{
                "scopeName": "source.cycle",
                "patterns": [{ "include": "#foo" }],
                "repository": {
                    "foo": {
                        "begin": "f", "end": "F", "name": "meta.foo",
                        "patterns": [{ "include": "#bar" }]
                    },
                    "bar": {
                        "begin": "b", "end": "B", "name": "meta.bar",
                        "patterns": [{ "include": "#foo" }]
                    }
                }
            }"##,
        );
        let grammar = registry.grammar("source.cycle").unwrap();
        let result = grammar.tokenize_line("fbxBF", None, None);
        assert_covers(&result.tokens, 5);
        assert_eq!(
            result.tokens[2].scopes,
            vec!["source.cycle", "meta.foo", "meta.bar"]
        );
        assert!(result.state.is_root());
    }

    #[test]
    fn left_injection_wins_ties() {
        let mut registry = Registry::new();
        registry
            .add_grammar(
                &Many(vec![
                    (
                        "source.host",
                        r##"{
                            "scopeName": "source.host",
                            "patterns": [{ "match": "\\w+", "name": "word.host" }]
                        }"##,
                    ),
                    (
                        "comment.inj",
                        r##"{
                            "scopeName": "comment.inj",
                            "injectionSelector": "L:source.host",
                            "injectTo": ["source.host"],
                            "patterns": [{ "match": "#.*", "name": "comment.line.inj" }]
                        }"##,
                    ),
                ]),
                "source.host",
                None,
            )
            .unwrap();
        registry
            .add_grammar(
                &Many(vec![(
                    "comment.inj",
                    r##"{
                        "scopeName": "comment.inj",
                        "injectionSelector": "L:source.host",
                        "injectTo": ["source.host"],
                        "patterns": [{ "match": "#.*", "name": "comment.line.inj" }]
                    }"##,
                )]),
                "comment.inj",
                None,
            )
            .unwrap();

        let grammar = registry.grammar("source.host").unwrap();
        let result = grammar.tokenize_line("x #c", None, None);
        assert_eq!(
            flat(&result.tokens),
            vec![
                (0..1, vec!["source.host", "word.host"]),
                (1..2, vec!["source.host"]),
                (2..4, vec!["source.host", "comment.line.inj"]),
            ]
        );
    }

    #[test]
    fn cross_grammar_repository_include() {
        let mut registry = Registry::new();
        registry
            .add_grammar(
                &Many(vec![
                    (
                        "source.a",
                        r##"{
                            "scopeName": "source.a",
                            "patterns": [{ "include": "source.b#item" }]
                        }"##,
                    ),
                    (
                        "source.b",
                        r##"{
                            "scopeName": "source.b",
                            "patterns": [],
                            "repository": {
                                "item": { "match": "i+", "name": "item.b" }
                            }
                        }"##,
                    ),
                ]),
                "source.a",
                None,
            )
            .unwrap();

        let result = registry
            .grammar("source.a")
            .unwrap()
            .tokenize_line("ii", None, None);
        assert_eq!(flat(&result.tokens), vec![(0..2, vec!["source.a", "item.b"])]);
    }

    #[test]
    fn multibyte_spans_are_char_offsets() {
        let registry = registry_with(
            "source.uni",
            r##"{
                "scopeName": "source.uni",
                "patterns": [{ "match": "\"[^\"]*\"", "name": "string.uni" }]
            }"##,
        );
        let grammar = registry.grammar("source.uni").unwrap();
        let result = grammar.tokenize_line("é = \"漢字\"", None, None);
        assert_eq!(
            flat(&result.tokens),
            vec![
                (0..4, vec!["source.uni"]),
                (4..8, vec!["source.uni", "string.uni"]),
            ]
        );
    }

    #[test]
    fn deadline_stops_early_with_a_prefix() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();
        let line = r#"function f() { return "hi"; }"#;

        let limited = grammar.tokenize_line(line, None, Some(Duration::ZERO));
        assert!(limited.stopped_early);

        let full = grammar.tokenize_line(line, None, None);
        assert!(limited.tokens.len() <= full.tokens.len());
        assert_eq!(
            limited.tokens.as_slice(),
            &full.tokens[..limited.tokens.len()],
            "a stopped run must be a prefix of the full run"
        );
    }

    #[test]
    fn packed_tokens_resolve_theme_colors() {
        let mut registry = registry_with("source.mini", MINI);
        registry.add_theme(Theme::from_raw(
            RawTheme::parse(
                r##"{
                    "name": "test",
                    "colors": {
                        "editor.foreground": "#F8F8F2",
                        "editor.background": "#272822"
                    },
                    "tokenColors": [
                        {
                            "scope": "keyword",
                            "settings": { "foreground": "#FF0000", "fontStyle": "bold" }
                        }
                    ]
                }"##,
            )
            .unwrap(),
        ));
        let config = GrammarConfiguration {
            language_id: 7,
            token_types: HashMap::from([(
                "comment".to_string(),
                attrs::StandardTokenType::Comment,
            )]),
        };
        registry
            .add_grammar(&Single("source.mini", MINI), "source.mini", Some(config))
            .unwrap();

        let grammar = registry.grammar("source.mini").unwrap();
        let result = grammar.tokenize_line2("return /* c */", None, None);
        assert!(result.tokens.len() >= 4);
        assert_eq!(result.tokens.len() % 2, 0);

        let keyword = EncodedTokenAttributes(result.tokens[1]);
        assert_eq!(result.tokens[0], 0);
        assert_eq!(keyword.language_id(), 7);
        assert!(keyword.font_style().contains(crate::themes::FontStyle::BOLD));
        assert_eq!(
            registry.color_map().unwrap().color(keyword.foreground()),
            Some("#FF0000")
        );

        // the comment token picks up the default colors and the Comment type
        let comment = result
            .tokens
            .chunks(2)
            .map(|pair| EncodedTokenAttributes(pair[1]))
            .find(|meta| meta.token_type() == attrs::StandardTokenType::Comment)
            .expect("a comment-typed token");
        assert_eq!(
            registry.color_map().unwrap().color(comment.foreground()),
            Some("#F8F8F2")
        );
    }

    #[test]
    fn packed_tokens_merge_equal_metadata() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();
        // without a theme every plain token encodes identically
        let result = grammar.tokenize_line2("a b c d", None, None);
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.tokens[0], 0);
    }

    #[test]
    fn empty_line_still_gets_one_packed_token() {
        let registry = registry_with("source.mini", MINI);
        let grammar = registry.grammar("source.mini").unwrap();
        let result = grammar.tokenize_line2("", None, None);
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.tokens[0], 0);
    }
}
