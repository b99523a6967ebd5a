//! End-to-end runs through the public API: register grammars and a theme,
//! tokenize a small document line by line, and read colors back out of the
//! packed form.

use std::collections::HashMap;
use std::time::Duration;

use tinta::{
    EncodedTokenAttributes, FontStyle, GrammarConfiguration, GrammarSource, RawTheme, Registry,
    StandardTokenType, Theme,
};

struct Fixtures;

impl GrammarSource for Fixtures {
    fn load(&self, scope_name: &str) -> Option<String> {
        match scope_name {
            "source.toy" => Some(
                r##"{
                    "name": "Toy",
                    "scopeName": "source.toy",
                    "fileTypes": ["toy"],
                    "firstLineMatch": "^#!.*\\btoy\\b",
                    "patterns": [
                        { "include": "#keyword" },
                        { "include": "#string" },
                        { "include": "#comment" }
                    ],
                    "repository": {
                        "keyword": { "match": "\\b(let|fn)\\b", "name": "keyword.other.toy" },
                        "string": {
                            "begin": "\"",
                            "end": "\"",
                            "name": "string.quoted.double.toy",
                            "patterns": [{ "include": "source.toy-escapes" }]
                        },
                        "comment": { "begin": "/\\*", "end": "\\*/", "name": "comment.block.toy" }
                    }
                }"##
                .to_string(),
            ),
            "source.toy-escapes" => Some(
                r##"{
                    "scopeName": "source.toy-escapes",
                    "patterns": [
                        { "match": "\\\\.", "name": "constant.character.escape.toy" }
                    ]
                }"##
                .to_string(),
            ),
            _ => None,
        }
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .add_grammar(
            &Fixtures,
            "source.toy",
            Some(GrammarConfiguration {
                language_id: 3,
                token_types: HashMap::from([(
                    "comment".to_string(),
                    StandardTokenType::Comment,
                )]),
            }),
        )
        .unwrap();
    registry
}

#[test]
fn document_tokenizes_with_state_threading() {
    let registry = registry();
    let grammar = registry.grammar("source.toy").unwrap();

    let lines = [r#"let s = "a\nb" /* note"#, "still a note */ fn"];
    let mut state = None;
    let mut per_line = Vec::new();
    for line in lines {
        let result = grammar.tokenize_line(line, state.as_ref(), None);
        assert!(!result.stopped_early);
        state = Some(result.state);
        per_line.push(result.tokens);
    }

    let first: Vec<&[String]> = per_line[0].iter().map(|t| t.scopes.as_slice()).collect();
    assert_eq!(first[0], ["source.toy", "keyword.other.toy"]);
    // the escape comes from the cross-grammar include inside the string
    assert!(first.iter().any(|scopes| {
        scopes
            == &[
                "source.toy",
                "string.quoted.double.toy",
                "constant.character.escape.toy",
            ]
    }));

    // the comment opened on line 1 is still open at the start of line 2
    assert_eq!(per_line[1][0].scopes, ["source.toy", "comment.block.toy"]);
    let last = per_line[1].last().unwrap();
    assert_eq!(last.scopes, ["source.toy", "keyword.other.toy"]);
    assert!(state.unwrap().is_root());
}

struct JsFixture;

impl GrammarSource for JsFixture {
    fn load(&self, scope_name: &str) -> Option<String> {
        (scope_name == "source.js").then(|| {
            r##"{
                "name": "JavaScript (subset)",
                "scopeName": "source.js",
                "patterns": [
                    { "include": "#function-declaration" },
                    { "include": "#keyword" },
                    { "include": "#identifier" },
                    { "include": "#operator" },
                    { "include": "#terminator" }
                ],
                "repository": {
                    "function-declaration": {
                        "name": "meta.function.js",
                        "begin": "\\b(function)\\b",
                        "end": "(?<=\\))",
                        "beginCaptures": {
                            "1": { "name": "storage.type.function.js" }
                        },
                        "patterns": [
                            { "include": "#function-name" },
                            { "include": "#parameters" }
                        ]
                    },
                    "function-name": {
                        "match": "[A-Za-z_$][\\w$]*",
                        "name": "entity.name.function.js"
                    },
                    "parameters": {
                        "name": "meta.parameters.js",
                        "begin": "\\(",
                        "end": "\\)",
                        "beginCaptures": {
                            "0": { "name": "punctuation.definition.parameters.begin.js" }
                        },
                        "endCaptures": {
                            "0": { "name": "punctuation.definition.parameters.end.js" }
                        },
                        "patterns": [
                            { "match": ",", "name": "punctuation.separator.parameter.js" },
                            { "match": "[A-Za-z_$][\\w$]*", "name": "variable.parameter.js" }
                        ]
                    },
                    "keyword": { "match": "\\b(return)\\b", "name": "keyword.control.js" },
                    "identifier": { "match": "[A-Za-z_$][\\w$]*", "name": "variable.other.js" },
                    "operator": { "match": "[+\\-*/=]", "name": "keyword.operator.arithmetic.js" },
                    "terminator": { "match": ";", "name": "punctuation.terminator.statement.js" }
                }
            }"##
            .to_string()
        })
    }
}

#[test]
fn function_declaration_line_token_by_token() {
    let mut registry = Registry::new();
    registry.add_grammar(&JsFixture, "source.js", None).unwrap();
    let grammar = registry.grammar("source.js").unwrap();

    let result = grammar.tokenize_line("function add(a,b) { return a+b; }", None, None);
    assert!(!result.stopped_early);
    assert!(result.state.is_root());

    let expected: &[(usize, usize, &[&str])] = &[
        (0, 8, &["source.js", "meta.function.js", "storage.type.function.js"]),
        (8, 9, &["source.js", "meta.function.js"]),
        (9, 12, &["source.js", "meta.function.js", "entity.name.function.js"]),
        (12, 13, &[
            "source.js",
            "meta.function.js",
            "meta.parameters.js",
            "punctuation.definition.parameters.begin.js",
        ]),
        (13, 14, &[
            "source.js",
            "meta.function.js",
            "meta.parameters.js",
            "variable.parameter.js",
        ]),
        (14, 15, &[
            "source.js",
            "meta.function.js",
            "meta.parameters.js",
            "punctuation.separator.parameter.js",
        ]),
        (15, 16, &[
            "source.js",
            "meta.function.js",
            "meta.parameters.js",
            "variable.parameter.js",
        ]),
        (16, 17, &[
            "source.js",
            "meta.function.js",
            "meta.parameters.js",
            "punctuation.definition.parameters.end.js",
        ]),
        (17, 20, &["source.js"]),
        (20, 26, &["source.js", "keyword.control.js"]),
        (26, 27, &["source.js"]),
        (27, 28, &["source.js", "variable.other.js"]),
        (28, 29, &["source.js", "keyword.operator.arithmetic.js"]),
        (29, 30, &["source.js", "variable.other.js"]),
        (30, 31, &["source.js", "punctuation.terminator.statement.js"]),
        (31, 33, &["source.js"]),
    ];

    assert_eq!(result.tokens.len(), expected.len());
    for (token, (start, end, scopes)) in result.tokens.iter().zip(expected) {
        assert_eq!(token.span, *start..*end);
        assert_eq!(token.scopes, *scopes);
    }
}

#[test]
fn equal_lines_produce_equal_states() {
    let registry = registry();
    let grammar = registry.grammar("source.toy").unwrap();

    let a = grammar.tokenize_line("/* open", None, None);
    let b = grammar.tokenize_line("/* open", None, None);
    assert_eq!(a.state, b.state);

    let closed = grammar.tokenize_line("done */", Some(&a.state), None);
    assert_ne!(closed.state, a.state);
}

#[test]
fn packed_tokens_carry_theme_and_token_types() {
    let mut registry = registry();
    registry.add_theme(Theme::from_raw(
        RawTheme::parse(
            r##"{
                "name": "ink",
                "colors": {
                    "editor.foreground": "#CCCCCC",
                    "editor.background": "#111111"
                },
                "tokenColors": [
                    { "scope": "keyword", "settings": { "foreground": "#C586C0", "fontStyle": "bold" } },
                    { "scope": "comment", "settings": { "fontStyle": "italic" } }
                ]
            }"##,
        )
        .unwrap(),
    ));

    let grammar = registry.grammar("source.toy").unwrap();
    let result = grammar.tokenize_line2("let x /* c */", None, None);
    assert_eq!(result.tokens.len() % 2, 0);

    let metas: Vec<EncodedTokenAttributes> = result
        .tokens
        .chunks(2)
        .map(|pair| EncodedTokenAttributes(pair[1]))
        .collect();

    let keyword = metas[0];
    assert_eq!(keyword.language_id(), 3);
    assert!(keyword.font_style().contains(FontStyle::BOLD));
    assert_eq!(
        registry.color_map().unwrap().color(keyword.foreground()),
        Some("#C586C0")
    );

    let comment = metas
        .iter()
        .find(|m| m.token_type() == StandardTokenType::Comment)
        .expect("a comment-typed token");
    assert!(comment.font_style().contains(FontStyle::ITALIC));
    assert_eq!(
        registry.color_map().unwrap().color(comment.foreground()),
        Some("#CCCCCC")
    );
}

#[test]
fn grammar_discovery_helpers() {
    let registry = registry();

    let by_type = registry.grammar_for_file_type("toy").unwrap();
    assert_eq!(by_type.scope_name(), "source.toy");
    assert!(registry.grammar_for_file_type("bin").is_none());

    let grammar = registry.grammar("source.toy").unwrap();
    assert_eq!(grammar.name(), Some("Toy"));
    assert!(grammar.matches_first_line("#!/usr/bin/env toy"));
    assert!(!grammar.matches_first_line("#!/bin/sh"));
}

#[test]
fn time_limited_run_is_a_prefix() {
    let registry = registry();
    let grammar = registry.grammar("source.toy").unwrap();
    let line = r#"let s = "abc" /* c */ fn"#;

    let full = grammar.tokenize_line(line, None, None);
    let limited = grammar.tokenize_line(line, None, Some(Duration::ZERO));
    assert!(limited.stopped_early);
    assert_eq!(
        limited.tokens.as_slice(),
        &full.tokens[..limited.tokens.len()]
    );
}
