//! Deserialized, unvalidated TextMate grammar documents.
//!
//! A raw rule is one flat struct with every key optional: real-world grammars
//! freely mix keys (a `begin` rule with a stray `match`, captures on an
//! include), and which keys *win* is decided by the compiler, not the parser.
//! Grammars arrive as JSON, YAML or PList-XML; the format is sniffed from the
//! first non-blank character.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;

use crate::error::{Error, TintaResult};

/// Top-level structure of a TextMate grammar document.
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "mjs"],
///   "patterns": [{ "include": "#statements" }],
///   "repository": {
///     "statements": { "patterns": [{ "include": "#keywords" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language, e.g. "JavaScript"
    #[serde(default)]
    pub name: Option<String>,
    /// Unique identifier for this grammar's scope, e.g. "source.js"
    pub scope_name: String,
    /// File extensions this grammar applies to
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Regex to identify files by their first line content,
    /// e.g. "^#!.*\\bnode\\b" for Node.js scripts
    #[serde(default)]
    pub first_line_match: Option<String>,
    /// Root patterns, applied first when tokenizing
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Named pattern definitions referenced by `#name` includes.
    /// `$self`/`$base` entries are tolerated but ignored: those include
    /// targets always resolve to the built-in meanings.
    #[serde(default)]
    pub repository: HashMap<String, RepositoryEntry>,
    /// Injection selector → patterns injected into matching contexts
    #[serde(default)]
    pub injections: HashMap<String, RawRule>,
    /// Selector used when this whole grammar is injected into others
    #[serde(default)]
    pub injection_selector: Option<String>,
    /// Scope names of grammars this one injects into
    #[serde(default)]
    pub inject_to: Vec<String>,
    /// Regexes marking foldable regions; parsed but not interpreted here
    #[serde(default)]
    pub folding_start_marker: Option<String>,
    #[serde(default)]
    pub folding_stop_marker: Option<String>,
}

impl RawGrammar {
    /// Parses a grammar from JSON, YAML or PList-XML, sniffing the format:
    /// `<` starts a plist, `{` starts JSON, anything else is tried as YAML.
    pub fn parse(content: &str) -> TintaResult<Self> {
        let grammar: RawGrammar = match content.trim_start().as_bytes().first() {
            Some(b'<') => plist::from_bytes(content.as_bytes())?,
            Some(b'{') => serde_json::from_str(content)?,
            _ => serde_yaml::from_str(content)?,
        };

        if grammar.scope_name.is_empty() {
            return Err(Error::GrammarParse {
                scope_name: String::new(),
                reason: "grammar has an empty scopeName".to_string(),
            });
        }
        Ok(grammar)
    }
}

/// One rule of a grammar, with every TextMate key optional.
///
/// The compiler classifies a rule by which keys are present: `include` wins
/// over everything, then `match`, then `begin`+`while`, then `begin`+`end`,
/// and a rule with none of those is a plain patterns container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    /// `#name`, `$self`, `$base`, `scope.name` or `scope.name#entry`
    pub include: Option<String>,
    /// Scope name(s) for the matched text; may contain `$n` back-references
    pub name: Option<String>,
    /// Scope name(s) for the text between begin and end
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    /// Fallback captures, used when the begin/end/while-specific map is absent
    pub captures: Option<RawCaptures>,
    pub begin_captures: Option<RawCaptures>,
    pub end_captures: Option<RawCaptures>,
    pub while_captures: Option<RawCaptures>,
    pub patterns: Option<Vec<RawRule>>,
    /// Rule-local repository, layered over the grammar's
    pub repository: Option<HashMap<String, RepositoryEntry>>,
    /// Written as a bool or as 0/1 depending on the grammar's vintage
    #[serde(deserialize_with = "bool_or_int", default)]
    pub apply_end_pattern_last: Option<bool>,
}

/// Capture-group number → rule. Keys are strings in the map form
/// (`{"1": {...}}`); a few grammars use the array form, where element `i`
/// describes group `i`.
#[derive(Debug, Clone, Default)]
pub struct RawCaptures(pub BTreeMap<u32, RawRule>);

impl<'de> Deserialize<'de> for RawCaptures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = RawCaptures;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of capture numbers to rules, or an array of rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = BTreeMap::new();
                while let Some((key, rule)) = map.next_entry::<String, RawRule>()? {
                    // non-numeric keys exist in the wild; they cannot be
                    // addressed by a capture group, skip them
                    if let Ok(n) = key.parse::<u32>() {
                        out.insert(n, rule);
                    }
                }
                Ok(RawCaptures(out))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = BTreeMap::new();
                let mut idx = 0u32;
                while let Some(rule) = seq.next_element::<RawRule>()? {
                    out.insert(idx, rule);
                    idx += 1;
                }
                Ok(RawCaptures(out))
            }
        }

        deserializer.deserialize_any(CapturesVisitor)
    }
}

/// A repository entry: a single rule, a `{"patterns": [...]}` container
/// (which is just a rule with only `patterns` set), or a bare array of rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RepositoryEntry {
    Rule(Box<RawRule>),
    Rules(Vec<RawRule>),
}

impl RepositoryEntry {
    /// Normalizes to the single-rule form.
    pub fn into_rule(self) -> RawRule {
        match self {
            RepositoryEntry::Rule(rule) => *rule,
            RepositoryEntry::Rules(rules) => RawRule {
                patterns: Some(rules),
                ..RawRule::default()
            },
        }
    }
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BoolOrIntVisitor;

    impl<'de> Visitor<'de> for BoolOrIntVisitor {
        type Value = Option<bool>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a boolean or 0/1")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v != 0))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v != 0))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(BoolOrIntVisitor)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_option(BoolOrIntVisitor)
}
