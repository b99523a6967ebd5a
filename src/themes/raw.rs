//! Deserialized theme documents, before specificity compilation.
//!
//! Two dialects are accepted: vscode JSON themes (`tokenColors` plus a
//! `colors` map) and classic `tmTheme` plists (`settings`, whose first entry
//! usually carries the editor defaults and no `scope`).

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::error::TintaResult;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawTheme {
    #[serde(default)]
    pub name: Option<String>,
    /// vscode-style editor colors; only `editor.foreground` and
    /// `editor.background` (or their unprefixed forms) are consulted
    #[serde(default)]
    pub colors: HashMap<String, String>,
    #[serde(default)]
    pub token_colors: Vec<RawThemeRule>,
    #[serde(default)]
    pub settings: Vec<RawThemeRule>,
}

impl RawTheme {
    /// Parses a theme from JSON or PList-XML, sniffed from the first
    /// non-blank character.
    pub fn parse(content: &str) -> TintaResult<Self> {
        let theme: RawTheme = match content.trim_start().as_bytes().first() {
            Some(b'<') => plist::from_bytes(content.as_bytes())?,
            _ => serde_json::from_str(content)?,
        };
        Ok(theme)
    }

    /// The rule list in effect: `settings` wins when both dialects' keys are
    /// present.
    pub(crate) fn rules(&self) -> &[RawThemeRule] {
        if self.settings.is_empty() {
            &self.token_colors
        } else {
            &self.settings
        }
    }

    pub(crate) fn editor_color(&self, key: &str) -> Option<&str> {
        self.colors
            .get(&format!("editor.{key}"))
            .or_else(|| self.colors.get(key))
            .map(String::as_str)
    }
}

/// One entry of `tokenColors`/`settings`. An entry without a scope
/// contributes to the theme defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThemeRule {
    #[serde(default)]
    pub name: Option<String>,
    /// A scope selector: an array of selectors, or a single string that may
    /// itself be comma-separated
    #[serde(default, deserialize_with = "string_or_vec")]
    pub scope: Vec<String>,
    #[serde(default)]
    pub settings: RawRuleSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawRuleSettings {
    #[serde(default)]
    pub foreground: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub font_style: Option<String>,
}

fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScopeVisitor;

    impl<'de> Visitor<'de> for ScopeVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(vec![value.to_owned()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                out.push(item);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(ScopeVisitor)
}
