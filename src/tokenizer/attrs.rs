//! Packed token metadata for the binary tokenization API.
//!
//! Bit layout of the u32, low to high: language id (0-7), standard token
//! type (8-9), balanced-bracket bit (10, always clear here), font style
//! (11-14), foreground color id (15-23), background color id (24-31).

use std::collections::HashMap;

use crate::grammars::injections::{parse_injection_selector, InjectionMatcher};
use crate::scope::ScopeStack;
use crate::themes::FontStyle;

/// The token classes editors care about independently of scopes, e.g. for
/// bracket matching and spell checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StandardTokenType {
    #[default]
    Other = 0,
    Comment = 1,
    String = 2,
    RegEx = 3,
}

const LANGUAGE_ID_MASK: u32 = 0x0000_00FF;
const TOKEN_TYPE_MASK: u32 = 0x0000_0300;
const FONT_STYLE_MASK: u32 = 0x0000_7800;
const FOREGROUND_MASK: u32 = 0x00FF_8000;
const BACKGROUND_MASK: u32 = 0xFF00_0000;

const TOKEN_TYPE_OFFSET: u32 = 8;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 15;
const BACKGROUND_OFFSET: u32 = 24;

/// One token's packed attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodedTokenAttributes(pub u32);

impl EncodedTokenAttributes {
    pub fn language_id(self) -> u32 {
        self.0 & LANGUAGE_ID_MASK
    }

    pub fn token_type(self) -> StandardTokenType {
        match (self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET {
            1 => StandardTokenType::Comment,
            2 => StandardTokenType::String,
            3 => StandardTokenType::RegEx,
            _ => StandardTokenType::Other,
        }
    }

    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    pub fn foreground(self) -> u32 {
        (self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET
    }

    pub fn background(self) -> u32 {
        (self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET
    }

    /// Overwrites the fields that are given; `None` (or a 0 color id) keeps
    /// the current value.
    pub(crate) fn set(
        self,
        language_id: Option<u32>,
        token_type: Option<StandardTokenType>,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) -> Self {
        let mut bits = self.0;
        if let Some(id) = language_id {
            bits = (bits & !LANGUAGE_ID_MASK) | (id & LANGUAGE_ID_MASK);
        }
        if let Some(tt) = token_type {
            bits = (bits & !TOKEN_TYPE_MASK) | ((tt as u32) << TOKEN_TYPE_OFFSET);
        }
        if let Some(fs) = font_style {
            bits = (bits & !FONT_STYLE_MASK) | ((fs.bits() as u32) << FONT_STYLE_OFFSET);
        }
        if foreground != 0 {
            bits = (bits & !FOREGROUND_MASK) | (foreground << FOREGROUND_OFFSET);
        }
        if background != 0 {
            bits = (bits & !BACKGROUND_MASK) | (background << BACKGROUND_OFFSET);
        }
        Self(bits)
    }
}

/// Maps scope selectors to standard token types, e.g.
/// `"comment.block.documentation"` → `Comment`. Supplied per grammar at
/// registration time.
#[derive(Debug, Clone, Default)]
pub(crate) struct TokenTypeMatcher {
    matchers: Vec<(Vec<InjectionMatcher>, StandardTokenType)>,
}

impl TokenTypeMatcher {
    pub(crate) fn new(token_types: &HashMap<String, StandardTokenType>) -> Self {
        let mut entries: Vec<(&String, &StandardTokenType)> = token_types.iter().collect();
        entries.sort_by_key(|(selector, _)| selector.clone());
        Self {
            matchers: entries
                .into_iter()
                .map(|(selector, tt)| (parse_injection_selector(selector), *tt))
                .collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub(crate) fn match_scopes(&self, scopes: &ScopeStack) -> Option<StandardTokenType> {
        for (matchers, token_type) in &self.matchers {
            if matchers.iter().any(|m| m.matches(scopes)) {
                return Some(*token_type);
            }
        }
        None
    }
}
