//! Theme compilation and scope matching.
//!
//! A raw theme is flattened into specificity-ordered rules: each selector
//! becomes a leaf scope plus its ancestor selectors stored deepest-first.
//! Matching folds over every rule that selects the queried scope stack, most
//! specific first, taking each style field from the first rule that sets it.
//! Colors are interned into a [`ColorMap`] so token metadata can carry small
//! ids instead of strings.

use std::collections::HashMap;

use log::warn;

use crate::scope::{scope_pattern_matches, ScopeStack};
use crate::themes::font_style::FontStyle;
use crate::themes::raw::RawTheme;

/// The resolved style of one scope stack. `font_style: None` means no
/// matching rule set a font style (inherit), which is distinct from
/// `Some(FontStyle::empty())` (explicitly regular). Color ids of 0 mean
/// unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleAttributes {
    pub font_style: Option<FontStyle>,
    pub foreground_id: u32,
    pub background_id: u32,
}

/// Interns color strings; id 0 is reserved for "unset".
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    colors: Vec<String>,
    ids: HashMap<String, u32>,
}

impl ColorMap {
    fn new() -> Self {
        // index 0 is the "unset" placeholder so ids line up with indices
        Self { colors: vec![String::new()], ids: HashMap::new() }
    }

    fn intern(&mut self, color: &str) -> u32 {
        let color = color.to_uppercase();
        if let Some(&id) = self.ids.get(&color) {
            return id;
        }
        let id = self.colors.len() as u32;
        self.colors.push(color.clone());
        self.ids.insert(color, id);
        id
    }

    /// The color string for an id, `None` for 0 or out-of-range ids.
    pub fn color(&self, id: u32) -> Option<&str> {
        match id {
            0 => None,
            _ => self.colors.get(id as usize).map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.len() <= 1
    }
}

#[derive(Debug, Clone)]
struct ThemeRule {
    /// Leaf scope selector, e.g. `constant.numeric`
    scope: String,
    /// Number of dot segments in `scope`; deeper leaves are more specific
    scope_depth: usize,
    /// Ancestor selectors deepest-first; may contain `">"` markers meaning
    /// the following selector must match the *direct* parent
    parent_scopes: Vec<String>,
    /// Position in the raw theme, later rules win ties
    index: usize,
    font_style: Option<FontStyle>,
    foreground_id: u32,
    background_id: u32,
}

/// A compiled theme: defaults plus specificity-ordered scope rules.
#[derive(Debug, Clone)]
pub struct Theme {
    name: Option<String>,
    color_map: ColorMap,
    defaults: StyleAttributes,
    rules: Vec<ThemeRule>,
}

impl Theme {
    pub fn from_raw(raw: RawTheme) -> Self {
        let mut parsed: Vec<ParsedSelector> = Vec::new();
        let mut default_font_style = FontStyle::empty();
        let mut default_foreground = "#000000".to_string();
        let mut default_background = "#FFFFFF".to_string();

        if let Some(color) = raw.editor_color("foreground").filter(|c| is_valid_hex(c)) {
            default_foreground = color.to_string();
        }
        if let Some(color) = raw.editor_color("background").filter(|c| is_valid_hex(c)) {
            default_background = color.to_string();
        }

        for (index, rule) in raw.rules().iter().enumerate() {
            let foreground = rule
                .settings
                .foreground
                .as_deref()
                .filter(|c| check_hex(c))
                .map(str::to_string);
            let background = rule
                .settings
                .background
                .as_deref()
                .filter(|c| check_hex(c))
                .map(str::to_string);
            let font_style = rule.settings.font_style.as_deref().map(FontStyle::parse);

            let mut selectors = Vec::new();
            for entry in &rule.scope {
                for selector in entry.trim_matches(',').split(',') {
                    let selector = selector.trim();
                    if !selector.is_empty() {
                        selectors.push(selector);
                    }
                }
            }

            if selectors.is_empty() {
                // a scope-less entry sets the theme defaults
                if let Some(fs) = font_style {
                    default_font_style = fs;
                }
                if let Some(fg) = foreground {
                    default_foreground = fg;
                }
                if let Some(bg) = background {
                    default_background = bg;
                }
                continue;
            }

            for selector in selectors {
                let mut segments: Vec<&str> = selector.split_whitespace().collect();
                let scope = segments.pop().unwrap_or_default().to_string();
                segments.reverse();
                parsed.push(ParsedSelector {
                    scope,
                    parent_scopes: segments.iter().map(|s| s.to_string()).collect(),
                    index,
                    font_style,
                    foreground: foreground.clone(),
                    background: background.clone(),
                });
            }
        }

        // stable rule and color-map ids: order by scope, then parents, then
        // declaration index
        parsed.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then_with(|| a.parent_scopes.cmp(&b.parent_scopes))
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut color_map = ColorMap::new();
        let defaults = StyleAttributes {
            font_style: Some(default_font_style),
            foreground_id: color_map.intern(&default_foreground),
            background_id: color_map.intern(&default_background),
        };

        let rules = parsed
            .into_iter()
            .map(|p| ThemeRule {
                scope_depth: p.scope.split('.').count(),
                scope: p.scope,
                parent_scopes: p.parent_scopes,
                index: p.index,
                font_style: p.font_style,
                foreground_id: p.foreground.map_or(0, |c| color_map.intern(&c)),
                background_id: p.background.map_or(0, |c| color_map.intern(&c)),
            })
            .collect();

        Self { name: raw.name.clone(), color_map, defaults, rules }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// The editor defaults; all fields are set.
    pub fn defaults(&self) -> StyleAttributes {
        self.defaults
    }

    /// Resolves the style of a scope stack, or `None` when no rule selects
    /// it. Unset fields of the result inherit from the enclosing scopes (the
    /// caller's concern), not from the theme defaults.
    pub fn match_scope(&self, scopes: &ScopeStack) -> Option<StyleAttributes> {
        let names = scopes.to_vec();
        let (leaf, ancestors) = names.split_last()?;

        let mut candidates: Vec<&ThemeRule> = self
            .rules
            .iter()
            .filter(|rule| {
                scope_pattern_matches(leaf, &rule.scope)
                    && parents_match(ancestors, &rule.parent_scopes)
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| {
            b.scope_depth
                .cmp(&a.scope_depth)
                .then_with(|| b.parent_scopes.len().cmp(&a.parent_scopes.len()))
                .then_with(|| b.index.cmp(&a.index))
        });

        let mut out = StyleAttributes { font_style: None, foreground_id: 0, background_id: 0 };
        for rule in candidates {
            if out.font_style.is_none() {
                out.font_style = rule.font_style;
            }
            if out.foreground_id == 0 {
                out.foreground_id = rule.foreground_id;
            }
            if out.background_id == 0 {
                out.background_id = rule.background_id;
            }
            if out.font_style.is_some() && out.foreground_id != 0 && out.background_id != 0 {
                break;
            }
        }
        Some(out)
    }
}

struct ParsedSelector {
    scope: String,
    parent_scopes: Vec<String>,
    index: usize,
    font_style: Option<FontStyle>,
    foreground: Option<String>,
    background: Option<String>,
}

/// Whether the rule's ancestor selectors (deepest-first, `">"` marking a
/// direct-parent requirement) all select the stack's ancestors in order.
fn parents_match(ancestors: &[String], parents: &[String]) -> bool {
    if parents.is_empty() {
        return true;
    }
    let mut anc = ancestors.iter().rev();
    let mut direct = false;
    for pattern in parents {
        if pattern == ">" {
            direct = true;
            continue;
        }
        loop {
            let Some(scope) = anc.next() else {
                return false;
            };
            if scope_pattern_matches(scope, pattern) {
                direct = false;
                break;
            }
            if direct {
                return false;
            }
        }
    }
    true
}

fn check_hex(color: &str) -> bool {
    let ok = is_valid_hex(color);
    if !ok {
        warn!("ignoring invalid theme color {color:?}");
    }
    ok
}

/// `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA`.
fn is_valid_hex(color: &str) -> bool {
    let Some(digits) = color.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 4 | 6 | 8) && digits.bytes().all(|b| b.is_ascii_hexdigit())
}
