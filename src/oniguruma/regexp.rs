use std::fmt;
use std::sync::Mutex;

use onig::{Regex, RegexOptions, SearchOptions, Syntax};

use super::OnigString;

/// One capture group's extent, in char indices. Group 0 is the whole match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CaptureSpan {
    pub start: usize,
    pub end: usize,
}

impl CaptureSpan {
    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }
}

/// The capture groups of one successful search. `captures[i]` is `None` when
/// group `i` did not participate in the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MatchRanges {
    pub captures: Vec<Option<CaptureSpan>>,
}

impl MatchRanges {
    pub(crate) fn whole(&self) -> CaptureSpan {
        self.captures[0].unwrap_or(CaptureSpan { start: 0, end: 0 })
    }

    pub(crate) fn group(&self, idx: usize) -> Option<CaptureSpan> {
        self.captures.get(idx).copied().flatten()
    }
}

/// The previous search of one pattern, kept so that repeated searches of the
/// same line at advancing positions can reuse the result. Valid when the
/// string id matches, the cached start is at or before the requested start,
/// and the cached match (if any) begins at or after the requested start.
#[derive(Default)]
struct CacheSlot {
    string_id: usize,
    position: usize,
    result: Option<MatchRanges>,
    occupied: bool,
}

/// A compiled pattern with a single-slot search cache.
///
/// Patterns containing `\G` always bypass the cache: `\G` refers to the
/// search start position, so the same (string, later position) search can
/// legitimately produce a different result.
pub(crate) struct OnigRegExp {
    pattern: String,
    regex: Regex,
    has_g_anchor: bool,
    cache: Mutex<CacheSlot>,
}

impl OnigRegExp {
    /// Compiles `pattern`; on a syntax error, retries with the look-behind
    /// rewrite below before giving up.
    pub(crate) fn new(pattern: &str) -> Result<Self, onig::Error> {
        let regex = match compile(pattern) {
            Ok(regex) => regex,
            Err(err) => {
                let rewritten = rewrite_pattern_if_required(pattern);
                if rewritten == pattern {
                    return Err(err);
                }
                compile(&rewritten).map_err(|_| err)?
            }
        };

        Ok(Self {
            has_g_anchor: pattern.contains("\\G"),
            pattern: pattern.to_string(),
            regex,
            cache: Mutex::new(CacheSlot::default()),
        })
    }

    /// Searches `str` from the given char position. Returns the first match
    /// at or after it, or `None`.
    pub(crate) fn search(&self, str: &OnigString, start_char: usize) -> Option<MatchRanges> {
        if self.has_g_anchor {
            return self.search_uncached(str, start_char);
        }

        {
            let slot = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if slot.occupied
                && slot.string_id == str.id()
                && slot.position <= start_char
                && slot.result.as_ref().is_none_or(|r| r.whole().start >= start_char)
            {
                return slot.result.clone();
            }
        }

        let result = self.search_uncached(str, start_char);
        let mut slot = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *slot = CacheSlot {
            string_id: str.id(),
            position: start_char,
            result: result.clone(),
            occupied: true,
        };
        result
    }

    fn search_uncached(&self, str: &OnigString, start_char: usize) -> Option<MatchRanges> {
        // positions beyond the string have no match; clamping the start
        // instead could report a match before the requested position
        if start_char > str.char_len() {
            return None;
        }
        let from = str.char_to_byte(start_char);
        let mut region = onig::Region::new();
        self.regex.search_with_options(
            str.text(),
            from,
            str.byte_len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;

        let captures = (0..region.len())
            .map(|i| {
                region.pos(i).map(|(start, end)| CaptureSpan {
                    start: str.byte_to_char(start),
                    end: str.byte_to_char(end),
                })
            })
            .collect();
        Some(MatchRanges { captures })
    }
}

impl fmt::Debug for OnigRegExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnigRegExp({:?})", self.pattern)
    }
}

fn compile(pattern: &str) -> Result<Regex, onig::Error> {
    Regex::with_options(
        pattern,
        RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
        Syntax::default(),
    )
}

/// Works around Oniguruma's rejection of variable-length look-behinds,
/// which a handful of real-world grammars use.
///
/// A variable-length *positive* look-behind at the pattern start is rewritten
/// to consume its context: `(?<=X)Y` becomes `(?:X)Y`. Group 0 widens to
/// include `X` but numbered captures keep their meaning. Variable-length
/// *negative* look-behinds have no general semantics-preserving rewrite;
/// only the known `(?<!\.\s*)` case (csharp grammar) is handled, by moving
/// the variable tail out: `(?<!\.)\s*`.
fn rewrite_pattern_if_required(pattern: &str) -> String {
    if let Some(body_start) = pattern.strip_prefix("(?<=").map(|_| "(?<=".len())
        && let Some(close) = find_balanced_group_end(pattern)
    {
        let body = &pattern[body_start..close];
        if !is_fixed_length(body) {
            return format!("(?:{body}){}", &pattern[close + 1..]);
        }
    }

    if let Some(rest) = pattern.strip_prefix(r"(?<!\.\s*)") {
        return format!(r"(?<!\.)\s*{rest}");
    }

    pattern.to_string()
}

/// Index of the `)` closing the group opened at position 0, or `None` if
/// unbalanced.
fn find_balanced_group_end(pattern: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, c) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether a look-behind body is obviously fixed-length. Conservative:
/// anything with an unescaped `*`, `+`, `?`, `|`, or a `{m,n}` with `m != n`
/// counts as variable; when unsure, returns `false`.
fn is_fixed_length(body: &str) -> bool {
    let bytes = body.as_bytes();
    let mut idx = 0;
    let mut escaped = false;
    while idx < bytes.len() {
        let c = bytes[idx];
        if escaped {
            escaped = false;
            idx += 1;
            continue;
        }
        match c {
            b'\\' => escaped = true,
            b'*' | b'+' | b'?' | b'|' => return false,
            b'{' => {
                let mut j = idx + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j == idx + 1 {
                    return false;
                }
                let Ok(m) = body[idx + 1..j].parse::<u32>() else {
                    return false;
                };
                if j < bytes.len() && bytes[j] == b',' {
                    let k_start = j + 1;
                    let mut k = k_start;
                    while k < bytes.len() && bytes[k].is_ascii_digit() {
                        k += 1;
                    }
                    if k == k_start {
                        return false; // {m,}
                    }
                    let Ok(n) = body[k_start..k].parse::<u32>() else {
                        return false;
                    };
                    if m != n {
                        return false;
                    }
                    j = k;
                }
                match body[j..].find('}') {
                    Some(close) => idx = j + close,
                    None => return false,
                }
            }
            _ => {}
        }
        idx += 1;
    }
    true
}
