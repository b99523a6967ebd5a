use log::warn;

use super::{MatchRanges, OnigRegExp, OnigString};

/// The winning pattern of a scan: its position in the scanner's pattern list
/// and its capture ranges.
#[derive(Debug, Clone)]
pub(crate) struct ScanMatch {
    pub index: usize,
    pub ranges: MatchRanges,
}

/// Searches a set of patterns and reports the one matching earliest.
///
/// Ties on the start position go to the lowest pattern index, which is what
/// gives TextMate grammars their in-order pattern priority.
pub(crate) struct OnigScanner {
    regexps: Vec<Option<OnigRegExp>>,
}

impl OnigScanner {
    /// Compiles every pattern. A pattern that fails to compile is kept as a
    /// hole that never matches, so one broken rule cannot take down the
    /// grammar.
    pub(crate) fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let regexps = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                match OnigRegExp::new(p) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        warn!("skipping uncompilable pattern {p:?}: {err}");
                        None
                    }
                }
            })
            .collect();
        Self { regexps }
    }

    /// Finds the earliest match at or after `start_char`, in char positions.
    pub(crate) fn find_next_match(
        &self,
        line: &OnigString,
        start_char: usize,
    ) -> Option<ScanMatch> {
        let mut best: Option<ScanMatch> = None;
        for (index, regexp) in self.regexps.iter().enumerate() {
            let Some(regexp) = regexp else { continue };
            let Some(ranges) = regexp.search(line, start_char) else {
                continue;
            };
            let start = ranges.whole().start;
            if start == start_char {
                // nothing can beat a match at the search position
                return Some(ScanMatch { index, ranges });
            }
            if best.as_ref().is_none_or(|b| start < b.ranges.whole().start) {
                best = Some(ScanMatch { index, ranges });
            }
        }
        best
    }
}
