use std::borrow::Cow;
use std::fmt;

/// Which position anchors are honoured for a given search.
///
/// `\A` may only match on the first line of the document and `\G` only when
/// the search position sits exactly on the anchor position (the end of the
/// begin match). Everywhere else the anchor is textually neutralized before
/// compilation, so each pattern exists in up to four compiled variants.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub(crate) fn new(
        is_first_line: bool,
        anchor_position: Option<usize>,
        current_pos: usize,
    ) -> Self {
        let g_active = anchor_position == Some(current_pos);
        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// Replaces each inactive anchor with `\u{FFFF}`, a char no sane line
    /// contains, so the pattern keeps its group structure but cannot match
    /// through the anchor.
    pub(crate) fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        let (kill_a, kill_g) = match self {
            AnchorActive::AG => (false, false),
            AnchorActive::A => (false, true),
            AnchorActive::G => (true, false),
            AnchorActive::None => (true, true),
        };

        let mut out = Cow::Borrowed(pat);
        if kill_a && out.contains("\\A") {
            out = Cow::Owned(out.replace("\\A", "\u{FFFF}"));
        }
        if kill_g && out.contains("\\G") {
            out = Cow::Owned(out.replace("\\G", "\u{FFFF}"));
        }
        out
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}
