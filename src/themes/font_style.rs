/// Font style flags, bit-compatible with the packed token metadata
/// (italic 1, bold 2, underline 4, strikethrough 8).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FontStyle {
    bits: u8,
}

impl FontStyle {
    pub const ITALIC: Self = Self { bits: 1 };
    pub const BOLD: Self = Self { bits: 2 };
    pub const UNDERLINE: Self = Self { bits: 4 };
    pub const STRIKETHROUGH: Self = Self { bits: 8 };

    /// Returns an empty set of flags. Distinct from an *absent* font style:
    /// a theme rule with `"fontStyle": ""` explicitly clears inherited
    /// styling, while a rule without the key inherits it.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    pub fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }

    pub(crate) const fn bits(&self) -> u8 {
        self.bits
    }

    pub(crate) const fn from_bits(bits: u8) -> Self {
        Self { bits: bits & 0x0F }
    }

    /// Parses a theme `fontStyle` string such as `"bold italic"`. Unknown
    /// segments are ignored; an empty string yields the empty set.
    pub fn parse(font_style: &str) -> Self {
        let mut out = Self::empty();
        for segment in font_style.split_whitespace() {
            match segment {
                "italic" => out.insert(FontStyle::ITALIC),
                "bold" => out.insert(FontStyle::BOLD),
                "underline" => out.insert(FontStyle::UNDERLINE),
                "strikethrough" => out.insert(FontStyle::STRIKETHROUGH),
                _ => {}
            }
        }
        out
    }
}
