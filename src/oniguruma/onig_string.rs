use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// A line of text prepared for Oniguruma searches.
///
/// Carries a process-unique id so regex search caches can tell whether two
/// searches target the same string without holding a reference to it, and
/// the char↔byte index mapping needed to translate engine results. ASCII
/// lines (the overwhelmingly common case) skip the mapping tables entirely;
/// multi-byte lines build them on the first index query.
pub(crate) struct OnigString {
    id: usize,
    text: String,
    char_len: usize,
    ascii: bool,
    tables: OnceLock<IndexTables>,
}

struct IndexTables {
    /// byte index -> char index, one entry per byte plus the end sentinel.
    /// Continuation bytes map to the char they belong to.
    byte_to_char: Vec<usize>,
    /// char index -> byte index, one entry per char plus the end sentinel.
    char_to_byte: Vec<usize>,
}

impl IndexTables {
    fn build(text: &str) -> Self {
        let mut byte_to_char = Vec::with_capacity(text.len() + 1);
        let mut char_to_byte = Vec::new();
        for (char_idx, ch) in text.chars().enumerate() {
            char_to_byte.push(byte_to_char.len());
            for _ in 0..ch.len_utf8() {
                byte_to_char.push(char_idx);
            }
        }
        char_to_byte.push(text.len());
        byte_to_char.push(char_to_byte.len() - 1);
        Self { byte_to_char, char_to_byte }
    }
}

impl OnigString {
    pub(crate) fn new(text: String) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let ascii = text.is_ascii();
        let char_len = if ascii { text.len() } else { text.chars().count() };
        Self { id, text, char_len, ascii, tables: OnceLock::new() }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn char_len(&self) -> usize {
        self.char_len
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.text.len()
    }

    fn tables(&self) -> &IndexTables {
        self.tables.get_or_init(|| IndexTables::build(&self.text))
    }

    pub(crate) fn char_to_byte(&self, char_idx: usize) -> usize {
        if self.ascii {
            char_idx.min(self.text.len())
        } else {
            self.tables().char_to_byte[char_idx.min(self.char_len)]
        }
    }

    /// The text between two char positions.
    pub(crate) fn slice(&self, start_char: usize, end_char: usize) -> &str {
        &self.text[self.char_to_byte(start_char)..self.char_to_byte(end_char)]
    }

    pub(crate) fn byte_to_char(&self, byte_idx: usize) -> usize {
        if self.ascii {
            byte_idx.min(self.text.len())
        } else {
            self.tables().byte_to_char[byte_idx.min(self.text.len())]
        }
    }
}
