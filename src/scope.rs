//! Persistent scope stacks.
//!
//! A [`ScopeStack`] is the ordered list of scope names (outermost first) that
//! is active at a given point of a tokenized line, e.g.
//! `source.js` → `string.quoted.double.js` → `punctuation.definition.string`.
//! It is an immutable, structurally shared linked list: pushing allocates one
//! new node wrapping the parent, popping follows the parent pointer. Suffixes
//! are freely shared between in-flight tokenization sessions.

use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct ScopeNode {
    parent: Option<Arc<ScopeNode>>,
    name: Arc<str>,
    depth: usize,
}

/// An immutable stack of scope names, shared by reference.
///
/// The empty stack is a valid value (no scopes active yet).
#[derive(Clone, Default)]
pub struct ScopeStack {
    top: Option<Arc<ScopeNode>>,
}

impl ScopeStack {
    /// The empty scope stack.
    pub fn empty() -> Self {
        Self { top: None }
    }

    /// Builds a stack from outermost to innermost scope names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stack = Self::empty();
        for name in names {
            stack = stack.push(name.as_ref());
        }
        stack
    }

    /// Returns a new stack with `name` as the innermost scope.
    pub fn push(&self, name: &str) -> Self {
        Self {
            top: Some(Arc::new(ScopeNode {
                parent: self.top.clone(),
                name: Arc::from(name),
                depth: self.len() + 1,
            })),
        }
    }

    /// Pushes every whitespace-separated scope name in `names`.
    /// Rule names like `"meta.function entity.name"` carry several scopes.
    pub fn push_all(&self, names: &str) -> Self {
        let mut stack = self.clone();
        for name in names.split_whitespace() {
            stack = stack.push(name);
        }
        stack
    }

    /// Returns the stack without its innermost scope, or the empty stack.
    pub fn pop(&self) -> Self {
        Self {
            top: self.top.as_ref().and_then(|n| n.parent.clone()),
        }
    }

    /// The innermost (deepest) scope name, if any.
    pub fn deepest(&self) -> Option<&str> {
        self.top.as_deref().map(|n| &*n.name)
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    pub fn len(&self) -> usize {
        self.top.as_deref().map_or(0, |n| n.depth)
    }

    /// Scope names ordered from outermost to innermost.
    pub fn to_vec(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.len());
        let mut node = self.top.as_deref();
        while let Some(n) = node {
            out.push(n.name.to_string());
            node = n.parent.as_deref();
        }
        out.reverse();
        out
    }
}

impl PartialEq for ScopeStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.top.as_deref();
        let mut b = other.top.as_deref();
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if !std::ptr::eq(x, y) && x.name != y.name {
                        return false;
                    }
                    if std::ptr::eq(x, y) {
                        return true;
                    }
                    a = x.parent.as_deref();
                    b = y.parent.as_deref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for ScopeStack {}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeStack{:?}", self.to_vec())
    }
}

/// Whether `pattern` selects `scope_name`: it must be equal to it, or be a
/// dot-terminated prefix (`string.quoted` selects `string.quoted.double` but
/// not `string.quotedd`).
pub(crate) fn scope_pattern_matches(scope_name: &str, pattern: &str) -> bool {
    if let Some(rest) = scope_name.strip_prefix(pattern) {
        rest.is_empty() || rest.starts_with('.')
    } else {
        false
    }
}
