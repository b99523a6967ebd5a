//! Persistent tokenization state.
//!
//! A [`StateStack`] snapshots where the tokenizer stands between lines: which
//! begin/end and begin/while rules are open, the scopes they contributed and
//! their resolved end patterns. It is an immutable linked list of frames,
//! structurally shared like [`ScopeStack`]: callers keep the stack returned
//! for line `n` and hand it back to tokenize line `n + 1`, and may hold on to
//! any number of historical stacks for free.

use std::sync::Arc;

use crate::grammars::RuleId;
use crate::scope::ScopeStack;

/// Addresses a rule across the registry: the grammar's slot plus the rule's
/// id inside that grammar's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RuleHandle {
    pub grammar: usize,
    pub rule: RuleId,
}

/// One open rule.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub rule: RuleHandle,
    /// Scopes active inside the rule, including its `name`
    pub name_scopes: ScopeStack,
    /// `name_scopes` plus the rule's `contentName` scopes
    pub content_scopes: ScopeStack,
    /// The end/while pattern with back-references already substituted, kept
    /// only when the rule's pattern has any
    pub end_pattern: Option<String>,
    /// Whether the begin match consumed the line terminator; if so, `\G`
    /// stays active at position 0 of the next line
    pub begin_rule_has_captured_eol: bool,
    /// Where `\G` matches, within the current line only
    pub anchor_position: Option<usize>,
    /// Position the rule was entered at, within the current line only
    pub enter_position: Option<usize>,
}

#[derive(Debug)]
struct Node {
    parent: Option<Arc<Node>>,
    frame: Frame,
    depth: usize,
}

/// An immutable stack of open rules. Never empty: the bottom frame is the
/// base grammar's root rule.
#[derive(Debug, Clone)]
pub struct StateStack {
    top: Arc<Node>,
}

impl StateStack {
    pub(crate) fn new(root: Frame) -> Self {
        Self {
            top: Arc::new(Node { parent: None, frame: root, depth: 1 }),
        }
    }

    pub(crate) fn top(&self) -> &Frame {
        &self.top.frame
    }

    /// How many rules are open, the root included.
    pub fn depth(&self) -> usize {
        self.top.depth
    }

    pub(crate) fn push(&self, frame: Frame) -> Self {
        Self {
            top: Arc::new(Node {
                parent: Some(self.top.clone()),
                depth: self.top.depth + 1,
                frame,
            }),
        }
    }

    /// The stack without its top frame; popping the root returns the stack
    /// unchanged (a grammar that closes its root has nowhere left to go).
    pub(crate) fn pop(&self) -> Self {
        match &self.top.parent {
            Some(parent) => Self { top: parent.clone() },
            None => self.clone(),
        }
    }

    /// Whether only the base grammar's root rule is open.
    pub fn is_root(&self) -> bool {
        self.top.parent.is_none()
    }

    /// Returns a stack whose top frame has been rebuilt by `update`.
    pub(crate) fn with_top(&self, update: impl FnOnce(&mut Frame)) -> Self {
        let mut frame = self.top.frame.clone();
        update(&mut frame);
        Self {
            top: Arc::new(Node {
                parent: self.top.parent.clone(),
                depth: self.top.depth,
                frame,
            }),
        }
    }

    /// Every prefix of this stack, outermost first: the last element is the
    /// full stack, the first is the root alone.
    pub(crate) fn prefixes_outer_to_inner(&self) -> Vec<StateStack> {
        let mut out = Vec::with_capacity(self.top.depth);
        let mut node = Some(&self.top);
        while let Some(n) = node {
            out.push(Self { top: n.clone() });
            node = n.parent.as_ref();
        }
        out.reverse();
        out
    }

    /// Rebuilds the whole stack with per-line positions cleared; anchor and
    /// enter positions are meaningless on any line but the one they were set
    /// on.
    pub(crate) fn reset_for_new_line(&self) -> Self {
        let mut frames: Vec<Frame> = Vec::with_capacity(self.top.depth);
        let mut node = Some(&*self.top);
        while let Some(n) = node {
            frames.push(n.frame.clone());
            node = n.parent.as_deref();
        }

        let mut frames = frames.into_iter().rev();
        let mut root = frames.next().unwrap_or_else(|| self.top.frame.clone());
        root.anchor_position = None;
        root.enter_position = None;
        let mut stack = Self::new(root);
        for mut frame in frames {
            frame.anchor_position = None;
            frame.enter_position = None;
            stack = stack.push(frame);
        }
        stack
    }

    /// The scopes a token produced right now would get.
    pub fn current_scopes(&self) -> &ScopeStack {
        &self.top.frame.content_scopes
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(&*self.top);
        let mut b = Some(&*other.top);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if std::ptr::eq(x, y) {
                        return true;
                    }
                    let fx = &x.frame;
                    let fy = &y.frame;
                    if fx.rule != fy.rule
                        || fx.end_pattern != fy.end_pattern
                        || fx.name_scopes != fy.name_scopes
                        || fx.content_scopes != fy.content_scopes
                    {
                        return false;
                    }
                    a = x.parent.as_deref();
                    b = y.parent.as_deref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for StateStack {}
