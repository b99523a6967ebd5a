//! Grammar loading and compilation.
//!
//! `raw` is the serde-facing document model, `compiled` turns it into a flat
//! rule arena, and `injections` parses the selector language used to splice
//! one grammar's patterns into another.

pub(crate) mod compiled;
pub(crate) mod injections;
pub mod raw;

pub(crate) use compiled::{CompiledGrammar, PatternRef, Rule, RuleId, ROOT_RULE};
pub(crate) use injections::{InjectionMatcher, InjectionPrecedence};
pub use raw::RawGrammar;
