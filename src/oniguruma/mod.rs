//! Thin adapter over the Oniguruma engine.
//!
//! Everything above this module works in *char* indices; the engine works in
//! bytes. [`OnigString`] owns a line of text together with the char↔byte
//! mapping, [`OnigRegExp`] wraps one compiled pattern with a single-slot
//! search cache, and [`OnigScanner`] picks the earliest match among a set of
//! patterns. [`AnchorActive`] neutralizes `\A`/`\G` per search context.

mod anchors;
mod onig_string;
mod regexp;
mod scanner;

pub(crate) use anchors::AnchorActive;
pub(crate) use onig_string::OnigString;
pub(crate) use regexp::{MatchRanges, OnigRegExp};
pub(crate) use scanner::OnigScanner;
