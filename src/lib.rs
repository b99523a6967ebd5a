//! TextMate grammar tokenization and theme matching.
//!
//! Load grammars (JSON, YAML or PList-XML) into a [`Registry`], then
//! tokenize documents line by line, threading each line's returned state
//! into the next:
//!
//! ```no_run
//! use tinta::{GrammarSource, Registry};
//!
//! struct Dir;
//! impl GrammarSource for Dir {
//!     fn load(&self, scope_name: &str) -> Option<String> {
//!         std::fs::read_to_string(format!("grammars/{scope_name}.json")).ok()
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.add_grammar(&Dir, "source.js", None)?;
//! let grammar = registry.grammar("source.js")?;
//!
//! let mut state = None;
//! for line in "let x = 1;\nlet y = 2;".lines() {
//!     let result = grammar.tokenize_line(line, state.as_ref(), None);
//!     for token in &result.tokens {
//!         println!("{:?} {:?}", token.span, token.scopes);
//!     }
//!     state = Some(result.state);
//! }
//! # Ok::<(), tinta::Error>(())
//! ```

mod error;
mod grammars;
mod oniguruma;
mod registry;
mod scope;
mod themes;
mod tokenizer;

pub use error::Error;
pub use grammars::RawGrammar;
pub use registry::{Grammar, GrammarConfiguration, GrammarSource, Registry};
pub use scope::ScopeStack;
pub use themes::{ColorMap, FontStyle, RawTheme, StyleAttributes, Theme};
pub use tokenizer::attrs::{EncodedTokenAttributes, StandardTokenType};
pub use tokenizer::stack::StateStack;
pub use tokenizer::{Token, TokenizeLine2Result, TokenizeLineResult};
