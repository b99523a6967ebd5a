use std::fmt;
use std::io;

pub(crate) type TintaResult<T> = Result<T, Error>;

/// Errors that can occur when loading grammars and themes.
///
/// Tokenization itself never returns an error: every per-rule failure is
/// resolved at compile time into a "missing patterns" marker, and running out
/// of time budget is reported through `stopped_early`, not through `Error`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar or theme file.
    Io(io::Error),

    /// JSON parsing failed when loading a grammar or a theme.
    Json(serde_json::Error),

    /// YAML parsing failed when loading a grammar.
    Yaml(serde_yaml::Error),

    /// PList-XML parsing failed when loading a grammar or a tmTheme.
    Plist(plist::Error),

    /// A grammar document parsed but is structurally unusable
    /// (e.g. missing `scopeName`). Fatal for that one grammar only.
    #[allow(missing_docs)]
    GrammarParse { scope_name: String, reason: String },

    /// The initial scope requested from a grammar source could not be
    /// resolved. Only the *root* scope of a load is fatal; transitively
    /// referenced scopes degrade to "missing patterns" instead.
    UnresolvableScope(String),

    /// A grammar was not found in the registry.
    GrammarNotFound(String),

    /// A theme was not found in the registry.
    ThemeNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Json(err) => write!(f, "JSON parsing error: {err}"),
            Error::Yaml(err) => write!(f, "YAML parsing error: {err}"),
            Error::Plist(err) => write!(f, "PList parsing error: {err}"),
            Error::GrammarParse { scope_name, reason } => {
                write!(f, "grammar '{scope_name}' could not be parsed: {reason}")
            }
            Error::UnresolvableScope(scope) => {
                write!(f, "no grammar source provided content for scope '{scope}'")
            }
            Error::GrammarNotFound(name) => write!(f, "grammar '{name}' not found"),
            Error::ThemeNotFound(name) => write!(f, "theme '{name}' not found"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Yaml(err) => Some(err),
            Error::Plist(err) => Some(err),
            Error::GrammarParse { .. }
            | Error::UnresolvableScope(_)
            | Error::GrammarNotFound(_)
            | Error::ThemeNotFound(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<plist::Error> for Error {
    fn from(err: plist::Error) -> Self {
        Error::Plist(err)
    }
}
