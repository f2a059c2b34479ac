use std::fmt;
use std::io;

pub(crate) type OcraResult<T> = Result<T, Error>;

/// Errors that can occur during ocra usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    /// or a dump file if the `dump` feature is enabled
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// Encoding or decoding a registry dump failed.
    #[cfg(feature = "dump")]
    Dump(String),

    /// A rule pattern is not a valid regular expression.
    /// Only happens when registering a grammar, the grammar is then not registered.
    #[allow(missing_docs)]
    InvalidPattern { pattern: String, reason: String },

    /// A `beginScope`/`endScope` map refers to a capture group the pattern does not have.
    #[allow(missing_docs)]
    CaptureOutOfRange {
        pattern: String,
        group: usize,
        available: usize,
    },

    /// A `contains` list refers to a repository entry that does not exist.
    #[allow(missing_docs)]
    UnknownRule { grammar: String, name: String },

    /// A grammar was not found in the registry.
    /// Only happens when asking to tokenize something with a grammar we can't find
    UnknownGrammar(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            #[cfg(feature = "dump")]
            Error::Dump(message) => write!(f, "dump error: {}", message),
            Error::InvalidPattern { pattern, reason } => {
                write!(f, "invalid pattern '{}': {}", pattern, reason)
            }
            Error::CaptureOutOfRange {
                pattern,
                group,
                available,
            } => write!(
                f,
                "pattern '{}' has {} capture group(s) but a scope is assigned to group {}",
                pattern, available, group
            ),
            Error::UnknownRule { grammar, name } => {
                write!(f, "grammar '{}' refers to unknown rule '{}'", grammar, name)
            }
            Error::UnknownGrammar(name) => write!(f, "grammar '{}' not found", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            #[cfg(feature = "dump")]
            Error::Dump(_) => None,
            Error::InvalidPattern { .. }
            | Error::CaptureOutOfRange { .. }
            | Error::UnknownRule { .. }
            | Error::UnknownGrammar(_) => None,
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

#[cfg(feature = "dump")]
impl From<bitcode::Error> for Error {
    fn from(err: bitcode::Error) -> Self {
        Error::Dump(err.to_string())
    }
}
