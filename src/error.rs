use std::fmt;

use thiserror::Error;

use crate::lines::Position;

/// Which stage of preprocessing rejected the input.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ErrorKind {
    /// A malformed token on a line that had to be interpreted.
    Lex,
    /// A misplaced, malformed or unknown directive.
    Directive,
    /// A `#if` or `#elif` condition that does not parse or evaluate.
    Expression,
    /// End of input inside a conditional.
    UnterminatedConditional,
    /// An active `#error` directive.
    ErrorDirective,
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("{position}: {kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub position: Position,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, position: Position, message: impl Into<String>) -> Error {
        Error { kind, position, message: message.into() }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            ErrorKind::Lex => { "lex error" }
            ErrorKind::Directive => { "directive error" }
            ErrorKind::Expression => { "expression error" }
            ErrorKind::UnterminatedConditional => { "unterminated conditional" }
            ErrorKind::ErrorDirective => { "#error" }
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};
    use crate::lines::Position;

    #[test]
    fn display() {
        let position = Position { line: 7, column: 1 };
        let error = Error::new(ErrorKind::Directive, position, "#endif without #if");
        assert_eq!(error.to_string(), "7:1: directive error: #endif without #if");
    }
}
