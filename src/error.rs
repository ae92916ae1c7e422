// Error types for the parser and the validation protocol
//
// An error carries its kind, a message and an optional position. Positions
// form a singly-linked provenance chain: when an error escapes a fragment
// expansion, the position of the invocation that triggered the expansion is
// appended to the chain. Walking `origin` links therefore goes from the
// innermost failure out to the outermost trigger.

use crate::token::Span;
use std::fmt;

/// Result type for the parser crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lexing or grammar errors.
    Syntax,
    /// Name resolution, argument binding and type errors.
    Semantic,
    /// Shape inference failures.
    Shape,
    /// Reading the input or writing callback output failed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "syntax"),
            ErrorKind::Semantic => write!(f, "semantic"),
            ErrorKind::Shape => write!(f, "shape"),
            ErrorKind::Io => write!(f, "i/o"),
        }
    }
}

/// A source position plus the position its evaluation was triggered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub origin: Option<Box<Position>>,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            origin: None,
        }
    }

    /// Iterate over the origin links, starting at this position's origin.
    pub fn origins(&self) -> impl Iterator<Item = &Position> {
        std::iter::successors(self.origin.as_deref(), |p| p.origin.as_deref())
    }

    /// Append `outer` at the far end of the chain.
    fn push_origin(&mut self, outer: Position) {
        match self.origin {
            Some(ref mut next) => next.push_origin(outer),
            None => self.origin = Some(Box::new(outer)),
        }
    }
}

impl From<Span> for Position {
    fn from(span: Span) -> Self {
        Position::new(span.line, span.col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// All errors that can occur during lexing, parsing, or semantic resolution.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Option<Position>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            position: Some(span.into()),
        }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Syntax, message, span)
    }

    pub fn semantic(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Semantic, message, span)
    }

    pub fn shape(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Shape, message, span)
    }

    pub fn io(err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: err.to_string(),
            position: None,
        }
    }

    /// Record that the failing evaluation was triggered from `span`.
    ///
    /// An error without a position simply takes `span` as its position.
    pub fn evaluated_from(mut self, span: Span) -> Self {
        match self.position {
            Some(ref mut position) => position.push_origin(span.into()),
            None => self.position = Some(span.into()),
        }
        self
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(position) = &self.position {
            write!(f, "[{position}] ")?;
        }
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}
