// Token — All lexical tokens of the NNEF graph description language
//
// Tokens fall into these categories:
//
//   1. Keywords      — version, extension, fragment, graph, for, in, yield, if, then, else
//   2. Type names    — tensor, integer, scalar, logical, string
//   3. Operators     — + - * / ^ < <= > >= == != && || !
//   4. Punctuation   — ( ) [ ] { } , ; : = -> ?
//   5. Literals      — integers, scalars, strings, true/false
//   6. Identifiers   — operation, tensor, and parameter names
//
// Each token carries a Span (byte offset + length + line/column) for error reporting.

use std::fmt;

/// Byte-level location in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Byte offset from the start of the source.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, in bytes).
    pub col: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize, line: usize, col: usize) -> Self {
        Self {
            offset,
            len,
            line,
            col,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every possible token kind in the NNEF language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    //  Keywords
    Version,
    Extension,
    Fragment,
    Graph,
    For,
    In,
    Yield,
    If,
    Then,
    Else,

    //  Type names
    Tensor,
    Integer,
    Scalar,
    Logical,
    String,

    //  Literals
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    True,
    False,

    //  Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Caret,    // ^
    Lt,       // <
    Gt,       // >
    LtEq,     // <=
    GtEq,     // >=
    EqEq,     // ==
    BangEq,   // !=
    AmpAmp,   // &&
    PipePipe, // ||
    Bang,     // !
    Eq,       // =

    //  Punctuation
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Comma,    // ,
    Semi,     // ;
    Colon,    // :
    Arrow,    // ->
    Question, // ?

    //  Identifiers
    Ident(String),

    //  Special
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(word) = self.keyword_str() {
            return write!(f, "'{word}'");
        }
        match self {
            TokenKind::IntLit(n) => write!(f, "{n}"),
            TokenKind::FloatLit(n) => write!(f, "{n:?}"),
            TokenKind::StringLit(s) => write!(f, "'{s}'"),
            TokenKind::Ident(s) => write!(f, "identifier '{s}'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Caret => write!(f, "'^'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::LtEq => write!(f, "'<='"),
            TokenKind::GtEq => write!(f, "'>='"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::BangEq => write!(f, "'!='"),
            TokenKind::AmpAmp => write!(f, "'&&'"),
            TokenKind::PipePipe => write!(f, "'||'"),
            TokenKind::Bang => write!(f, "'!'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Semi => write!(f, "';'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::Question => write!(f, "'?'"),
            TokenKind::Eof => write!(f, "end of input"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl TokenKind {
    /// Return the source spelling of a keyword or type-name token.
    /// Returns `None` for literals, operators, identifiers, etc.
    pub fn keyword_str(&self) -> Option<&'static str> {
        match self {
            TokenKind::Version => Some("version"),
            TokenKind::Extension => Some("extension"),
            TokenKind::Fragment => Some("fragment"),
            TokenKind::Graph => Some("graph"),
            TokenKind::For => Some("for"),
            TokenKind::In => Some("in"),
            TokenKind::Yield => Some("yield"),
            TokenKind::If => Some("if"),
            TokenKind::Then => Some("then"),
            TokenKind::Else => Some("else"),
            TokenKind::Tensor => Some("tensor"),
            TokenKind::Integer => Some("integer"),
            TokenKind::Scalar => Some("scalar"),
            TokenKind::Logical => Some("logical"),
            TokenKind::String => Some("string"),
            TokenKind::True => Some("true"),
            TokenKind::False => Some("false"),
            _ => None,
        }
    }

    /// True for the four primitive type names.
    pub fn is_primitive_type(&self) -> bool {
        matches!(
            self,
            TokenKind::Integer | TokenKind::Scalar | TokenKind::Logical | TokenKind::String
        )
    }
}

/// Look up a keyword from an identifier string.
/// Returns None if the string is a plain identifier.
pub fn keyword_lookup(s: &str) -> Option<TokenKind> {
    match s {
        "version" => Some(TokenKind::Version),
        "extension" => Some(TokenKind::Extension),
        "fragment" => Some(TokenKind::Fragment),
        "graph" => Some(TokenKind::Graph),
        "for" => Some(TokenKind::For),
        "in" => Some(TokenKind::In),
        "yield" => Some(TokenKind::Yield),
        "if" => Some(TokenKind::If),
        "then" => Some(TokenKind::Then),
        "else" => Some(TokenKind::Else),

        "tensor" => Some(TokenKind::Tensor),
        "integer" => Some(TokenKind::Integer),
        "scalar" => Some(TokenKind::Scalar),
        "logical" => Some(TokenKind::Logical),
        "string" => Some(TokenKind::String),

        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),

        _ => None,
    }
}
