// Lexer — Converts NNEF source text into a stream of Tokens
//
// A byte-at-a-time scanner that tracks 1-based line and column for every
// token, so parse and semantic errors can point back into the source.
//
// LEXICAL RULES:
//
//   1. Identifiers are [A-Za-z_][A-Za-z0-9_]*; keywords and type names map to
//      their own tokens via `keyword_lookup`.
//
//   2. Numbers: a digit sequence is an integer literal; a fractional part or
//      an exponent makes it a scalar literal. A leading sign is never part of
//      the literal: `-1` is Minus followed by IntLit(1).
//
//   3. Strings may use either single or double quotes and support the
//      escapes \\ \' \" \n \t.
//
//   4. Comments run from `#` to the end of the line.
//
//   5. Operators are matched longest first against `OPERATORS`, so `->`
//      wins over `-` and `<=` over `<`.

use crate::error::{Error, Result};
use crate::token::{keyword_lookup, Span, Token, TokenKind};

/// Operator and punctuation spellings, two-character forms first.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("->", TokenKind::Arrow),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    ("<=", TokenKind::LtEq),
    (">=", TokenKind::GtEq),
    ("&&", TokenKind::AmpAmp),
    ("||", TokenKind::PipePipe),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (";", TokenKind::Semi),
    (":", TokenKind::Colon),
    ("?", TokenKind::Question),
    ("=", TokenKind::Eq),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("^", TokenKind::Caret),
    ("!", TokenKind::Bang),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
];

/// Where a token started.
#[derive(Debug, Clone, Copy)]
struct Mark {
    pos: usize,
    line: usize,
    col: usize,
}

/// Scanner state over a source string.
pub struct Lexer<'src> {
    src: &'src str,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Scan the whole source. The final token is `Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        let mark = self.mark();

        let Some(ch) = self.current() else {
            return Ok(Token::new(TokenKind::Eof, self.span_from(mark)));
        };

        let kind = match ch {
            '"' | '\'' => self.string(ch, mark)?,
            '0'..='9' => self.number(mark)?,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.eat_while(|c| c.is_ascii_alphanumeric() || c == '_');
                keyword_lookup(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()))
            }
            _ => self.operator(ch, mark)?,
        };
        Ok(Token::new(kind, self.span_from(mark)))
    }

    // Cursor

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            col: self.col,
        }
    }

    fn span_from(&self, mark: Mark) -> Span {
        Span::new(mark.pos, self.pos - mark.pos, mark.line, mark.col)
    }

    fn rest(&self) -> &'src str {
        &self.src[self.pos..]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Step over one character. Columns count bytes.
    fn bump(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += ch.len_utf8();
        }
        Some(ch)
    }

    /// Consume characters while `pred` holds and return them.
    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> &'src str {
        let start = self.pos;
        while self.current().is_some_and(&pred) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.current() == Some(ch) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Whitespace and `#` comments.
    fn skip_trivia(&mut self) {
        loop {
            self.eat_while(|c| c.is_ascii_whitespace());
            if !self.eat('#') {
                return;
            }
            self.eat_while(|c| c != '\n');
        }
    }

    // Token classes

    fn operator(&mut self, ch: char, mark: Mark) -> Result<TokenKind> {
        let rest = self.rest();
        let Some((spelling, kind)) = OPERATORS.iter().find(|(op, _)| rest.starts_with(op)) else {
            self.bump();
            return Err(Error::syntax(
                format!("unexpected character '{ch}'"),
                self.span_from(mark),
            ));
        };
        for _ in 0..spelling.len() {
            self.bump();
        }
        Ok(kind.clone())
    }

    fn string(&mut self, quote: char, mark: Mark) -> Result<TokenKind> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(Error::syntax("unterminated string literal", self.span_from(mark)));
                }
                Some('\n') => {
                    return Err(Error::syntax("newline in string literal", self.span_from(mark)));
                }
                Some(c) if c == quote => return Ok(TokenKind::StringLit(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => {
                        return Err(Error::syntax(
                            "unterminated string literal",
                            self.span_from(mark),
                        ));
                    }
                },
                Some(c) => value.push(c),
            }
        }
    }

    /// `digits [. digits] [(e|E) [+|-] digits]`
    fn number(&mut self, mark: Mark) -> Result<TokenKind> {
        let is_digit = |c: char| c.is_ascii_digit();
        self.eat_while(is_digit);

        let mut scalar = false;
        let mut after_dot = self.rest().chars().skip(1);
        if self.current() == Some('.') && after_dot.next().is_some_and(is_digit) {
            scalar = true;
            self.bump();
            self.eat_while(is_digit);
        }
        if matches!(self.current(), Some('e' | 'E')) {
            scalar = true;
            self.bump();
            if !self.eat('+') {
                self.eat('-');
            }
            if self.eat_while(is_digit).is_empty() {
                return Err(self.invalid_number(mark));
            }
        }

        let raw = &self.src[mark.pos..self.pos];
        if scalar {
            raw.parse().map(TokenKind::FloatLit).map_err(|_| self.invalid_number(mark))
        } else {
            raw.parse().map(TokenKind::IntLit).map_err(|_| self.invalid_number(mark))
        }
    }

    fn invalid_number(&self, mark: Mark) -> Error {
        Error::syntax(
            format!("invalid number '{}'", &self.src[mark.pos..self.pos]),
            self.span_from(mark),
        )
    }
}
