// Parser — Recursive descent parser for NNEF graph descriptions
//
// The parser consumes a Vec<Token> (from the Lexer) and produces an AST
// (Document), with one method per grammar production and a binding-power
// loop for binary operators.
//
// The parser accepts the union of both grammar variants. Restricting a
// document to the flat variant is a separate check (validate::check_flat)
// so both front ends share one syntax tree.
//
// ERROR RECOVERY: none. On error we return Err immediately; a parse stops
// at the first problem, matching how the validator reports exactly one
// parse error per run.
//
// OPERATOR PRECEDENCE (lowest to highest):
//   1. if-then-else (prefix form)
//   2. ||
//   3. &&
//   4. in
//   5. < <= > >= == !=
//   6. + -
//   7. * /
//   8. ^ (right-associative)
//   9. - ! (unary prefix)
//  10. [] (postfix: subscript, slice)

use crate::ast::*;
use crate::error::{Error, Result};
use crate::graph::{Primitive, Type};
use crate::token::{Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a full document: header, fragments, graph.
    pub fn parse_document(&mut self) -> Result<Document> {
        let version = self.parse_version()?;

        let mut extensions = Vec::new();
        while self.check(&TokenKind::Extension) {
            self.advance();
            loop {
                extensions.push(self.expect_ident()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semi)?;
        }

        let mut fragments = Vec::new();
        while self.check(&TokenKind::Fragment) {
            fragments.push(self.parse_fragment()?);
        }

        let graph = self.parse_graph()?;
        if !self.at_eof() {
            return Err(self.error_unexpected("end of input"));
        }

        Ok(Document {
            version,
            extensions,
            fragments,
            graph,
        })
    }

    /// Parse a sequence of fragment definitions with no header or graph.
    /// Used for the bundled standard and layer libraries.
    pub fn parse_fragment_list(&mut self) -> Result<Vec<FragmentDef>> {
        let mut fragments = Vec::new();
        while !self.at_eof() {
            fragments.push(self.parse_fragment()?);
        }
        Ok(fragments)
    }

    // version

    fn parse_version(&mut self) -> Result<f64> {
        self.expect(TokenKind::Version)?;
        let span = self.current_span();
        let version = match self.peek_kind() {
            TokenKind::FloatLit(v) => {
                self.advance();
                v
            }
            _ => return Err(self.error_unexpected("a version number")),
        };
        if version != 1.0 {
            return Err(Error::semantic(
                format!("unsupported version {version:?}"),
                span,
            ));
        }
        self.expect(TokenKind::Semi)?;
        Ok(version)
    }

    // fragment

    fn parse_fragment(&mut self) -> Result<FragmentDef> {
        let span = self.expect(TokenKind::Fragment)?.span;
        let name = self.expect_ident()?;

        let generic = if self.eat(&TokenKind::Lt) {
            self.expect(TokenKind::Question)?;
            let default = if self.eat(&TokenKind::Eq) {
                Some(self.parse_primitive()?)
            } else {
                None
            };
            self.expect(TokenKind::Gt)?;
            Some(default)
        } else {
            None
        };

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.parse_param_def()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        self.expect(TokenKind::Arrow)?;
        self.expect(TokenKind::LParen)?;
        let mut results = Vec::new();
        loop {
            let span = self.current_span();
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            results.push(ResultDef { name, ty, span });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = if self.eat(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_block()?)
        };

        Ok(FragmentDef {
            name,
            generic,
            params,
            results,
            body,
            span,
        })
    }

    fn parse_param_def(&mut self) -> Result<ParamDef> {
        let span = self.current_span();
        let name = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let default = if self.eat(&TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(ParamDef {
            name,
            ty,
            default,
            span,
        })
    }

    // Type expressions

    fn parse_type(&mut self) -> Result<Type> {
        let mut ty = match self.peek_kind() {
            TokenKind::Tensor => {
                self.advance();
                if self.eat(&TokenKind::Lt) {
                    let item = if self.eat(&TokenKind::Question) {
                        None
                    } else if self.check(&TokenKind::Gt) {
                        None
                    } else {
                        Some(self.parse_primitive()?)
                    };
                    self.expect(TokenKind::Gt)?;
                    Type::Tensor(item)
                } else {
                    Type::Tensor(None)
                }
            }
            TokenKind::Question => {
                self.advance();
                Type::Generic
            }
            TokenKind::LParen => {
                self.advance();
                let mut items = vec![self.parse_type()?];
                while self.eat(&TokenKind::Comma) {
                    items.push(self.parse_type()?);
                }
                self.expect(TokenKind::RParen)?;
                Type::Tuple(items)
            }
            ref kind if kind.is_primitive_type() => Type::Primitive(self.parse_primitive()?),
            _ => return Err(self.error_unexpected("a type")),
        };

        // Array suffixes: `integer[]`, `tensor<>[][]`
        while self.check(&TokenKind::LBracket) && self.peek_ahead_kind(1) == TokenKind::RBracket {
            self.advance();
            self.advance();
            ty = Type::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn parse_primitive(&mut self) -> Result<Primitive> {
        let prim = match self.peek_kind() {
            TokenKind::Integer => Primitive::Integer,
            TokenKind::Scalar => Primitive::Scalar,
            TokenKind::Logical => Primitive::Logical,
            TokenKind::String => Primitive::String,
            _ => return Err(self.error_unexpected("a primitive type")),
        };
        self.advance();
        Ok(prim)
    }

    // graph

    fn parse_graph(&mut self) -> Result<GraphDef> {
        let span = self.expect(TokenKind::Graph)?.span;
        let name = self.expect_ident()?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_ident_list()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        self.expect(TokenKind::LParen)?;
        let results = self.parse_ident_list()?;
        self.expect(TokenKind::RParen)?;

        let body = self.parse_block()?;
        Ok(GraphDef {
            name,
            params,
            results,
            body,
            span,
        })
    }

    fn parse_ident_list(&mut self) -> Result<Vec<(String, Span)>> {
        let mut names = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(names);
        }
        loop {
            let span = self.current_span();
            names.push((self.expect_ident()?, span));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(names)
    }

    /// `{ assignment* }`
    fn parse_block(&mut self) -> Result<Vec<Assignment>> {
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_eof() {
                return Err(self.error_unexpected("'}'"));
            }
            body.push(self.parse_assignment()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_assignment(&mut self) -> Result<Assignment> {
        let span = self.current_span();
        let lhs = self.parse_expr()?;
        self.expect(TokenKind::Eq)?;
        let rhs = self.parse_expr()?;
        self.expect(TokenKind::Semi)?;
        Ok(Assignment { lhs, rhs, span })
    }

    // Expressions (Pratt parser with precedence climbing)

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_bp(0)
    }

    /// Pratt parser: parse expression with minimum binding power `min_bp`.
    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let (op, bp) = match self.peek_kind() {
                TokenKind::PipePipe => (BinOp::Or, (1, 2)),
                TokenKind::AmpAmp => (BinOp::And, (3, 4)),
                TokenKind::In => (BinOp::In, (5, 6)),
                TokenKind::Lt => (BinOp::Lt, (7, 8)),
                TokenKind::Gt => (BinOp::Gt, (7, 8)),
                TokenKind::LtEq => (BinOp::Le, (7, 8)),
                TokenKind::GtEq => (BinOp::Ge, (7, 8)),
                TokenKind::EqEq => (BinOp::Eq, (7, 8)),
                TokenKind::BangEq => (BinOp::Ne, (7, 8)),
                TokenKind::Plus => (BinOp::Add, (9, 10)),
                TokenKind::Minus => (BinOp::Sub, (9, 10)),
                TokenKind::Star => (BinOp::Mul, (11, 12)),
                TokenKind::Slash => (BinOp::Div, (11, 12)),
                TokenKind::Caret => (BinOp::Pow, (14, 13)), // right-assoc
                _ => break,
            };

            let (l_bp, r_bp) = bp;
            if l_bp < min_bp {
                break;
            }

            let span = self.advance().span;
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = Expr::Binary {
                left: Box::new(lhs),
                op,
                right: Box::new(rhs),
                span,
            };
        }

        Ok(lhs)
    }

    /// Parse a prefix expression (unary, select, or postfix-primary).
    fn parse_prefix(&mut self) -> Result<Expr> {
        let span = self.current_span();
        match self.peek_kind() {
            TokenKind::Minus | TokenKind::Bang => {
                let op = if self.advance().kind == TokenKind::Minus {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Not
                };
                let operand = self.parse_expr_bp(15)?; // unary binds tighter than binary
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                    span,
                })
            }
            TokenKind::If => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Then)?;
                let then_branch = self.parse_expr()?;
                self.expect(TokenKind::Else)?;
                let else_branch = self.parse_expr()?;
                Ok(Expr::Select {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                    span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    /// Primary followed by any number of `[index]` / `[start:end]` suffixes.
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.check(&TokenKind::LBracket) {
            let span = self.advance().span;
            let start = if self.check(&TokenKind::Colon) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            if self.eat(&TokenKind::Colon) {
                let end = if self.check(&TokenKind::RBracket) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Slice {
                    object: Box::new(expr),
                    start,
                    end,
                    span,
                };
            } else {
                self.expect(TokenKind::RBracket)?;
                let Some(index) = start else {
                    return Err(Error::syntax("missing subscript index", span));
                };
                expr = Expr::Subscript {
                    object: Box::new(expr),
                    index,
                    span,
                };
            }
        }
        Ok(expr)
    }

    /// Parse a primary expression (literals, identifiers, invocations, etc.).
    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.current_span();
        match self.peek_kind() {
            TokenKind::IntLit(n) => {
                self.advance();
                Ok(Expr::Integer(n, span))
            }
            TokenKind::FloatLit(x) => {
                self.advance();
                Ok(Expr::Scalar(x, span))
            }
            TokenKind::StringLit(s) => {
                self.advance();
                Ok(Expr::Str(s, span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Logical(true, span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Logical(false, span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if let Some(func) = Builtin::lookup(&name) {
                    if self.check(&TokenKind::LParen) {
                        return self.parse_builtin_call(func, span);
                    }
                }
                if self.check(&TokenKind::LParen) {
                    self.advance();
                    let args = self.parse_arg_list()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::Invocation {
                        name,
                        type_arg: None,
                        args,
                        span,
                    });
                }
                if self.at_type_argument() {
                    self.advance(); // <
                    let type_arg = self.parse_primitive()?;
                    self.expect(TokenKind::Gt)?;
                    self.expect(TokenKind::LParen)?;
                    let args = self.parse_arg_list()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::Invocation {
                        name,
                        type_arg: Some(type_arg),
                        args,
                        span,
                    });
                }
                Ok(Expr::Identifier(name, span))
            }
            ref kind if kind.is_primitive_type() && self.peek_ahead_kind(1) == TokenKind::LParen => {
                let prim = self.parse_primitive()?;
                self.parse_builtin_call(Builtin::conversion(prim), span)
            }
            TokenKind::LBracket => {
                self.advance();
                if self.check(&TokenKind::For) {
                    return self.parse_comprehension(span);
                }
                let items = self.parse_expr_list(&TokenKind::RBracket)?;
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::Array(items, span))
            }
            TokenKind::LParen => {
                self.advance();
                let first = self.parse_expr()?;
                if self.eat(&TokenKind::Comma) {
                    let mut items = vec![first];
                    items.extend(self.parse_expr_list(&TokenKind::RParen)?);
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::Tuple(items, span))
                } else {
                    self.expect(TokenKind::RParen)?;
                    Ok(first)
                }
            }
            _ => Err(self.error_unexpected("an expression")),
        }
    }

    /// `name < primitive > (` is a generic invocation, as opposed to a comparison.
    fn at_type_argument(&self) -> bool {
        self.check(&TokenKind::Lt)
            && self.peek_ahead_kind(1).is_primitive_type()
            && self.peek_ahead_kind(2) == TokenKind::Gt
            && self.peek_ahead_kind(3) == TokenKind::LParen
    }

    fn parse_builtin_call(&mut self, func: Builtin, span: Span) -> Result<Expr> {
        self.expect(TokenKind::LParen)?;
        let arg = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Builtin {
            func,
            arg: Box::new(arg),
            span,
        })
    }

    /// `[for i in xs, j in ys if cond yield body]`, after the opening bracket.
    fn parse_comprehension(&mut self, span: Span) -> Result<Expr> {
        self.expect(TokenKind::For)?;
        let mut iterators = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect(TokenKind::In)?;
            // Above `in` so the iterable can't swallow a membership test.
            let iterable = self.parse_expr_bp(7)?;
            iterators.push((name, iterable));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let condition = if self.eat(&TokenKind::If) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect(TokenKind::Yield)?;
        let body = self.parse_expr()?;
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Comprehension {
            iterators,
            condition,
            body: Box::new(body),
            span,
        })
    }

    fn parse_arg_list(&mut self) -> Result<Vec<Arg>> {
        let mut args = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_arg(&mut self) -> Result<Arg> {
        let span = self.current_span();
        // Named arg: key = expr
        if let TokenKind::Ident(name) = self.peek_kind() {
            if self.peek_ahead_kind(1) == TokenKind::Eq {
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                return Ok(Arg {
                    name: Some(name),
                    value,
                    span,
                });
            }
        }
        let value = self.parse_expr()?;
        Ok(Arg {
            name: None,
            value,
            span,
        })
    }

    /// Comma-separated expressions up to (not including) `close`.
    fn parse_expr_list(&mut self, close: &TokenKind) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.check(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    // Token stream helpers

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind.clone()
    }

    fn peek_ahead_kind(&self, offset: usize) -> TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        self.tokens[idx].kind.clone()
    }

    fn current_span(&self) -> Span {
        self.peek().span
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    /// Consume the current token if it matches `kind`.
    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error_unexpected(&kind.to_string()))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek_kind() {
            TokenKind::Ident(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.error_unexpected("an identifier")),
        }
    }

    fn error_unexpected(&self, expected: &str) -> Error {
        Error::syntax(
            format!("expected {expected}, found {}", self.peek_kind()),
            self.current_span(),
        )
    }
}

// Public convenience functions

/// Parse an NNEF source string into a Document.
pub fn parse(source: &str) -> Result<Document> {
    let tokens = crate::lexer::Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_document()
}

/// Parse a source string holding only fragment definitions.
pub fn parse_fragments(source: &str) -> Result<Vec<FragmentDef>> {
    let tokens = crate::lexer::Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_fragment_list()
}
