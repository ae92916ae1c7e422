// AST — Abstract Syntax Tree for NNEF graph descriptions
//
// Every node in the AST corresponds to a production in the grammar.
// The AST is purely syntactic. Argument binding, shape inference and
// fragment expansion all happen in the lowering pass.
//
// DESIGN: Every node stores a Span for error reporting back to the user.
// Type annotations are already resolved to `graph::Type` here since the
// type grammar has no names to look up.

use crate::graph::{Primitive, Type};
use crate::token::Span;

// Top-level document

/// A complete NNEF document: header, optional fragments, one graph.
#[derive(Debug, Clone)]
pub struct Document {
    pub version: f64,
    pub extensions: Vec<String>,
    pub fragments: Vec<FragmentDef>,
    pub graph: GraphDef,
}

// Fragment definitions

/// `fragment name<? = scalar>( params ) -> ( results ) { body }`
///
/// A declaration without a body ends in `;` instead of a block.
#[derive(Debug, Clone)]
pub struct FragmentDef {
    pub name: String,
    /// `Some` when the fragment is generic; the inner value is the default
    /// type bound to `?` when an invocation supplies none.
    pub generic: Option<Option<Primitive>>,
    pub params: Vec<ParamDef>,
    pub results: Vec<ResultDef>,
    pub body: Option<Vec<Assignment>>,
    pub span: Span,
}

/// `name: type = default`
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub ty: Type,
    pub default: Option<Expr>,
    pub span: Span,
}

/// `name: type`
#[derive(Debug, Clone)]
pub struct ResultDef {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

// Graph definition

/// `graph name( inputs ) -> ( outputs ) { assignments }`
#[derive(Debug, Clone)]
pub struct GraphDef {
    pub name: String,
    pub params: Vec<(String, Span)>,
    pub results: Vec<(String, Span)>,
    pub body: Vec<Assignment>,
    pub span: Span,
}

/// `lhs = rhs;`
#[derive(Debug, Clone)]
pub struct Assignment {
    pub lhs: Expr,
    pub rhs: Expr,
    pub span: Span,
}

// Expressions

#[derive(Debug, Clone)]
pub enum Expr {
    /// Integer literal: `42`
    Integer(i64, Span),
    /// Scalar literal: `0.5`
    Scalar(f64, Span),
    /// `true` / `false`
    Logical(bool, Span),
    /// String literal: `'same'`
    Str(String, Span),
    /// Identifier: `input`
    Identifier(String, Span),
    /// `[a, b, c]`
    Array(Vec<Expr>, Span),
    /// `(a, b)`
    Tuple(Vec<Expr>, Span),
    /// `-x`, `!c`
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    /// `a + b`; the span is the operator token's.
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        span: Span,
    },
    /// `if c then a else b`
    Select {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        span: Span,
    },
    /// `[for i in xs, j in ys if c yield e]`
    Comprehension {
        iterators: Vec<(String, Expr)>,
        condition: Option<Box<Expr>>,
        body: Box<Expr>,
        span: Span,
    },
    /// `xs[i]`
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// `xs[i:j]`, either bound optional.
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        span: Span,
    },
    /// `shape_of(x)`, `integer(s)`, ...
    Builtin {
        func: Builtin,
        arg: Box<Expr>,
        span: Span,
    },
    /// `conv(input, filter, stride = [2, 2])`; the span is the name token's.
    Invocation {
        name: String,
        type_arg: Option<Primitive>,
        args: Vec<Arg>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Integer(_, s)
            | Expr::Scalar(_, s)
            | Expr::Logical(_, s)
            | Expr::Str(_, s)
            | Expr::Identifier(_, s)
            | Expr::Array(_, s)
            | Expr::Tuple(_, s) => *s,
            Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Select { span, .. }
            | Expr::Comprehension { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Slice { span, .. }
            | Expr::Builtin { span, .. }
            | Expr::Invocation { span, .. } => *span,
        }
    }

    /// Collect every identifier name mentioned in this expression.
    pub fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Identifier(name, _) => out.push(name),
            Expr::Integer(..) | Expr::Scalar(..) | Expr::Logical(..) | Expr::Str(..) => {}
            Expr::Array(items, _) | Expr::Tuple(items, _) => {
                for item in items {
                    item.collect_identifiers(out);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_identifiers(out),
            Expr::Binary { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Expr::Select {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                cond.collect_identifiers(out);
                then_branch.collect_identifiers(out);
                else_branch.collect_identifiers(out);
            }
            Expr::Comprehension {
                iterators,
                condition,
                body,
                ..
            } => {
                for (name, iterable) in iterators {
                    out.push(name);
                    iterable.collect_identifiers(out);
                }
                if let Some(cond) = condition {
                    cond.collect_identifiers(out);
                }
                body.collect_identifiers(out);
            }
            Expr::Subscript { object, index, .. } => {
                object.collect_identifiers(out);
                index.collect_identifiers(out);
            }
            Expr::Slice {
                object, start, end, ..
            } => {
                object.collect_identifiers(out);
                for bound in [start, end].into_iter().flatten() {
                    bound.collect_identifiers(out);
                }
            }
            Expr::Builtin { arg, .. } => arg.collect_identifiers(out),
            Expr::Invocation { args, .. } => {
                for arg in args {
                    arg.value.collect_identifiers(out);
                }
            }
        }
    }
}

/// Named or positional argument.
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
    pub span: Span,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    In,
}

impl BinOp {
    /// The operation invoked when either operand is a tensor.
    /// `in` has no tensor counterpart.
    pub fn fragment_name(self) -> Option<&'static str> {
        Some(match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Pow => "pow",
            BinOp::Lt => "lt",
            BinOp::Gt => "gt",
            BinOp::Le => "le",
            BinOp::Ge => "ge",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::In => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::In => "in",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn fragment_name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// Built-in attribute functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ShapeOf,
    LengthOf,
    RangeOf,
    ToInteger,
    ToScalar,
    ToLogical,
    ToString,
}

impl Builtin {
    /// Builtins spelled as identifiers.
    pub fn lookup(name: &str) -> Option<Builtin> {
        match name {
            "shape_of" => Some(Builtin::ShapeOf),
            "length_of" => Some(Builtin::LengthOf),
            "range_of" => Some(Builtin::RangeOf),
            _ => None,
        }
    }

    /// Conversion builtins spelled as type keywords.
    pub fn conversion(prim: Primitive) -> Builtin {
        match prim {
            Primitive::Integer => Builtin::ToInteger,
            Primitive::Scalar => Builtin::ToScalar,
            Primitive::Logical => Builtin::ToLogical,
            Primitive::String => Builtin::ToString,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::ShapeOf => "shape_of",
            Builtin::LengthOf => "length_of",
            Builtin::RangeOf => "range_of",
            Builtin::ToInteger => "integer",
            Builtin::ToScalar => "scalar",
            Builtin::ToLogical => "logical",
            Builtin::ToString => "string",
        }
    }
}
