// Validation — Structural and semantic checks on the syntax tree
//
// Validation catches errors the grammar alone cannot detect:
//
//   1. Flat restrictions — no fragments, invocation-only right-hand sides
//   2. Assignment targets — identifiers, arrays or tuples of identifiers
//   3. Fragment declarations — unique parameter names, constant defaults
//   4. Argument binding — positional/named matching, defaults, type checks
//
// Unlike the lowering pass, these checks never look at tensor shapes.

use std::collections::HashSet;

use crate::ast::{Arg, Assignment, Document, Expr, FragmentDef, UnaryOp};
use crate::error::{Error, Result};
use crate::graph::{Dictionary, Fragment, Param, Primitive, Prototype, ResultParam, Type, Value};
use crate::token::Span;

// Flat grammar

/// Reject everything the flat grammar variant does not allow.
pub fn check_flat(doc: &Document) -> Result<()> {
    if let Some(fragment) = doc.fragments.first() {
        return Err(Error::syntax(
            "fragment definitions are not allowed in flat syntax",
            fragment.span,
        ));
    }

    for assignment in &doc.graph.body {
        check_lhs(&assignment.lhs)?;
        match &assignment.rhs {
            Expr::Invocation { args, .. } => {
                for arg in args {
                    check_flat_argument(&arg.value)?;
                }
            }
            other => {
                return Err(Error::syntax(
                    "flat syntax only allows an invocation on the right-hand side",
                    other.span(),
                ));
            }
        }
    }
    Ok(())
}

fn check_flat_argument(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Integer(..)
        | Expr::Scalar(..)
        | Expr::Logical(..)
        | Expr::Str(..)
        | Expr::Identifier(..) => Ok(()),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
            ..
        } if matches!(**operand, Expr::Integer(..) | Expr::Scalar(..)) => Ok(()),
        Expr::Array(items, _) | Expr::Tuple(items, _) => {
            items.iter().try_for_each(check_flat_argument)
        }
        other => Err(Error::syntax(
            "flat syntax arguments must be literals, identifiers, arrays or tuples",
            other.span(),
        )),
    }
}

// Assignment targets

/// The left-hand side of an assignment: an identifier, or an array or tuple
/// of left-hand sides.
pub fn check_lhs(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Identifier(..) => Ok(()),
        Expr::Array(items, _) | Expr::Tuple(items, _) => items.iter().try_for_each(check_lhs),
        other => Err(Error::syntax(
            "left-hand side must be an identifier, or an array or tuple of identifiers",
            other.span(),
        )),
    }
}

/// Every identifier named on the left-hand side, in order.
pub fn lhs_names(expr: &Expr) -> Vec<(&str, Span)> {
    match expr {
        Expr::Identifier(name, span) => vec![(name.as_str(), *span)],
        Expr::Array(items, _) | Expr::Tuple(items, _) => items.iter().flat_map(lhs_names).collect(),
        _ => Vec::new(),
    }
}

// Fragment declarations

/// Resolve a parsed fragment definition into its prototype and body.
pub fn build_fragment(def: &FragmentDef) -> Result<Fragment> {
    let mut seen = HashSet::new();
    let mut params = Vec::with_capacity(def.params.len());
    let generic = def.generic.flatten();

    for param in &def.params {
        if !seen.insert(param.name.as_str()) {
            return Err(Error::semantic(
                format!("duplicate parameter '{}' in fragment '{}'", param.name, def.name),
                param.span,
            ));
        }
        let default = match &param.default {
            Some(expr) => {
                let value = fold_constant(expr)?;
                if !accepts(&param.ty, &value, generic) {
                    return Err(Error::semantic(
                        format!(
                            "default value {value} of parameter '{}' does not match type {}",
                            param.name, param.ty
                        ),
                        expr.span(),
                    ));
                }
                Some(value)
            }
            None => None,
        };
        params.push(Param {
            name: param.name.clone(),
            ty: param.ty.clone(),
            default,
        });
    }

    let mut results = Vec::with_capacity(def.results.len());
    for result in &def.results {
        if !seen.insert(result.name.as_str()) {
            return Err(Error::semantic(
                format!("duplicate result '{}' in fragment '{}'", result.name, def.name),
                result.span,
            ));
        }
        results.push(ResultParam {
            name: result.name.clone(),
            ty: result.ty.clone(),
        });
    }

    if let Some(body) = &def.body {
        check_fragment_body(def, body)?;
    }

    Ok(Fragment {
        proto: Prototype {
            name: def.name.clone(),
            generic: def.generic,
            params,
            results,
        },
        body: def.body.clone(),
    })
}

/// Results must be assigned exactly once, and parameters are read-only.
fn check_fragment_body(def: &FragmentDef, body: &[Assignment]) -> Result<()> {
    let mut assigned = HashSet::new();
    for assignment in body {
        check_lhs(&assignment.lhs)?;
        for (name, span) in lhs_names(&assignment.lhs) {
            if def.params.iter().any(|p| p.name == name) {
                return Err(Error::semantic(
                    format!("parameter '{name}' cannot be assigned"),
                    span,
                ));
            }
            if !assigned.insert(name) {
                return Err(Error::semantic(
                    format!("identifier '{name}' is already defined"),
                    span,
                ));
            }
        }
    }
    for result in &def.results {
        if !assigned.contains(result.name.as_str()) {
            return Err(Error::semantic(
                format!(
                    "result '{}' of fragment '{}' is never assigned",
                    result.name, def.name
                ),
                result.span,
            ));
        }
    }
    Ok(())
}

/// Evaluate a default-value expression. Only literals and their arrays,
/// tuples and negations are constant.
pub fn fold_constant(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Integer(n, _) => Ok(Value::Integer(*n)),
        Expr::Scalar(x, _) => Ok(Value::Scalar(*x)),
        Expr::Logical(b, _) => Ok(Value::Logical(*b)),
        Expr::Str(s, _) => Ok(Value::String(s.clone())),
        Expr::Array(items, _) => Ok(Value::Array(
            items.iter().map(fold_constant).collect::<Result<_>>()?,
        )),
        Expr::Tuple(items, _) => Ok(Value::Tuple(
            items.iter().map(fold_constant).collect::<Result<_>>()?,
        )),
        Expr::Unary { op, operand, span } => match (op, fold_constant(operand)?) {
            (UnaryOp::Neg, Value::Integer(n)) => n.checked_neg().map(Value::Integer).ok_or_else(|| {
                Error::semantic("integer overflow in constant expression", *span)
            }),
            (UnaryOp::Neg, Value::Scalar(x)) => Ok(Value::Scalar(-x)),
            (UnaryOp::Not, Value::Logical(b)) => Ok(Value::Logical(!b)),
            (op, value) => Err(Error::semantic(
                format!("operator '{}' cannot be applied to {}", op.symbol(), value.kind_name()),
                *span,
            )),
        },
        other => Err(Error::semantic(
            "default values must be constant expressions",
            other.span(),
        )),
    }
}

// Argument binding

/// Whether `value` is a valid argument for a parameter of type `ty`.
/// `generic` is the primitive bound to `?` for this invocation, if known.
pub fn accepts(ty: &Type, value: &Value, generic: Option<Primitive>) -> bool {
    match ty {
        Type::Primitive(p) => literal_matches(*p, value),
        Type::Generic => match generic {
            Some(p) => literal_matches(p, value),
            None => is_literal(value),
        },
        Type::Tensor(item) => match value {
            Value::Identifier(_) => true,
            _ => match item.or(generic) {
                Some(p) => literal_matches(p, value),
                None => is_literal(value),
            },
        },
        Type::Array(item) => match value {
            Value::Array(items) => items.iter().all(|v| accepts(item, v, generic)),
            _ => false,
        },
        Type::Tuple(types) => match value {
            Value::Tuple(items) => {
                types.len() == items.len()
                    && types.iter().zip(items).all(|(t, v)| accepts(t, v, generic))
            }
            _ => false,
        },
    }
}

fn literal_matches(prim: Primitive, value: &Value) -> bool {
    matches!(
        (prim, value),
        (Primitive::Integer, Value::Integer(_))
            | (Primitive::Scalar, Value::Scalar(_))
            | (Primitive::Logical, Value::Logical(_))
            | (Primitive::String, Value::String(_))
    )
}

fn is_literal(value: &Value) -> bool {
    matches!(
        value,
        Value::Integer(_) | Value::Scalar(_) | Value::Logical(_) | Value::String(_)
    )
}

/// Evaluated arguments of one invocation, in source order.
pub struct CallArgs {
    pub positional: Vec<(Value, Span)>,
    pub named: Vec<(String, Value, Span)>,
}

/// Positional arguments must come before named ones.
pub fn check_argument_order(args: &[Arg]) -> Result<()> {
    let mut seen_named = false;
    for arg in args {
        match arg.name {
            Some(_) => seen_named = true,
            None if seen_named => {
                return Err(Error::syntax(
                    "positional argument follows named argument",
                    arg.span,
                ));
            }
            None => {}
        }
    }
    Ok(())
}

/// Match arguments to the prototype's parameters.
///
/// Positional arguments fill parameters in declaration order; named ones
/// fill the rest; missing ones take their defaults. Unknown, duplicate and
/// missing arguments, and arguments of the wrong type, are errors.
pub fn bind_arguments(
    proto: &Prototype,
    args: CallArgs,
    generic: Option<Primitive>,
    span: Span,
) -> Result<Dictionary<Value>> {
    if args.positional.len() > proto.params.len() {
        let (_, extra_span) = &args.positional[proto.params.len()];
        return Err(Error::semantic(
            format!(
                "too many positional arguments for '{}' (expected at most {})",
                proto.name,
                proto.params.len()
            ),
            *extra_span,
        ));
    }

    let mut bound: Dictionary<(Value, Span)> = Dictionary::new();
    for (param, (value, arg_span)) in proto.params.iter().zip(args.positional) {
        bound.insert(param.name.clone(), (value, arg_span));
    }

    for (name, value, arg_span) in args.named {
        if proto.param(&name).is_none() {
            return Err(Error::semantic(
                format!("operation '{}' has no parameter '{name}'", proto.name),
                arg_span,
            ));
        }
        if bound.contains_key(&name) {
            return Err(Error::semantic(
                format!("argument '{name}' of '{}' is given more than once", proto.name),
                arg_span,
            ));
        }
        bound.insert(name, (value, arg_span));
    }

    let mut resolved = Dictionary::new();
    for param in &proto.params {
        let value = match bound.remove(&param.name) {
            Some((value, arg_span)) => {
                if !accepts(&param.ty, &value, generic) {
                    return Err(Error::semantic(
                        format!(
                            "argument '{}' of '{}' must be of type {}, found {value}",
                            param.name, proto.name, param.ty
                        ),
                        arg_span,
                    ));
                }
                value
            }
            None => match &param.default {
                Some(default) => default.clone(),
                None => {
                    return Err(Error::semantic(
                        format!("missing argument '{}' for '{}'", param.name, proto.name),
                        span,
                    ));
                }
            },
        };
        resolved.insert(param.name.clone(), value);
    }
    Ok(resolved)
}
