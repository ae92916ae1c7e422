// Graph model — Types, values and prototypes produced by semantic resolution
//
// This is the read-only view the callback protocol hands to consumers:
//
//   - Prototype: an operation (or the graph itself) with ordered params and results
//   - Value:     a concrete argument (literal, tensor identifier, array, tuple)
//   - Shape:     dimension sizes of a tensor
//   - Dictionary: name-indexed lookup for arguments and shapes
//
// ARCHITECTURE:
//   AST (from parser) ► Lowering ► Callback::operation(&Prototype, &Dictionary<Value>, &Dictionary<Shape>)

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::Assignment;

/// Name-indexed lookup table.
pub type Dictionary<T> = BTreeMap<String, T>;

/// Tensor dimension sizes, outermost first.
pub type Shape = Vec<usize>;

// Types

/// Primitive attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Integer,
    Scalar,
    Logical,
    String,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Integer => write!(f, "integer"),
            Primitive::Scalar => write!(f, "scalar"),
            Primitive::Logical => write!(f, "logical"),
            Primitive::String => write!(f, "string"),
        }
    }
}

/// A declared parameter or result type.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Primitive(Primitive),
    /// `?`, bound by the invocation's type argument.
    Generic,
    /// `tensor<scalar>`; `None` for `tensor<?>` or a bare `tensor`.
    Tensor(Option<Primitive>),
    Array(Box<Type>),
    Tuple(Vec<Type>),
}

impl Type {
    /// Whether values of this type are (or contain) tensors.
    pub fn is_tensor(&self) -> bool {
        match self {
            Type::Tensor(_) => true,
            Type::Array(item) => item.is_tensor(),
            Type::Tuple(items) => items.iter().any(Type::is_tensor),
            Type::Primitive(_) | Type::Generic => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Generic => write!(f, "?"),
            Type::Tensor(Some(p)) => write!(f, "tensor<{p}>"),
            Type::Tensor(None) => write!(f, "tensor<?>"),
            Type::Array(item) => write!(f, "{item}[]"),
            Type::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// Values

/// A resolved argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Scalar(f64),
    Logical(bool),
    String(String),
    /// Reference to a named tensor.
    Identifier(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
}

impl Value {
    /// Whether the value is, or contains, a tensor reference.
    pub fn is_tensor(&self) -> bool {
        match self {
            Value::Identifier(_) => true,
            Value::Array(items) | Value::Tuple(items) => items.iter().any(Value::is_tensor),
            _ => false,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_logical(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Value::Identifier(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// An array of integers, as found in `shape`, `axes`, `stride` etc.
    pub fn as_integers(&self) -> Option<Vec<i64>> {
        match self {
            Value::Array(items) => items.iter().map(Value::as_integer).collect(),
            _ => None,
        }
    }

    /// Every tensor identifier inside this value, in order.
    pub fn identifiers(&self) -> Vec<&str> {
        match self {
            Value::Identifier(name) => vec![name.as_str()],
            Value::Array(items) | Value::Tuple(items) => {
                items.iter().flat_map(Value::identifiers).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Short description of the value's kind for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Scalar(_) => "scalar",
            Value::Logical(_) => "logical",
            Value::String(_) => "string",
            Value::Identifier(_) => "tensor",
            Value::Array(_) => "array",
            Value::Tuple(_) => "tuple",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Scalar(x) => write!(f, "{x:?}"),
            Value::Logical(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::Identifier(name) => write!(f, "{name}"),
            Value::Array(items) => {
                write!(f, "[")?;
                join(f, items)?;
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                join(f, items)?;
                write!(f, ")")
            }
        }
    }
}

// Prototypes

/// A declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub default: Option<Value>,
}

/// A declared result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultParam {
    pub name: String,
    pub ty: Type,
}

/// Signature of an operation, or the declaration of the graph itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    /// `Some` for generic fragments; holds the default type argument.
    pub generic: Option<Option<Primitive>>,
    pub params: Vec<Param>,
    pub results: Vec<ResultParam>,
}

impl Prototype {
    /// The graph declaration: tensor inputs and outputs.
    pub fn graph(name: &str, params: &[String], results: &[String]) -> Self {
        Self {
            name: name.to_string(),
            generic: None,
            params: params
                .iter()
                .map(|p| Param {
                    name: p.clone(),
                    ty: Type::Tensor(None),
                    default: None,
                })
                .collect(),
            results: results
                .iter()
                .map(|r| ResultParam {
                    name: r.clone(),
                    ty: Type::Tensor(None),
                })
                .collect(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }
}

// Fragments

/// A resolved fragment: its prototype plus, for compound fragments, the body
/// the lowering pass expands.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub proto: Prototype,
    pub body: Option<Vec<Assignment>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_arrays_count_as_tensor() {
        assert!(Type::Array(Box::new(Type::Tensor(None))).is_tensor());
        assert!(!Type::Array(Box::new(Type::Primitive(Primitive::Integer))).is_tensor());
    }

    #[test]
    fn test_value_display() {
        let v = Value::Array(vec![
            Value::Tuple(vec![Value::Integer(0), Value::Integer(1)]),
            Value::Scalar(1.0),
            Value::String("same".into()),
            Value::Identifier("x".into()),
        ]);
        assert_eq!(v.to_string(), "[(0, 1), 1.0, 'same', x]");
    }
}
