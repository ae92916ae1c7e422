// Integration tests for shape rules, argument binding and flat checks

use nnef_validator::graph::{Dictionary, Shape, Value};
use nnef_validator::shapes::{broadcast, infer, ResultShape};
use nnef_validator::stdlib::Library;
use nnef_validator::token::Span;
use nnef_validator::validate::{bind_arguments, check_flat, CallArgs};
use nnef_validator::{parse, ErrorKind};

fn ints(values: &[i64]) -> Value {
    Value::Array(values.iter().map(|&v| Value::Integer(v)).collect())
}

fn pairs(values: &[(i64, i64)]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|&(a, b)| Value::Tuple(vec![Value::Integer(a), Value::Integer(b)]))
            .collect(),
    )
}

fn tensor(name: &str) -> Value {
    Value::Identifier(name.to_string())
}

/// Bind `named` against the standard prototype of `op`, filling defaults.
fn bound(op: &str, named: Vec<(&str, Value)>) -> Dictionary<Value> {
    let library = Library::load(false).unwrap();
    let proto = &library.get(op).unwrap().proto;
    let span = Span::new(0, 1, 1, 1);
    let call = CallArgs {
        positional: Vec::new(),
        named: named
            .into_iter()
            .map(|(k, v)| (k.to_string(), v, span))
            .collect(),
    };
    bind_arguments(proto, call, proto.generic.flatten(), span).unwrap()
}

fn shapes(entries: &[(&str, &[usize])]) -> Dictionary<Shape> {
    entries
        .iter()
        .map(|(name, shape)| (name.to_string(), shape.to_vec()))
        .collect()
}

fn single(op: &str, args: Vec<(&str, Value)>, known: &Dictionary<Shape>) -> Shape {
    match infer(op, &bound(op, args), known).unwrap() {
        Some(results) => match &results[..] {
            [ResultShape::Single(shape)] => shape.clone(),
            other => panic!("expected a single result, got {other:?}"),
        },
        None => panic!("no rule for '{op}'"),
    }
}

// Broadcasting

#[test]
fn test_broadcast_left_aligned() {
    assert_eq!(broadcast(&[2, 3], &[2, 3]).unwrap(), vec![2, 3]);
    assert_eq!(broadcast(&[1, 3], &[4, 1]).unwrap(), vec![4, 3]);
    assert_eq!(broadcast(&[2, 3, 4], &[2]).unwrap(), vec![2, 3, 4]);
    assert_eq!(broadcast(&[], &[5]).unwrap(), vec![5]);
    assert!(broadcast(&[2, 3], &[3]).is_err());
}

// Primitive rules

#[test]
fn test_conv_same_and_explicit_padding() {
    let known = shapes(&[("x", &[1, 3, 32, 32]), ("w", &[16, 3, 3, 3])]);
    let same = single(
        "conv",
        vec![("input", tensor("x")), ("filter", tensor("w")), ("stride", ints(&[2, 2]))],
        &known,
    );
    assert_eq!(same, vec![1, 16, 16, 16]);

    let valid = single(
        "conv",
        vec![
            ("input", tensor("x")),
            ("filter", tensor("w")),
            ("padding", pairs(&[(0, 0), (0, 0)])),
        ],
        &known,
    );
    assert_eq!(valid, vec![1, 16, 30, 30]);
}

#[test]
fn test_conv_rejects_channel_mismatch() {
    let known = shapes(&[("x", &[1, 4, 8, 8]), ("w", &[8, 3, 3, 3])]);
    let args = bound("conv", vec![("input", tensor("x")), ("filter", tensor("w"))]);
    assert!(infer("conv", &args, &known).is_err());
}

#[test]
fn test_depthwise_conv() {
    let known = shapes(&[("x", &[1, 8, 10, 10]), ("w", &[8, 1, 3, 3])]);
    let out = single(
        "conv",
        vec![
            ("input", tensor("x")),
            ("filter", tensor("w")),
            ("groups", Value::Integer(0)),
            ("padding", pairs(&[(1, 1), (1, 1)])),
        ],
        &known,
    );
    assert_eq!(out, vec![1, 8, 10, 10]);
}

#[test]
fn test_max_pool() {
    let known = shapes(&[("x", &[1, 4, 8, 8])]);
    let out = single(
        "max_pool",
        vec![
            ("input", tensor("x")),
            ("size", ints(&[1, 1, 2, 2])),
            ("stride", ints(&[1, 1, 2, 2])),
            ("padding", pairs(&[(0, 0), (0, 0), (0, 0), (0, 0)])),
        ],
        &known,
    );
    assert_eq!(out, vec![1, 4, 4, 4]);
}

#[test]
fn test_matmul_with_transpose() {
    let known = shapes(&[("a", &[4, 16]), ("b", &[8, 16])]);
    let out = single(
        "matmul",
        vec![
            ("A", tensor("a")),
            ("B", tensor("b")),
            ("transposeB", Value::Logical(true)),
        ],
        &known,
    );
    assert_eq!(out, vec![4, 8]);

    let args = bound("matmul", vec![("A", tensor("a")), ("B", tensor("b"))]);
    assert!(infer("matmul", &args, &known).is_err());
}

#[test]
fn test_reduce_keeps_rank() {
    let known = shapes(&[("x", &[2, 3, 4])]);
    let out = single(
        "sum_reduce",
        vec![("input", tensor("x")), ("axes", ints(&[1, 2]))],
        &known,
    );
    assert_eq!(out, vec![2, 1, 1]);
}

#[test]
fn test_reshape_copy_and_infer() {
    let known = shapes(&[("x", &[2, 3, 4])]);
    let out = single(
        "reshape",
        vec![("input", tensor("x")), ("shape", ints(&[0, -1]))],
        &known,
    );
    assert_eq!(out, vec![2, 12]);

    let ranged = single(
        "reshape",
        vec![
            ("input", tensor("x")),
            ("shape", ints(&[12])),
            ("axis_start", Value::Integer(1)),
            ("axis_count", Value::Integer(2)),
        ],
        &known,
    );
    assert_eq!(ranged, vec![2, 12]);
}

#[test]
fn test_transpose_squeeze_unsqueeze() {
    let known = shapes(&[("x", &[1, 3, 5])]);
    assert_eq!(
        single("transpose", vec![("input", tensor("x")), ("axes", ints(&[2, 0, 1]))], &known),
        vec![5, 1, 3]
    );
    assert_eq!(
        single("squeeze", vec![("input", tensor("x")), ("axes", ints(&[0]))], &known),
        vec![3, 5]
    );
    assert_eq!(
        single("unsqueeze", vec![("input", tensor("x")), ("axes", ints(&[0, 3]))], &known),
        vec![1, 1, 3, 1, 5]
    );
}

#[test]
fn test_concat_and_pad() {
    let known = shapes(&[("a", &[2, 3]), ("b", &[2, 5])]);
    assert_eq!(
        single(
            "concat",
            vec![
                ("values", Value::Array(vec![tensor("a"), tensor("b")])),
                ("axis", Value::Integer(1)),
            ],
            &known
        ),
        vec![2, 8]
    );
    assert_eq!(
        single(
            "pad",
            vec![("input", tensor("a")), ("padding", pairs(&[(1, 1), (0, 2)]))],
            &known
        ),
        vec![4, 5]
    );
}

#[test]
fn test_split_yields_multiple() {
    let known = shapes(&[("x", &[6, 4])]);
    let args = bound(
        "split",
        vec![
            ("value", tensor("x")),
            ("axis", Value::Integer(0)),
            ("ratios", ints(&[1, 2])),
        ],
    );
    let results = infer("split", &args, &known).unwrap().unwrap();
    assert_eq!(
        results,
        vec![ResultShape::Multiple(vec![vec![2, 4], vec![4, 4]])]
    );
}

#[test]
fn test_external_requires_positive_extents() {
    let known = Dictionary::new();
    let args = bound("external", vec![("shape", ints(&[1, 0]))]);
    assert!(infer("external", &args, &known).is_err());
}

#[test]
fn test_compound_has_no_rule() {
    let known = shapes(&[("x", &[2])]);
    let args = bound("relu", vec![("x", tensor("x"))]);
    assert_eq!(infer("relu", &args, &known).unwrap(), None);
}

// Argument binding

#[test]
fn test_binding_fills_defaults() {
    let args = bound("matmul", vec![("A", tensor("a")), ("B", tensor("b"))]);
    assert_eq!(args["transposeA"], Value::Logical(false));
    assert_eq!(args["transposeB"], Value::Logical(false));
}

#[test]
fn test_binding_rejects_wrong_literal_type() {
    let library = Library::load(false).unwrap();
    let proto = &library.get("mul").unwrap().proto;
    let span = Span::new(0, 1, 1, 1);
    let call = CallArgs {
        positional: vec![(tensor("a"), span), (Value::Integer(2), span)],
        named: Vec::new(),
    };
    let err = bind_arguments(proto, call, None, span).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("must be of type"));
}

// Flat checks

#[test]
fn test_flat_accepts_negative_literals() {
    let doc = parse(
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = reshape(a, shape = [-1]); }",
    )
    .unwrap();
    assert!(check_flat(&doc).is_ok());
}

#[test]
fn test_flat_rejects_nested_invocation() {
    let doc = parse(
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = relu(exp(a)); }",
    )
    .unwrap();
    let err = check_flat(&doc).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert!(err.message.contains("arguments must be literals"));
}

// Oversized extents

const HUGE: usize = 1 << 32;

#[test]
fn test_constant_volume_overflow_is_an_error() {
    let known = Dictionary::new();
    let extent = HUGE as i64;
    let args = bound(
        "constant",
        vec![
            ("shape", ints(&[extent, extent, extent])),
            ("value", Value::Array(vec![Value::Scalar(0.0)])),
        ],
    );
    let err = infer("constant", &args, &known).unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[test]
fn test_reshape_volume_overflow_is_an_error() {
    let known = shapes(&[("x", &[HUGE, HUGE, HUGE])]);
    let args = bound("reshape", vec![("input", tensor("x")), ("shape", ints(&[-1]))]);
    assert!(infer("reshape", &args, &known).is_err());
}

#[test]
fn test_padding_overflow_is_an_error() {
    let known = shapes(&[("x", &[2])]);
    let args = bound(
        "pad",
        vec![("input", tensor("x")), ("padding", pairs(&[(i64::MAX, i64::MAX)]))],
    );
    assert!(infer("pad", &args, &known).is_err());
}

#[test]
fn test_dilated_window_overflow_is_an_error() {
    let known = shapes(&[("x", &[1, 8])]);
    let args = bound(
        "max_pool",
        vec![
            ("input", tensor("x")),
            ("size", ints(&[1, 4])),
            ("padding", pairs(&[(0, 0), (0, 0)])),
            ("dilation", ints(&[1, i64::MAX])),
        ],
    );
    assert!(infer("max_pool", &args, &known).is_err());
}

#[test]
fn test_split_ratio_sum_overflow_is_an_error() {
    let known = shapes(&[("x", &[6])]);
    let args = bound(
        "split",
        vec![
            ("value", tensor("x")),
            ("axis", Value::Integer(0)),
            ("ratios", ints(&[i64::MAX, i64::MAX, i64::MAX])),
        ],
    );
    assert!(infer("split", &args, &known).is_err());
}
