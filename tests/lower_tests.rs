// Integration tests for lowering: evaluation, expansion and the callback protocol

use std::cell::Cell;
use std::collections::HashMap;

use nnef_validator::graph::{Dictionary, Prototype, Shape, Value};
use nnef_validator::printer::render_operation;
use nnef_validator::{AtomicPolicy, Callback, CompParser, Error, ErrorKind, FlatParser, Parser};

/// Records every event as a line of text.
#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    shapes: Dictionary<Shape>,
    overrides: HashMap<String, bool>,
    atomic_queries: Cell<usize>,
}

impl Recorder {
    fn with_overrides(pairs: &[(&str, bool)]) -> Self {
        Self {
            overrides: pairs.iter().map(|(n, a)| (n.to_string(), *a)).collect(),
            ..Self::default()
        }
    }

    fn operations(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| !e.starts_with("begin") && !e.starts_with("end"))
            .map(String::as_str)
            .collect()
    }
}

impl Callback for Recorder {
    fn begin_graph(&mut self, proto: &Prototype) -> nnef_validator::Result<()> {
        self.events.push(format!("begin {}", proto.name));
        Ok(())
    }

    fn operation(
        &mut self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        _shapes: &Dictionary<Shape>,
    ) -> nnef_validator::Result<()> {
        self.events.push(render_operation(proto, args));
        Ok(())
    }

    fn end_graph(
        &mut self,
        proto: &Prototype,
        shapes: &Dictionary<Shape>,
    ) -> nnef_validator::Result<()> {
        self.events.push(format!("end {}", proto.name));
        self.shapes = shapes.clone();
        Ok(())
    }

    fn is_atomic(
        &self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        defaults: &dyn AtomicPolicy,
    ) -> bool {
        self.atomic_queries.set(self.atomic_queries.get() + 1);
        match self.overrides.get(&proto.name) {
            Some(&atomic) => atomic,
            None => defaults.is_atomic(proto, args),
        }
    }
}

fn run_comp(src: &str, recorder: &mut Recorder) -> Result<(), Error> {
    let mut parser = CompParser::new(false).unwrap();
    parser.parse(&mut src.as_bytes(), recorder)
}

fn comp(src: &str) -> Recorder {
    let mut recorder = Recorder::default();
    run_comp(src, &mut recorder).unwrap();
    recorder
}

fn comp_err(src: &str) -> Error {
    let mut recorder = Recorder::default();
    run_comp(src, &mut recorder).unwrap_err()
}

const CONV_NET: &str = r#"
version 1.0;

graph Net( input ) -> ( output )
{
    input = external(shape = [1, 3, 8, 8]);
    filter = variable(shape = [4, 3, 3, 3], label = 'filter');
    conv1 = conv(input, filter);
    output = relu(conv1);
}
"#;

// Flat grammar

#[test]
fn test_flat_reports_every_operation_in_order() {
    let mut recorder = Recorder::default();
    let mut parser = FlatParser::new().unwrap();
    parser.parse(&mut CONV_NET.as_bytes(), &mut recorder).unwrap();

    assert_eq!(
        recorder.events,
        vec![
            "begin Net",
            "input = external(shape = [1, 3, 8, 8])",
            "filter = variable(shape = [4, 3, 3, 3], label = 'filter')",
            "conv1 = conv(input, filter, 0.0, border = 'constant', padding = [], stride = [], dilation = [], groups = 1)",
            "output = relu(conv1)",
            "end Net",
        ]
    );
    assert_eq!(recorder.shapes["conv1"], vec![1, 4, 8, 8]);
    assert_eq!(recorder.shapes["output"], vec![1, 4, 8, 8]);
}

#[test]
fn test_flat_never_asks_about_atomicity() {
    let mut recorder = Recorder::with_overrides(&[("relu", false)]);
    let mut parser = FlatParser::new().unwrap();
    parser.parse(&mut CONV_NET.as_bytes(), &mut recorder).unwrap();
    assert_eq!(recorder.atomic_queries.get(), 0);
    assert_eq!(recorder.operations().last(), Some(&"output = relu(conv1)"));
}

#[test]
fn test_flat_rejects_fragments() {
    let src = r#"
        version 1.0;
        fragment f( x: tensor<scalar> ) -> ( y: tensor<scalar> ) { y = x; }
        graph G() -> () {}
    "#;
    let mut parser = FlatParser::new().unwrap();
    let err = parser
        .parse(&mut src.as_bytes(), &mut Recorder::default())
        .unwrap_err();
    assert!(err.message.contains("fragment definitions are not allowed"));
}

#[test]
fn test_flat_rejects_operators() {
    let src = "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = a + a; }";
    let mut parser = FlatParser::new().unwrap();
    let err = parser
        .parse(&mut src.as_bytes(), &mut Recorder::default())
        .unwrap_err();
    assert!(err.message.contains("only allows an invocation"));
}

// Compositional grammar

#[test]
fn test_standard_compound_stays_atomic_by_default() {
    let recorder = comp(CONV_NET);
    assert_eq!(recorder.operations().last(), Some(&"output = relu(conv1)"));
    assert!(recorder.atomic_queries.get() > 0);
}

#[test]
fn test_override_expands_standard_compound() {
    let mut recorder = Recorder::with_overrides(&[("relu", false)]);
    run_comp(CONV_NET, &mut recorder).unwrap();
    assert_eq!(
        recorder.operations().last(),
        Some(&"output = max(conv1, 0.0)")
    );
    assert_eq!(recorder.shapes["output"], vec![1, 4, 8, 8]);
}

#[test]
fn test_operators_become_invocations() {
    let recorder = comp(
        r#"
        version 1.0;
        graph G( a, b ) -> ( c )
        {
            a = external(shape = [2, 3]);
            b = external(shape = [2, 3]);
            c = a * 2.0 + b;
        }
    "#,
    );
    assert_eq!(
        recorder.operations(),
        vec![
            "a = external(shape = [2, 3])",
            "b = external(shape = [2, 3])",
            "t1 = mul(a, 2.0)",
            "c = add(t1, b)",
        ]
    );
    assert_eq!(recorder.shapes["t1"], vec![2, 3]);
}

#[test]
fn test_generated_names_avoid_source_identifiers() {
    let recorder = comp(
        r#"
        version 1.0;
        graph G( t1 ) -> ( out )
        {
            t1 = external(shape = [2]);
            out = t1 * 2.0 + t1;
        }
    "#,
    );
    assert_eq!(
        &recorder.operations()[1..],
        &["t2 = mul(t1, 2.0)", "out = add(t2, t1)"]
    );
}

#[test]
fn test_user_fragment_is_expanded() {
    let recorder = comp(
        r#"
        version 1.0;
        fragment shifted( x: tensor<scalar>, k: scalar ) -> ( y: tensor<scalar> )
        {
            y = x + k;
        }
        graph G( a ) -> ( b )
        {
            a = external(shape = [4]);
            b = shifted(a, k = 1.5);
        }
    "#,
    );
    assert_eq!(recorder.operations()[1], "b = add(a, 1.5)");
}

#[test]
fn test_atomic_user_fragment_is_silent_inside() {
    let mut recorder = Recorder::with_overrides(&[("shifted", true)]);
    run_comp(
        r#"
        version 1.0;
        fragment shifted( x: tensor<scalar>, k: scalar ) -> ( y: tensor<scalar> )
        {
            y = x + k;
        }
        graph G( a ) -> ( b )
        {
            a = external(shape = [4]);
            b = shifted(a, k = 1.5);
        }
    "#,
        &mut recorder,
    )
    .unwrap();
    assert_eq!(
        recorder.operations(),
        vec!["a = external(shape = [4])", "b = shifted(a, k = 1.5)"]
    );
    assert_eq!(recorder.shapes["b"], vec![4]);
    assert_eq!(recorder.shapes.len(), 2);
}

#[test]
fn test_bodyless_user_fragment_follows_first_tensor() {
    let recorder = comp(
        r#"
        version 1.0;
        fragment custom( x: tensor<scalar>, gain: scalar = 1.0 ) -> ( y: tensor<scalar> );
        graph G( a ) -> ( b )
        {
            a = external(shape = [3, 5]);
            b = custom(a);
        }
    "#,
    );
    assert_eq!(recorder.operations()[1], "b = custom(a, gain = 1.0)");
    assert_eq!(recorder.shapes["b"], vec![3, 5]);
}

#[test]
fn test_assigning_identifier_copies() {
    let recorder = comp(
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = a; }",
    );
    assert_eq!(recorder.operations()[1], "b = copy(a)");
}

#[test]
fn test_assigning_literal_makes_constant() {
    let recorder = comp("version 1.0; graph G() -> ( c ) { c = 1.0; }");
    assert_eq!(
        recorder.operations(),
        vec!["c = constant(shape = [], value = [1.0])"]
    );
    assert_eq!(recorder.shapes["c"], Vec::<usize>::new());
}

#[test]
fn test_split_into_array_lhs() {
    let recorder = comp(
        r#"
        version 1.0;
        graph G( a ) -> ( p, q )
        {
            a = external(shape = [4, 6]);
            [p, q] = split(a, axis = 1, ratios = [1, 2]);
        }
    "#,
    );
    assert_eq!(
        recorder.operations()[1],
        "[p, q] = split(a, axis = 1, ratios = [1, 2])"
    );
    assert_eq!(recorder.shapes["p"], vec![4, 2]);
    assert_eq!(recorder.shapes["q"], vec![4, 4]);
}

#[test]
fn test_attribute_expressions_are_folded() {
    let recorder = comp(
        r#"
        version 1.0;
        graph G( a ) -> ( b, c, d )
        {
            a = external(shape = [2, 6]);
            b = reshape(a, shape = [length_of(shape_of(a)) * 3, -1]);
            c = reshape(a, shape = [for e in shape_of(a) if e > 2 yield e * 2]);
            d = reshape(a, shape = if 1 < 2 then [12] else [1]);
        }
    "#,
    );
    let ops = recorder.operations();
    assert_eq!(
        ops[1],
        "b = reshape(a, shape = [6, -1], axis_start = 0, axis_count = -1)"
    );
    assert_eq!(recorder.shapes["b"], vec![6, 2]);
    assert!(ops[2].starts_with("c = reshape(a, shape = [12]"));
    assert_eq!(recorder.shapes["d"], vec![12]);
}

// Layers

const LAYER_NET: &str = r#"
version 1.0;
graph G( input ) -> ( output )
{
    input = external(shape = [1, 16]);
    output = linear_layer(input, channels = 8, scope = 'fc1');
}
"#;

#[test]
fn test_layer_expands_into_labelled_variables() {
    let mut recorder = Recorder::default();
    let mut parser = CompParser::new(true).unwrap();
    parser.parse(&mut LAYER_NET.as_bytes(), &mut recorder).unwrap();
    assert_eq!(
        recorder.operations(),
        vec![
            "input = external(shape = [1, 16])",
            "t1 = variable(shape = [8, 16], label = 'fc1/filter')",
            "t2 = variable(shape = [1, 8], label = 'fc1/bias')",
            "output = linear(input, t1, t2)",
        ]
    );
    assert_eq!(recorder.shapes["output"], vec![1, 8]);
}

#[test]
fn test_layer_kept_atomic_by_override() {
    let mut recorder = Recorder::with_overrides(&[("linear_layer", true)]);
    let mut parser = CompParser::new(true).unwrap();
    parser.parse(&mut LAYER_NET.as_bytes(), &mut recorder).unwrap();
    assert_eq!(
        recorder.operations()[1],
        "output = linear_layer(input, channels = 8, use_bias = true, scope = 'fc1')"
    );
    assert_eq!(recorder.shapes["output"], vec![1, 8]);
    assert!(!recorder.shapes.contains_key("t1"));
}

#[test]
fn test_layers_unavailable_without_flag() {
    let err = comp_err(LAYER_NET);
    assert!(err.message.contains("undefined operation 'linear_layer'"));
}

// Provenance

#[test]
fn test_error_in_nested_fragment_carries_origin_chain() {
    let src = "version 1.0;
fragment inner( x: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = x + missing;
}
fragment outer( x: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = inner(x);
}
graph G( a ) -> ( b )
{
    a = external(shape = [1]);
    b = outer(a);
}";
    let err = comp_err(src);
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("undefined identifier 'missing'"));

    let pos = err.position.unwrap();
    assert_eq!((pos.line, pos.column), (4, 13));
    let chain: Vec<(usize, usize)> = pos.origins().map(|p| (p.line, p.column)).collect();
    assert_eq!(chain, vec![(8, 9), (13, 9)]);
}

#[test]
fn test_recursion_hits_depth_limit() {
    let err = comp_err(
        r#"
        version 1.0;
        fragment forever( x: tensor<scalar> ) -> ( y: tensor<scalar> ) { y = forever(x); }
        graph G( a ) -> ( b ) { a = external(shape = [1]); b = forever(a); }
    "#,
    );
    assert!(err.message.contains("maximum depth"));
}

// Graph checks

#[test]
fn test_input_must_come_from_external() {
    let err = comp_err(
        "version 1.0; graph G( a ) -> ( b ) { a = variable(shape = [1], label = 'a'); b = copy(a); }",
    );
    assert!(err.message.contains("graph input 'a' is not defined by 'external'"));
}

#[test]
fn test_external_must_be_an_input() {
    let err = comp_err(
        "version 1.0; graph G() -> ( b ) { x = external(shape = [1]); b = copy(x); }",
    );
    assert!(err.message.contains("not a graph input"));
}

#[test]
fn test_output_must_be_defined() {
    let err = comp_err(
        "version 1.0; graph G( a ) -> ( z ) { a = external(shape = [1]); }",
    );
    assert!(err.message.contains("graph output 'z' is not defined"));
}

#[test]
fn test_tensor_is_single_assignment() {
    let err = comp_err(
        "version 1.0; graph G( a ) -> ( a ) { a = external(shape = [1]); a = external(shape = [1]); }",
    );
    assert!(err.message.contains("declared more than once"));

    let err = comp_err(
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = copy(a); b = copy(a); }",
    );
    assert!(err.message.contains("identifier 'b' is already defined"));
}

#[test]
fn test_undefined_operation() {
    let err = comp_err("version 1.0; graph G() -> ( b ) { b = frobnicate(); }");
    assert!(err.message.contains("undefined operation 'frobnicate'"));
}

#[test]
fn test_argument_errors() {
    let err = comp_err(
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = relu(a, a); }",
    );
    assert!(err.message.contains("too many positional arguments"));

    let err = comp_err(
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [1]); b = relu(y = a); }",
    );
    assert!(err.message.contains("has no parameter 'y'"));

    let err = comp_err("version 1.0; graph G( a ) -> ( b ) { a = external(); }");
    assert!(err.message.contains("missing argument 'shape'"));
}

#[test]
fn test_shape_errors_are_reported_at_the_operator() {
    let src = "version 1.0;
graph G( a, b ) -> ( c )
{
    a = external(shape = [2, 3]);
    b = external(shape = [4]);
    c = a + b;
}";
    let err = comp_err(src);
    assert_eq!(err.kind, ErrorKind::Shape);
    let pos = err.position.unwrap();
    assert_eq!((pos.line, pos.column), (6, 11));
}

#[test]
fn test_integer_overflow_in_attributes_is_an_error() {
    for attribute in [
        "(-9223372036854775807 - 1) / -1",
        "-(-9223372036854775807 - 1)",
        "9223372036854775807 * 2",
    ] {
        let src = format!(
            "version 1.0;
graph G( input ) -> ( output )
{{
    input = external(shape = [4]);
    output = reshape(input, shape = [{attribute}]);
}}"
        );
        let err = comp_err(&src);
        assert_eq!(err.kind, ErrorKind::Semantic, "{attribute}");
        assert!(err.message.contains("overflow"), "{attribute}: {}", err.message);
    }
}

#[test]
fn test_oversized_volume_is_a_shape_error() {
    let src = "version 1.0;
graph G( input ) -> ( output )
{
    input = external(shape = [4294967296, 4294967296, 4294967296]);
    output = reshape(input, shape = [-1]);
}";
    let err = comp_err(src);
    assert_eq!(err.kind, ErrorKind::Shape);
    assert_eq!(err.position.unwrap().line, 5);
}
