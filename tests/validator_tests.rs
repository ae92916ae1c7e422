// End-to-end tests for the validator: rendering, reporting and sidecar checks

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use nnef_validator::binary::{write_tensor_header, ItemType, TensorHeader};
use nnef_validator::validator::RunError;
use nnef_validator::verify::{verify_shapes, VerifyIssue};
use nnef_validator::{run, Options, Outcome};

const ONE_VARIABLE: &str = "version 1.0;
graph G( input ) -> ( output )
{
    input = external(shape = [1, 4]);
    weights = variable(shape = [4, 4], label = 'weights');
    output = matmul(input, weights);
}
";

/// A fresh directory under the system temp dir.
fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nnef-validator-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_graph(dir: &Path, source: &str) -> PathBuf {
    let path = dir.join("graph.nnef");
    fs::write(&path, source).unwrap();
    path
}

fn write_sidecar(dir: &Path, key: &str, shape: &[usize]) {
    let path = dir.join(format!("{key}.dat"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let header = TensorHeader::new(shape.to_vec(), ItemType::Float, 32).unwrap();
    let mut file = File::create(path).unwrap();
    write_tensor_header(&mut file, &header).unwrap();
}

fn validate(path: &Path, options: &Options) -> (Outcome, String, String) {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let outcome = run(path, options, &mut out, &mut err).unwrap();
    (
        outcome,
        String::from_utf8(out).unwrap(),
        String::from_utf8(err).unwrap(),
    )
}

fn binary() -> Options {
    Options {
        binary: true,
        ..Options::default()
    }
}

#[test]
fn test_missing_sidecar_end_to_end() {
    let dir = scratch("missing");
    let path = write_graph(&dir, ONE_VARIABLE);

    let (outcome, out, err) = validate(&path, &binary());
    assert_eq!(
        out,
        "graph G( input ) -> ( output )\n{\n\
         \tinput = external(shape = [1, 4])\n\
         \tweights = variable(shape = [4, 4], label = 'weights')\n\
         \toutput = matmul(input, weights, transposeA = false, transposeB = false)\n\
         }\n\
         Parse succeeded\n"
    );
    assert!(outcome.parse_error.is_none());
    assert_eq!(outcome.issues.len(), 1);
    assert!(matches!(outcome.issues[0], VerifyIssue::CouldNotOpen { .. }));
    assert_eq!(err.lines().count(), 1);
    assert!(err.starts_with("Could not open file: "));
    assert!(err.trim_end().ends_with("weights.dat"));
    assert!(!outcome.is_clean());
}

#[test]
fn test_matching_sidecar_is_clean() {
    let dir = scratch("matching");
    let path = write_graph(&dir, ONE_VARIABLE);
    write_sidecar(&dir, "weights", &[4, 4]);

    let (outcome, out, err) = validate(&path, &binary());
    assert!(out.ends_with("Parse succeeded\n"));
    assert!(err.is_empty());
    assert!(outcome.is_clean());
    assert_eq!(outcome.variables["weights"], vec![4, 4]);
}

#[test]
fn test_shape_mismatch_reports_both_shapes() {
    let dir = scratch("mismatch");
    let path = write_graph(&dir, ONE_VARIABLE);
    write_sidecar(&dir, "weights", &[4, 5]);

    let (outcome, _, err) = validate(&path, &binary());
    assert_eq!(outcome.issues.len(), 1);
    assert!(err.contains("Shape [4, 5]"));
    assert!(err.contains("does not match shape [4, 4] defined in network structure"));
}

#[test]
fn test_bad_header_is_reported() {
    let dir = scratch("badheader");
    let path = write_graph(&dir, ONE_VARIABLE);
    fs::write(dir.join("weights.dat"), b"not a tensor").unwrap();

    let (outcome, _, err) = validate(&path, &binary());
    assert!(matches!(outcome.issues[0], VerifyIssue::BadHeader { .. }));
    assert!(err.starts_with("Failed to read binary header from file: "));
}

#[test]
fn test_one_issue_per_variable_and_no_interference() {
    let dir = scratch("several");
    let mut variables = nnef_validator::graph::Dictionary::new();
    for (key, shape) in [("a", vec![1, 3, 224, 224]), ("b", vec![1, 3, 224, 224]), ("c", vec![2])] {
        variables.insert(key.to_string(), shape);
    }
    write_sidecar(&dir, "a", &[1, 3, 224, 224]);
    write_sidecar(&dir, "b", &[1, 3, 224, 224, 1]);
    let graph = dir.join("graph.nnef");

    let issues = verify_shapes(&graph, &variables);
    assert_eq!(issues.len(), 2);
    assert!(matches!(issues[0], VerifyIssue::ShapeMismatch { .. }));
    assert!(issues[0].path().ends_with("b.dat"));
    assert!(matches!(issues[1], VerifyIssue::CouldNotOpen { .. }));
    assert!(issues[1].path().ends_with("c.dat"));
}

#[test]
fn test_differing_extent_is_a_mismatch() {
    let dir = scratch("extent");
    let mut variables = nnef_validator::graph::Dictionary::new();
    variables.insert("w".to_string(), vec![1, 3, 224, 224]);
    write_sidecar(&dir, "w", &[1, 3, 224, 225]);

    let issues = verify_shapes(&dir.join("graph.nnef"), &variables);
    assert_eq!(issues.len(), 1);
    assert!(matches!(issues[0], VerifyIssue::ShapeMismatch { .. }));
}

#[test]
fn test_parse_error_is_reported_and_verification_still_runs() {
    let dir = scratch("parse-error");
    let path = write_graph(
        &dir,
        "version 1.0;
graph G( input ) -> ( output )
{
    input = external(shape = [1, 4]);
    weights = variable(shape = [4, 4], label = 'weights');
    output = matmul(input, missing);
}
",
    );
    let (outcome, out, err) = validate(&path, &binary());

    assert!(!out.contains("Parse succeeded"));
    let rendered = out.find("\tweights = variable").unwrap();
    let report = out
        .find("Parse error: [6:28] semantic error: undefined identifier 'missing'")
        .unwrap();
    assert!(rendered < report);
    assert!(out[report..].contains("^"));
    assert!(!err.contains("Parse error"));
    assert!(err.starts_with("Could not open file: "));
    assert!(outcome.parse_error.is_some());
    assert_eq!(outcome.variables["weights"], vec![4, 4]);
    assert_eq!(outcome.issues.len(), 1);
}

#[test]
fn test_layer_variables_use_labels() {
    let dir = scratch("labels");
    let path = write_graph(
        &dir,
        "version 1.0;
graph G( input ) -> ( output )
{
    input = external(shape = [1, 16]);
    output = linear_layer(input, channels = 8, scope = 'fc1');
}
",
    );
    write_sidecar(&dir, "fc1/filter", &[8, 16]);
    write_sidecar(&dir, "fc1/bias", &[1, 8]);

    let options = Options {
        layers: true,
        binary: true,
        ..Options::default()
    };
    let (outcome, _, err) = validate(&path, &options);
    assert!(err.is_empty(), "unexpected diagnostics: {err}");
    assert_eq!(outcome.variables.len(), 2);
    assert_eq!(outcome.variables["fc1/filter"], vec![8, 16]);
    assert!(outcome.is_clean());
}

#[test]
fn test_atomics_warning_does_not_abort() {
    let dir = scratch("atomics");
    let path = write_graph(&dir, ONE_VARIABLE);
    let options = Options {
        atomics: Some("+matmul relu".to_string()),
        ..Options::default()
    };
    let (outcome, out, err) = validate(&path, &options);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(err.contains("'relu'"));
    assert!(out.ends_with("Parse succeeded\n"));
}

#[test]
fn test_flat_parser_selected() {
    let dir = scratch("flat");
    let path = write_graph(
        &dir,
        "version 1.0; graph G( a ) -> ( b ) { a = external(shape = [2]); b = a; }",
    );
    let options = Options {
        flat: true,
        ..Options::default()
    };
    let (outcome, out, err) = validate(&path, &options);
    assert!(outcome.parse_error.is_some());
    assert!(out.contains("syntax error"));
    assert!(err.is_empty());
}

#[test]
fn test_unopenable_input() {
    let dir = scratch("unopenable");
    let mut out = Vec::new();
    let mut err = Vec::new();
    let result = run(&dir.join("absent.nnef"), &Options::default(), &mut out, &mut err);
    assert!(matches!(result, Err(RunError::OpenInput { .. })));
}
