// Validator — Ties parsing, rendering and sidecar verification together
//
//   read input ─► pick parser ─► parse into PrintCallback ─► report
//                                                         └─► verify (--binary)
//
// A parse failure is reported after the partial rendering on the same
// stream, and the run carries on: verification still runs over whatever
// variables were recorded before the failure.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::atomics::AtomicOverrides;
use crate::error::Error;
use crate::frontend::{CompParser, FlatParser, Parser};
use crate::graph::{Dictionary, Shape};
use crate::printer::PrintCallback;
use crate::report::write_report;
use crate::verify::{verify_shapes, VerifyIssue};

/// What to run. Built by `cli::parse_args`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Use the flat grammar.
    pub flat: bool,
    /// Load the layer fragments (compositional grammar only).
    pub layers: bool,
    /// Verify variable shapes against sidecar files.
    pub binary: bool,
    /// Raw `+name`/`-name` override list.
    pub atomics: Option<String>,
}

/// Failures that stop a run before anything is validated.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Could not open file: {}", .path.display())]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load the standard fragments: {0}")]
    Stdlib(#[source] Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Everything a run reported.
#[derive(Debug, Default)]
pub struct Outcome {
    pub warnings: Vec<String>,
    pub parse_error: Option<Error>,
    pub issues: Vec<VerifyIssue>,
    /// Declared variable shapes, keyed by storage key.
    pub variables: Dictionary<Shape>,
}

impl Outcome {
    /// Nothing was warned about, parsing succeeded and every sidecar matched.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.parse_error.is_none() && self.issues.is_empty()
    }
}

/// Validate the graph at `path`. Canonical text and the parse outcome (the
/// success line or the error report) go to `out`; warnings and verification
/// issues go to `err`.
pub fn run(
    path: &Path,
    options: &Options,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<Outcome, RunError> {
    let source = fs::read_to_string(path).map_err(|source| RunError::OpenInput {
        path: path.to_path_buf(),
        source,
    })?;

    let mut outcome = Outcome::default();

    let (overrides, rejected) = match &options.atomics {
        Some(text) => AtomicOverrides::parse(text),
        None => (AtomicOverrides::new(), Vec::new()),
    };
    for token in rejected {
        let warning = format!(
            "Warning: ignoring atomic override '{token}', expected '+name' or '-name'"
        );
        writeln!(err, "{warning}")?;
        outcome.warnings.push(warning);
    }
    debug!("{} atomic overrides", overrides.len());

    let mut parser: Box<dyn Parser> = if options.flat {
        Box::new(FlatParser::new().map_err(RunError::Stdlib)?)
    } else {
        Box::new(CompParser::new(options.layers).map_err(RunError::Stdlib)?)
    };

    let mut sink = PrintCallback::new(&mut *out, overrides);
    let result = parser.parse(&mut source.as_bytes(), &mut sink);
    outcome.variables = sink.into_variable_shapes();

    match result {
        Ok(()) => writeln!(out, "Parse succeeded")?,
        Err(e) => {
            write_report(&mut *out, &e, Some(&source))?;
            outcome.parse_error = Some(e);
        }
    }

    if options.binary {
        outcome.issues = verify_shapes(path, &outcome.variables);
        for issue in &outcome.issues {
            writeln!(err, "{issue}")?;
        }
        debug!(
            "verified {} variables, {} issues",
            outcome.variables.len(),
            outcome.issues.len()
        );
    }

    Ok(outcome)
}
