// Verify — Cross-check declared variable shapes against sidecar files
//
// For every recorded variable `key`, the file `<graph dir>/<key>.dat` must
// open, carry a readable header, and store exactly the declared shape. Each
// variable yields at most one issue and never stops the others.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::binary::{read_tensor_header, HeaderError};
use crate::graph::{Dictionary, Shape};

/// A problem found with one variable's sidecar file.
#[derive(Debug, Error)]
pub enum VerifyIssue {
    #[error("Could not open file: {}", .path.display())]
    CouldNotOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read binary header from file: {}", .path.display())]
    BadHeader {
        path: PathBuf,
        #[source]
        source: HeaderError,
    },
    #[error(
        "Shape {stored:?} in tensor file '{}' does not match shape {declared:?} defined in network structure",
        .path.display()
    )]
    ShapeMismatch {
        path: PathBuf,
        stored: Shape,
        declared: Shape,
    },
}

impl VerifyIssue {
    pub fn path(&self) -> &Path {
        match self {
            VerifyIssue::CouldNotOpen { path, .. }
            | VerifyIssue::BadHeader { path, .. }
            | VerifyIssue::ShapeMismatch { path, .. } => path,
        }
    }
}

/// `<directory of graph_path>/<key>.dat`
///
/// Leading separators in `key` are dropped, so the file always resolves
/// inside the graph's directory.
pub fn sidecar_path(graph_path: &Path, key: &str) -> PathBuf {
    let dir = graph_path.parent().unwrap_or_else(|| Path::new(""));
    let key = key.trim_start_matches(['/', '\\']);
    dir.join(format!("{key}.dat"))
}

/// Check one variable. The file is closed before returning.
pub fn verify_variable(graph_path: &Path, key: &str, declared: &[usize]) -> Result<(), VerifyIssue> {
    let path = sidecar_path(graph_path, key);
    debug!("checking '{key}' against {}", path.display());

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(source) => return Err(VerifyIssue::CouldNotOpen { path, source }),
    };
    let header = match read_tensor_header(&mut BufReader::new(file)) {
        Ok(header) => header,
        Err(source) => return Err(VerifyIssue::BadHeader { path, source }),
    };

    if header.shape != declared {
        return Err(VerifyIssue::ShapeMismatch {
            path,
            stored: header.shape,
            declared: declared.to_vec(),
        });
    }
    Ok(())
}

/// Check every variable, collecting one issue per failing variable.
pub fn verify_shapes(graph_path: &Path, variables: &Dictionary<Shape>) -> Vec<VerifyIssue> {
    variables
        .iter()
        .filter_map(|(key, shape)| verify_variable(graph_path, key, shape).err())
        .collect()
}
