// CLI — Command-line scanning
//
// Scanning never fails: unknown flags, extra positionals and a dangling
// `--atomics` become warnings and the run goes on.

use std::path::PathBuf;

use crate::validator::Options;

pub const USAGE: &str = "\
Usage: nnef-validator <graph-file> [OPTIONS]

Parse an NNEF graph, print its canonical form and optionally check the
shapes of its variables against the .dat files next to it.

Options:
  --flat                Use the flat grammar (no fragments, no expressions)
  --layers              Enable the layer fragments (compositional grammar only)
  --binary              Check variable shapes against <variable>.dat sidecar files
  --atomics \"<tokens>\"  Override atomicity: '+name' keeps an operation atomic,
                        '-name' expands it
  -h, --help            Print this help

Environment:
  RUST_LOG=debug        Show parser and verification activity";

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Usage,
    Validate { path: PathBuf, options: Options },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub warnings: Vec<String>,
}

/// Scan the arguments that follow the program name.
pub fn parse_args<I>(args: I) -> Invocation
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut options = Options::default();
    let mut path: Option<PathBuf> = None;
    let mut warnings = Vec::new();
    let mut help = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--flat" => options.flat = true,
            "--layers" => options.layers = true,
            "--binary" => options.binary = true,
            "--atomics" => match args.next() {
                Some(tokens) => options.atomics = Some(tokens),
                None => warnings.push("Warning: --atomics requires an argument".to_string()),
            },
            "--help" | "-h" => help = true,
            flag if flag.starts_with('-') && flag.len() > 1 => {
                warnings.push(format!("Warning: unrecognized option '{flag}'"));
            }
            _ => {
                if path.is_none() {
                    path = Some(PathBuf::from(arg));
                } else {
                    warnings.push(format!("Warning: ignoring extra argument '{arg}'"));
                }
            }
        }
    }

    if options.flat && options.layers {
        warnings.push("Warning: --layers has no effect together with --flat".to_string());
    }

    let command = match path {
        Some(path) if !help => Command::Validate { path, options },
        _ => Command::Usage,
    };
    Invocation { command, warnings }
}
