use std::io;
use std::process::ExitCode;

use nnef_validator::cli::{parse_args, Command, USAGE};
use nnef_validator::validator;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let invocation = parse_args(std::env::args().skip(1));
    for warning in &invocation.warnings {
        eprintln!("{warning}");
    }

    let (path, options) = match invocation.command {
        Command::Usage => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Command::Validate { path, options } => (path, options),
    };

    let stdout = io::stdout();
    let stderr = io::stderr();
    match validator::run(&path, &options, &mut stdout.lock(), &mut stderr.lock()) {
        // Reported problems do not change the exit status.
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
