use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use ember::InterpretError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    /// Only the program's own output.
    Release,
    /// Report compile/runtime errors with a bit of extra context.
    Debug,
    /// Also trace every executed instruction and the value stack.
    Trace,
}

#[derive(Parser)]
#[command(name = "emberc")]
#[command(version, about = "Ember: a small bytecode-compiled scripting language", long_about = None)]
struct Cli {
    /// Script to run. Omit to start the REPL.
    script: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    mode: LogLevel,
}

const EXIT_OK: u8 = 0;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.script {
        Some(path) => ExitCode::from(run_file(&path, cli.mode)),
        None => {
            ember::repl::run(cli.mode == LogLevel::Trace);
            ExitCode::from(EXIT_OK)
        }
    }
}

fn run_file(path: &PathBuf, mode: LogLevel) -> u8 {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Could not read '{}': {e}", path.display());
            return EXIT_IO_ERROR;
        }
    };

    if mode != LogLevel::Release {
        eprintln!("[ember] compiling {}", path.display());
    }

    let (mut vm, mut heap) = ember::new_runtime();
    vm.trace_execution = mode == LogLevel::Trace;

    match vm.interpret(&mut heap, &source) {
        Ok(()) => EXIT_OK,
        Err(InterpretError::Compile(errors)) => {
            for e in errors {
                eprintln!("{e}");
            }
            EXIT_COMPILE_ERROR
        }
        Err(InterpretError::Runtime(err)) => {
            eprintln!("{err}");
            EXIT_RUNTIME_ERROR
        }
    }
}
