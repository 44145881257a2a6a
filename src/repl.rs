// Interactive REPL: one persistent `Vm`/`Heap` pair, one line compiled and
// run at a time so earlier declarations stay in scope for later lines.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::object::Heap;
use crate::vm::{InterpretError, Vm};

pub fn run(trace_execution: bool) {
    let mut heap = Heap::new();
    let mut vm = Vm::new();
    vm.trace_execution = trace_execution;
    crate::native::register_all(&mut vm, &mut heap);

    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to start line editor: {e}");
            return;
        }
    };

    println!("ember 0.1.0 - press Ctrl-D to exit");
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match vm.interpret(&mut heap, &line) {
                    Ok(()) => {}
                    Err(InterpretError::Compile(errors)) => {
                        for e in errors {
                            eprintln!("{e}");
                        }
                    }
                    Err(InterpretError::Runtime(err)) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Readline error: {e}");
                break;
            }
        }
    }
}
