// Ember: a small dynamically-typed scripting language.
//
// `compiler::compile` turns source text into a bytecode `FunctionObj` in a
// single forward pass; `vm::Vm` executes it. A `Heap` is handed explicitly
// to both rather than owned by either, which is what lets `Compiler` and
// `Vm` each implement `gc::Roots` without fighting the borrow checker over
// a shared, embedded heap (see `gc.rs`).

pub mod chunk;
pub mod compiler;
pub mod gc;
pub mod native;
pub mod object;
pub mod opcode;
pub mod repl;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

pub use object::Heap;
pub use vm::{InterpretError, Vm};

/// Convenience constructor: a fresh `Vm`/`Heap` pair with the native
/// functions already registered, ready for `Vm::interpret`.
pub fn new_runtime() -> (Vm, Heap) {
    let mut heap = Heap::new();
    let mut vm = Vm::new();
    native::register_all(&mut vm, &mut heap);
    (vm, heap)
}
