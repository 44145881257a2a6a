// Stack-based bytecode VM.
//
// `Vm` deliberately does not own a `Heap`: every method that can allocate or
// trigger a collection takes `heap: &mut Heap` as an explicit parameter,
// mirroring the compiler's own `heap: &mut Heap` field. This is what makes
// `impl Roots for Vm` possible without a self-referential borrow - `Vm` and
// `Heap` are always two distinct values, never one nested inside the other,
// so `gc::maybe_collect(heap, &vm)` never tries to borrow a struct through
// itself.

pub mod dispatch;
pub mod error;

use crate::chunk::Chunk;
use crate::gc::{self, Roots};
use crate::object::{ClosureObj, Heap, NativeFn, ObjRef, UpvalueLoc};
use crate::table::Table;
use crate::value::Value;
use error::{ErrorKind, RuntimeError};

const MAX_CALL_DEPTH: usize = 64;

struct CallFrame {
    closure: ObjRef,
    ip: usize,
    /// Stack index of this frame's slot 0 (the callee itself).
    slot_base: usize,
}

pub enum InterpretError {
    Compile(Vec<String>),
    Runtime(RuntimeError),
}

pub(crate) enum StepResult {
    Continue,
    Done,
}

pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    open_upvalues: Option<ObjRef>,
    pub trace_execution: bool,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Roots for Vm {
    fn mark_roots(&self, heap: &mut Heap, gray: &mut Vec<ObjRef>) {
        for v in &self.stack {
            gc::mark_value(heap, gray, v);
        }
        for frame in &self.frames {
            gc::mark_object(heap, gray, frame.closure);
        }
        for (k, v) in self.globals.iter() {
            gc::mark_value(heap, gray, k);
            gc::mark_value(heap, gray, v);
        }
        let mut cur = self.open_upvalues;
        while let Some(u) = cur {
            gc::mark_object(heap, gray, u);
            cur = heap.as_upvalue(u).unwrap().open_next;
        }
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm { frames: Vec::new(), stack: Vec::new(), globals: Table::new(), open_upvalues: None, trace_execution: false }
    }

    pub fn define_native(&mut self, heap: &mut Heap, name: &str, func: NativeFn) {
        let name_obj = heap.intern_string(name);
        let native = heap.alloc_native(crate::object::NativeObj { name: name.into(), func });
        self.globals.set(Value::Obj(name_obj), Value::Obj(native), heap);
    }

    pub fn interpret(&mut self, heap: &mut Heap, source: &str) -> Result<(), InterpretError> {
        let function = crate::compiler::compile(source, heap).map_err(InterpretError::Compile)?;
        let closure = heap.alloc_closure(ClosureObj { function, upvalues: Vec::new() });
        self.stack.push(Value::Obj(closure));
        self.call_value(heap, Value::Obj(closure), 0).map_err(|e| InterpretError::Runtime(self.finish_error(heap, e)))?;
        self.run(heap).map_err(|e| InterpretError::Runtime(self.finish_error(heap, e)))
    }

    fn run(&mut self, heap: &mut Heap) -> Result<(), ErrorKind> {
        loop {
            gc::maybe_collect(heap, self);
            if self.trace_execution {
                self.trace_top_of_stack(heap);
            }
            let op_byte = self.read_byte(heap);
            let op = match crate::opcode::OpCode::try_from(op_byte) {
                Ok(op) => op,
                Err(b) => return Err(ErrorKind::InternalError(format!("Invalid opcode byte {b}."))),
            };
            match dispatch::execute(self, heap, op)? {
                StepResult::Continue => {}
                StepResult::Done => return Ok(()),
            }
        }
    }

    fn trace_top_of_stack(&self, heap: &Heap) {
        eprint!("          ");
        for v in &self.stack {
            eprint!("[ {} ]", v.format(heap));
        }
        eprintln!();
    }

    fn finish_error(&self, heap: &Heap, kind: ErrorKind) -> RuntimeError {
        let message = kind.message();
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|f| {
                let closure = heap.as_closure(f.closure).unwrap();
                let line = heap.as_function(closure.function).unwrap().chunk.get_line(f.ip.saturating_sub(1));
                (heap.callable_name(f.closure), line)
            })
            .collect();
        RuntimeError { message, trace }
    }

    // ---- frame / chunk access ----------------------------------------------------

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("at least one active call frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("at least one active call frame")
    }

    fn chunk<'h>(&self, heap: &'h Heap) -> &'h Chunk {
        let closure = heap.as_closure(self.current_frame().closure).unwrap();
        &heap.as_function(closure.function).unwrap().chunk
    }

    fn read_byte(&mut self, heap: &Heap) -> u8 {
        let byte = self.chunk(heap).code[self.current_frame().ip];
        self.current_frame_mut().ip += 1;
        byte
    }

    fn read_u16(&mut self, heap: &Heap) -> u16 {
        let hi = self.read_byte(heap);
        let lo = self.read_byte(heap);
        u16::from_be_bytes([hi, lo])
    }

    fn read_u24(&mut self, heap: &Heap) -> u32 {
        let ip = self.current_frame().ip;
        let value = self.chunk(heap).read_u24_le(ip);
        self.current_frame_mut().ip += 3;
        value
    }

    fn read_constant(&mut self, heap: &Heap, index: usize) -> Value {
        self.chunk(heap).constants[index]
    }

    // ---- stack helpers --------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- calling convention -----------------------------------------------------

    fn call_value(&mut self, heap: &mut Heap, callee: Value, arg_count: u8) -> Result<(), ErrorKind> {
        let obj = match callee {
            Value::Obj(o) => o,
            _ => return Err(ErrorKind::InvalidCall("Can only call functions.".to_string())),
        };
        match heap.kind(obj) {
            crate::object::ObjKind::Closure => self.call_closure(heap, obj, arg_count),
            crate::object::ObjKind::Native => self.call_native(heap, obj, arg_count),
            _ => Err(ErrorKind::InvalidCall("Can only call functions.".to_string())),
        }
    }

    fn call_closure(&mut self, heap: &mut Heap, closure: ObjRef, arg_count: u8) -> Result<(), ErrorKind> {
        let function = heap.as_closure(closure).unwrap().function;
        let arity = heap.as_function(function).unwrap().arity;
        if arg_count != arity {
            return Err(ErrorKind::InvalidCall(format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(ErrorKind::StackOverflow);
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    fn call_native(&mut self, heap: &mut Heap, native: ObjRef, arg_count: u8) -> Result<(), ErrorKind> {
        let func = heap.as_native(native).unwrap().func;
        let start = self.stack.len() - arg_count as usize;
        let result = func(heap, &self.stack[start..]).map_err(ErrorKind::TypeError)?;
        self.stack.truncate(start - 1);
        self.push(result);
        Ok(())
    }

    // ---- upvalues ---------------------------------------------------------------

    fn capture_upvalue(&mut self, heap: &mut Heap, stack_slot: usize) -> ObjRef {
        let mut prev: Option<ObjRef> = None;
        let mut cur = self.open_upvalues;
        while let Some(u) = cur {
            let upv = heap.as_upvalue(u).unwrap();
            let slot = match upv.loc {
                UpvalueLoc::Open(s) => s,
                UpvalueLoc::Closed(_) => unreachable!("open chain holds only open upvalues"),
            };
            if slot == stack_slot {
                return u;
            }
            if slot < stack_slot {
                break;
            }
            prev = Some(u);
            cur = upv.open_next;
        }

        let created = heap.alloc_upvalue(stack_slot);
        heap.as_upvalue_mut(created).unwrap().open_next = cur;
        match prev {
            Some(p) => heap.as_upvalue_mut(p).unwrap().open_next = Some(created),
            None => self.open_upvalues = Some(created),
        }
        created
    }

    fn close_upvalues(&mut self, heap: &mut Heap, from_slot: usize) {
        while let Some(u) = self.open_upvalues {
            let slot = match heap.as_upvalue(u).unwrap().loc {
                UpvalueLoc::Open(s) => s,
                UpvalueLoc::Closed(_) => break,
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            let upv = heap.as_upvalue_mut(u).unwrap();
            upv.loc = UpvalueLoc::Closed(value);
            self.open_upvalues = upv.open_next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> (Vm, Heap) {
        let mut heap = Heap::new();
        let mut vm = Vm::new();
        if let Err(e) = vm.interpret(&mut heap, src) {
            match e {
                InterpretError::Compile(errors) => panic!("compile error: {errors:?}"),
                InterpretError::Runtime(err) => panic!("runtime error: {err}"),
            }
        }
        (vm, heap)
    }

    fn global(vm: &Vm, heap: &mut Heap, name: &str) -> Value {
        let key = Value::Obj(heap.intern_string(name));
        vm.globals.get(&key, heap).unwrap_or_else(|| panic!("global '{name}' was never set"))
    }

    #[test]
    fn arithmetic_precedence() {
        let (vm, mut heap) = run("let x = 1 + 2 * 3 - 4 / 2;");
        assert_eq!(global(&vm, &mut heap, "x").as_number(), Some(5.0));
    }

    #[test]
    fn comparisons_and_short_circuit_and_or() {
        let (vm, mut heap) = run("let x = (1 < 2) and (3 > 4) or true;");
        assert!(matches!(global(&vm, &mut heap, "x"), Value::Bool(true)));
    }

    #[test]
    fn not_treats_only_false_and_meta_as_falsey() {
        let (vm, mut heap) = run("fn nothing() {} let a = not false; let b = not 0; let c = not nothing();");
        assert!(matches!(global(&vm, &mut heap, "a"), Value::Bool(true)));
        assert!(matches!(global(&vm, &mut heap, "b"), Value::Bool(false)));
        assert!(matches!(global(&vm, &mut heap, "c"), Value::Bool(true)));
    }

    #[test]
    fn string_literals_intern_to_the_same_object() {
        let (vm, mut heap) = run("let a = \"hi\"; let b = \"hi\"; let same = a == b;");
        assert!(matches!(global(&vm, &mut heap, "same"), Value::Bool(true)));
    }

    #[test]
    fn closures_share_a_mutable_captured_variable() {
        let (vm, mut heap) = run(
            "fn make_counter() { \
                 let n = 0; \
                 fn inc() { n = n + 1; return n; } \
                 return inc; \
             } \
             let counter = make_counter(); \
             let a = counter(); \
             let b = counter(); \
             let sum = a + b;",
        );
        assert_eq!(global(&vm, &mut heap, "sum").as_number(), Some(3.0));
    }

    #[test]
    fn for_loop_gives_each_closure_its_own_binding() {
        let (vm, mut heap) = run(
            "let first; let second; \
             for (let i = 0; i < 2; i = i + 1) { \
                 fn grab() { return i; } \
                 if (i == 0) { first = grab; } else { second = grab; } \
             } \
             let a = first(); \
             let b = second();",
        );
        assert_eq!(global(&vm, &mut heap, "a").as_number(), Some(0.0));
        assert_eq!(global(&vm, &mut heap, "b").as_number(), Some(1.0));
    }

    #[test]
    fn recursive_function_calls_work() {
        let (vm, mut heap) = run(
            "fn fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } \
             let x = fib(10);",
        );
        assert_eq!(global(&vm, &mut heap, "x").as_number(), Some(55.0));
    }

    #[test]
    fn arithmetic_on_non_numbers_is_a_runtime_error() {
        let mut heap = Heap::new();
        let mut vm = Vm::new();
        let err = vm.interpret(&mut heap, "let x = true + 1;").unwrap_err();
        match err {
            InterpretError::Runtime(e) => assert!(e.message.contains("two numbers or two strings")),
            InterpretError::Compile(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn assigning_an_undefined_global_is_a_runtime_error() {
        let mut heap = Heap::new();
        let mut vm = Vm::new();
        let err = vm.interpret(&mut heap, "x = 1;").unwrap_err();
        match err {
            InterpretError::Runtime(e) => assert!(e.message.contains("Undefined variable")),
            InterpretError::Compile(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn calling_a_non_callable_value_is_a_runtime_error() {
        let mut heap = Heap::new();
        let mut vm = Vm::new();
        let err = vm.interpret(&mut heap, "let x = 1; x();").unwrap_err();
        match err {
            InterpretError::Runtime(e) => assert!(e.message.contains("Can only call")),
            InterpretError::Compile(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn wrong_arity_is_a_runtime_error() {
        let mut heap = Heap::new();
        let mut vm = Vm::new();
        let err = vm.interpret(&mut heap, "fn f(a, b) { return a; } f(1);").unwrap_err();
        match err {
            InterpretError::Runtime(e) => assert!(e.message.contains("Expected 2 arguments")),
            InterpretError::Compile(_) => panic!("expected a runtime error"),
        }
    }

    /// Runs `src` against a heap with `stress_gc` enabled, so `gc::maybe_collect`
    /// runs a full collection on every dispatch-loop iteration instead of only
    /// once `bytes_allocated` crosses `next_gc`.
    fn run_under_stress(src: &str) -> (Vm, Heap) {
        let mut heap = Heap::with_stress_gc();
        let mut vm = Vm::new();
        if let Err(e) = vm.interpret(&mut heap, src) {
            match e {
                InterpretError::Compile(errors) => panic!("compile error: {errors:?}"),
                InterpretError::Runtime(err) => panic!("runtime error: {err}"),
            }
        }
        (vm, heap)
    }

    #[test]
    fn stress_gc_keeps_interned_strings_and_globals_alive() {
        let (vm, mut heap) = run_under_stress(
            "let a = \"hello\" + \" \" + \"world\"; \
             let b = \"hello world\"; \
             let same = a == b;",
        );
        assert!(matches!(global(&vm, &mut heap, "same"), Value::Bool(true)));
    }

    #[test]
    fn stress_gc_keeps_closures_and_their_upvalues_alive() {
        let (vm, mut heap) = run_under_stress(
            "fn make_counter() { \
                 let n = 0; \
                 fn inc() { n = n + 1; return n; } \
                 return inc; \
             } \
             let counter = make_counter(); \
             let a = counter(); \
             let b = counter(); \
             let c = counter(); \
             let sum = a + b + c;",
        );
        assert_eq!(global(&vm, &mut heap, "sum").as_number(), Some(6.0));
    }

    #[test]
    fn stress_gc_preserves_for_loop_closure_per_iteration_bindings() {
        let (vm, mut heap) = run_under_stress(
            "let first; let second; \
             for (let i = 0; i < 2; i = i + 1) { \
                 fn grab() { return i; } \
                 if (i == 0) { first = grab; } else { second = grab; } \
             } \
             let a = first(); \
             let b = second();",
        );
        assert_eq!(global(&vm, &mut heap, "a").as_number(), Some(0.0));
        assert_eq!(global(&vm, &mut heap, "b").as_number(), Some(1.0));
    }

    #[test]
    fn stress_gc_survives_deep_recursion() {
        let (vm, mut heap) =
            run_under_stress("fn fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } let x = fib(12);");
        assert_eq!(global(&vm, &mut heap, "x").as_number(), Some(144.0));
    }
}
