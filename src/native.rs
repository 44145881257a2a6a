// Built-in native functions, registered into a fresh `Vm` by `register_all`.
//
// Kept deliberately small: a clock for timing scripts and benchmarks, plus
// `str`/`type` so scripts can inspect values without a full standard
// library - there is no file I/O, no collections, nothing beyond what the
// language itself cannot express.

use crate::object::Heap;
use crate::value::Value;
use crate::vm::Vm;

pub fn register_all(vm: &mut Vm, heap: &mut Heap) {
    vm.define_native(heap, "clock", clock);
    vm.define_native(heap, "str", str_of);
    vm.define_native(heap, "type", type_of);
}

/// Seconds since the heap (and so the VM) was created, not wall-clock time -
/// mirrors the original's `clock()/CLOCKS_PER_SEC`, which measures time
/// since process start rather than since the epoch.
fn clock(heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(heap.elapsed_secs()))
}

fn str_of(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let value = args.first().ok_or("str() takes exactly one argument.")?;
    let text = value.format(heap);
    Ok(Value::Obj(heap.intern_string(&text)))
}

fn type_of(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let value = args.first().ok_or("type() takes exactly one argument.")?;
    let name = value.type_name(heap);
    Ok(Value::Obj(heap.intern_string(name)))
}
