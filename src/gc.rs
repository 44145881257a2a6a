// Precise mark-sweep collector, tri-color with an explicit gray worklist.
//
// White  = not marked and not on the gray stack.
// Gray   = marked and sitting on the gray stack (reachable, not yet scanned).
// Black  = marked and popped off the gray stack (every outgoing ref scanned).
//
// The collector has no idea what a VM or a Compiler is - it is handed a
// `Roots` implementation and only ever touches the `Heap`. Both `Vm` (at
// runtime) and `Compiler` (mid-compile, before any VM exists) implement
// `Roots`, which is how the compiler's in-flight function chain and the
// VM's stacks both get traced without a process-wide singleton (see
// DESIGN.md on the "process-wide state" design note).

use crate::object::{Heap, ObjKind, ObjRef, UpvalueLoc};
use crate::value::Value;

pub const HEAP_GROW_FACTOR: usize = 2;

pub trait Roots {
    /// Push every root reference onto `gray`, marking it along the way.
    fn mark_roots(&self, heap: &mut Heap, gray: &mut Vec<ObjRef>);
}

pub fn mark_value(heap: &mut Heap, gray: &mut Vec<ObjRef>, value: &Value) {
    if let Value::Obj(o) = value {
        mark_object(heap, gray, *o);
    }
}

pub fn mark_object(heap: &mut Heap, gray: &mut Vec<ObjRef>, obj: ObjRef) {
    if heap.mark(obj) {
        gray.push(obj);
    }
}

/// Scans one object's outgoing references, pushing anything white onto the
/// gray stack (which `mark`s it, turning it gray).
fn blacken(heap: &mut Heap, gray: &mut Vec<ObjRef>, obj: ObjRef) {
    match heap.kind(obj) {
        ObjKind::Closure => {
            let closure = heap.as_closure(obj).unwrap();
            let function = closure.function;
            let upvalues = closure.upvalues.clone();
            mark_object(heap, gray, function);
            for u in upvalues {
                mark_object(heap, gray, u);
            }
        }
        ObjKind::Function => {
            let f = heap.as_function(obj).unwrap();
            let name = f.name;
            let constants: Vec<Value> = f.chunk.constants.clone();
            if let Some(n) = name {
                mark_object(heap, gray, n);
            }
            for c in &constants {
                mark_value(heap, gray, c);
            }
        }
        ObjKind::Upvalue => {
            if let UpvalueLoc::Closed(v) = heap.as_upvalue(obj).unwrap().loc {
                mark_value(heap, gray, &v);
            }
        }
        ObjKind::String | ObjKind::Native => {}
    }
}

/// Runs one full collection cycle: mark roots, drain the gray stack,
/// prune the intern table's weak keys, sweep unmarked objects.
pub fn collect(heap: &mut Heap, roots: &dyn Roots) {
    let mut gray: Vec<ObjRef> = Vec::new();
    roots.mark_roots(heap, &mut gray);
    while let Some(obj) = gray.pop() {
        blacken(heap, &mut gray, obj);
    }
    heap.prune_interned_strings();
    sweep(heap);
    heap.next_gc = heap.bytes_allocated * HEAP_GROW_FACTOR;
}

fn sweep(heap: &mut Heap) {
    let mut prev: Option<ObjRef> = None;
    let mut curr = heap.all_objects();
    while let Some(obj) = curr {
        let next = heap.next_of(obj);
        if heap.is_marked(obj) {
            heap.clear_mark(obj);
            prev = Some(obj);
        } else {
            match prev {
                Some(p) => heap.set_next(p, next),
                None => heap.set_all_objects(next),
            }
            // Safety: an unmarked object survived mark phase unreachable
            // from any root, so nothing else can observe it being freed.
            unsafe { heap.free(obj) };
        }
        curr = next;
    }
}

/// Called at every allocation site that can grow the heap (mirrors the
/// teacher's `reallocate`/`check_gc_condition` cooperative-trigger pattern):
/// collects when `bytes_allocated` has crossed `next_gc`, or unconditionally
/// in stress mode.
pub fn maybe_collect(heap: &mut Heap, roots: &dyn Roots) {
    if heap.stress_gc || heap.bytes_allocated > heap.next_gc {
        collect(heap, roots);
    }
}
