use crate::object::{ClosureObj, Heap};
use crate::opcode::OpCode;
use crate::vm::error::ErrorKind;
use crate::vm::{StepResult, Vm};

pub(super) fn execute(vm: &mut Vm, heap: &mut Heap, op: OpCode) -> Result<(), ErrorKind> {
    match op {
        OpCode::Print => {
            let value = vm.pop();
            println!("{}", value.format(heap));
        }
        OpCode::Jump => {
            let offset = vm.read_u16(heap);
            vm.current_frame_mut().ip += offset as usize;
        }
        OpCode::JumpIfFalse => {
            let offset = vm.read_u16(heap);
            if vm.peek(0).is_falsey() {
                vm.current_frame_mut().ip += offset as usize;
            }
        }
        OpCode::Loop => {
            let offset = vm.read_u16(heap);
            vm.current_frame_mut().ip -= offset as usize;
        }
        OpCode::Call => {
            let arg_count = vm.read_byte(heap);
            let callee = vm.peek(arg_count as usize);
            vm.call_value(heap, callee, arg_count)?;
        }
        OpCode::Closure => {
            let idx = vm.read_u24(heap) as usize;
            let value = vm.read_constant(heap, idx);
            let function = value.as_obj().expect("OP_CLOSURE constant must be a function");
            let upvalue_count = heap.as_function(function).unwrap().upvalue_count;

            let enclosing = vm.current_frame().closure;
            let mut upvalues = Vec::with_capacity(upvalue_count as usize);
            for _ in 0..upvalue_count {
                let is_local = vm.read_byte(heap) != 0;
                let index = vm.read_byte(heap) as usize;
                if is_local {
                    let absolute = vm.current_frame().slot_base + index;
                    upvalues.push(vm.capture_upvalue(heap, absolute));
                } else {
                    upvalues.push(heap.as_closure(enclosing).unwrap().upvalues[index]);
                }
            }

            let closure = heap.alloc_closure(ClosureObj { function, upvalues });
            vm.push(crate::value::Value::Obj(closure));
        }
        OpCode::Return => unreachable!("OP_RETURN is handled by execute_return"),
        _ => unreachable!("control::execute called with non-control opcode"),
    }
    Ok(())
}

pub(super) fn execute_return(vm: &mut Vm, heap: &mut Heap) -> Result<StepResult, ErrorKind> {
    let result = vm.pop();
    let slot_base = vm.current_frame().slot_base;
    vm.close_upvalues(heap, slot_base);
    vm.frames.pop();
    vm.stack.truncate(slot_base);

    if vm.frames.is_empty() {
        return Ok(StepResult::Done);
    }
    vm.push(result);
    Ok(StepResult::Continue)
}
