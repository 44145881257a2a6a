use crate::object::Heap;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub(super) fn execute(vm: &mut Vm, heap: &mut Heap, op: OpCode) -> Result<(), ErrorKind> {
    match op {
        OpCode::Constant => {
            let idx = vm.read_byte(heap) as usize;
            let value = vm.read_constant(heap, idx);
            vm.push(value);
        }
        OpCode::ConstantLong => {
            let idx = vm.read_u24(heap) as usize;
            let value = vm.read_constant(heap, idx);
            vm.push(value);
        }
        OpCode::True => vm.push(Value::Bool(true)),
        OpCode::False => vm.push(Value::Bool(false)),
        OpCode::Meta => vm.push(Value::Meta),
        OpCode::Pop => {
            vm.pop();
        }
        OpCode::GetLocal => {
            let slot = vm.read_byte(heap) as usize;
            let value = vm.stack[vm.current_frame().slot_base + slot];
            vm.push(value);
        }
        OpCode::SetLocal => {
            let slot = vm.read_byte(heap) as usize;
            let value = vm.peek(0);
            let absolute = vm.current_frame().slot_base + slot;
            vm.stack[absolute] = value;
        }
        OpCode::GetGlobal => {
            let idx = vm.read_u24(heap) as usize;
            let name = vm.read_constant(heap, idx);
            match vm.globals.get(&name, heap) {
                Some(v) => vm.push(v),
                None => return Err(ErrorKind::UndefinedVariable(heap.format_obj(name.as_obj().unwrap()))),
            }
        }
        OpCode::DefineGlobal => {
            let idx = vm.read_u24(heap) as usize;
            let name = vm.read_constant(heap, idx);
            let value = vm.peek(0);
            vm.globals.set(name, value, heap);
            vm.pop();
        }
        OpCode::SetGlobal => {
            let idx = vm.read_u24(heap) as usize;
            let name = vm.read_constant(heap, idx);
            let value = vm.peek(0);
            if vm.globals.set(name, value, heap) {
                vm.globals.delete(&name, heap);
                return Err(ErrorKind::UndefinedVariable(heap.format_obj(name.as_obj().unwrap())));
            }
        }
        OpCode::GetUpvalue => {
            let slot = vm.read_byte(heap) as usize;
            let closure = vm.current_frame().closure;
            let upvalue = heap.as_closure(closure).unwrap().upvalues[slot];
            let value = match heap.as_upvalue(upvalue).unwrap().loc {
                crate::object::UpvalueLoc::Open(stack_slot) => vm.stack[stack_slot],
                crate::object::UpvalueLoc::Closed(v) => v,
            };
            vm.push(value);
        }
        OpCode::SetUpvalue => {
            let slot = vm.read_byte(heap) as usize;
            let value = vm.peek(0);
            let closure = vm.current_frame().closure;
            let upvalue = heap.as_closure(closure).unwrap().upvalues[slot];
            match heap.as_upvalue(upvalue).unwrap().loc {
                crate::object::UpvalueLoc::Open(stack_slot) => vm.stack[stack_slot] = value,
                crate::object::UpvalueLoc::Closed(_) => {
                    heap.as_upvalue_mut(upvalue).unwrap().loc = crate::object::UpvalueLoc::Closed(value);
                }
            }
        }
        OpCode::CloseUpvalue => {
            let top = vm.stack.len() - 1;
            vm.close_upvalues(heap, top);
            vm.pop();
        }
        _ => unreachable!("access::execute called with non-access opcode"),
    }
    Ok(())
}
