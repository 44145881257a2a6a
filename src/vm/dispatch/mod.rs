// Opcode dispatch, split by instruction category the way arithmetic,
// variable access, and control flow each have their own failure modes and
// are easiest to read apart.

mod access;
mod arithmetic;
mod control;

use crate::object::Heap;
use crate::opcode::OpCode;
use crate::vm::error::ErrorKind;
use crate::vm::{StepResult, Vm};

pub(super) fn execute(vm: &mut Vm, heap: &mut Heap, op: OpCode) -> Result<StepResult, ErrorKind> {
    use OpCode::*;
    match op {
        Constant | ConstantLong | True | False | Meta | Pop | GetLocal | SetLocal | GetGlobal
        | DefineGlobal | SetGlobal | GetUpvalue | SetUpvalue | CloseUpvalue => {
            access::execute(vm, heap, op)?;
            Ok(StepResult::Continue)
        }
        Equal | Greater | Less | Add | Subtract | Multiply | Divide | Modulo | Pow | Not | Negate => {
            arithmetic::execute(vm, heap, op)?;
            Ok(StepResult::Continue)
        }
        Print | Jump | JumpIfFalse | Loop | Call | Closure => {
            control::execute(vm, heap, op)?;
            Ok(StepResult::Continue)
        }
        Return => control::execute_return(vm, heap),
    }
}
