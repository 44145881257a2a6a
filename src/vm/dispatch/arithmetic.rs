use crate::object::Heap;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub(super) fn execute(vm: &mut Vm, heap: &mut Heap, op: OpCode) -> Result<(), ErrorKind> {
    match op {
        OpCode::Not => {
            let v = vm.pop();
            vm.push(Value::Bool(v.is_falsey()));
        }
        OpCode::Negate => {
            let v = vm.pop();
            match v.as_number() {
                Some(n) => vm.push(Value::Number(-n)),
                None => return Err(ErrorKind::TypeError("Operand must be a number.".to_string())),
            }
        }
        OpCode::Equal => {
            let b = vm.pop();
            let a = vm.pop();
            vm.push(Value::Bool(a.values_equal(&b)));
        }
        OpCode::Greater => binary_compare(vm, |a, b| a > b)?,
        OpCode::Less => binary_compare(vm, |a, b| a < b)?,
        OpCode::Add => add(vm, heap)?,
        OpCode::Subtract => binary_number_op(vm, "subtract", |a, b| a - b)?,
        OpCode::Multiply => binary_number_op(vm, "multiply", |a, b| a * b)?,
        OpCode::Divide => binary_number_op(vm, "divide", |a, b| a / b)?,
        OpCode::Modulo => binary_number_op(vm, "take the remainder of", |a, b| a % b)?,
        OpCode::Pow => binary_number_op(vm, "raise", |a, b| a.powf(b))?,
        _ => unreachable!("arithmetic::execute called with non-arithmetic opcode"),
    }
    Ok(())
}

/// `+` is polymorphic: numeric addition, or string concatenation when both
/// operands are strings. Anything else is a type error.
fn add(vm: &mut Vm, heap: &mut Heap) -> Result<(), ErrorKind> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => vm.push(Value::Number(x + y)),
        (Value::Obj(oa), Value::Obj(ob)) => {
            let joined = match (heap.as_string(oa), heap.as_string(ob)) {
                (Some(sa), Some(sb)) => Some(format!("{}{}", sa.value, sb.value)),
                _ => None,
            };
            match joined {
                Some(joined) => vm.push(Value::Obj(heap.intern_string(&joined))),
                None => return Err(ErrorKind::TypeError("Operands must be two numbers or two strings.".to_string())),
            }
        }
        _ => return Err(ErrorKind::TypeError("Operands must be two numbers or two strings.".to_string())),
    }
    Ok(())
}

fn binary_number_op(vm: &mut Vm, verb: &str, f: impl Fn(f64, f64) -> f64) -> Result<(), ErrorKind> {
    let b = vm.pop();
    let a = vm.pop();
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => {
            vm.push(Value::Number(f(a, b)));
            Ok(())
        }
        _ => Err(ErrorKind::TypeError(format!("Operands must be numbers to {verb}."))),
    }
}

fn binary_compare(vm: &mut Vm, f: impl Fn(f64, f64) -> bool) -> Result<(), ErrorKind> {
    let b = vm.pop();
    let a = vm.pop();
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => {
            vm.push(Value::Bool(f(a, b)));
            Ok(())
        }
        _ => Err(ErrorKind::TypeError("Operands must be numbers.".to_string())),
    }
}
