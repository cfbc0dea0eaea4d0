//! The execution loop.
//!
//! Runs pre-processed code against an instance. All decoding and validation
//! work happened at parse time: the loop reads fixed-width immediates,
//! follows precomputed branch records and pushes onto a pre-sized operand
//! stack, trusting the types the validator proved.

use crate::instance::InstanceRef;
use crate::isa::{self, Code, Instr, BRANCH_RECORD_SIZE};
use crate::nan_preserving_float::{F32, F64};
use crate::stack::OperandStack;
use crate::types::{FuncIdx, ValueType};
use crate::untyped::UntypedValue;
use crate::value::Value;
use core::cell::Cell;

/// Maximal number of nested calls.
///
/// Invoking a function at this depth traps before any of its instructions
/// run, protecting the native stack from runaway guest recursion, including
/// recursion through re-entrant host functions.
pub const CALL_STACK_LIMIT: u32 = 2048;

/// The outcome of executing a function: a trap, no value, or one value.
///
/// A trap only discards the trapped invocation's operand stack; memory,
/// globals and table keep all writes performed before the trap, and further
/// calls on the same instance proceed normally.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionResult {
    /// Execution trapped.
    Trap,
    /// The function returned no value.
    Void,
    /// The function returned a value.
    Value(Value),
}

impl ExecutionResult {
    /// Whether execution trapped.
    pub fn trapped(&self) -> bool {
        matches!(self, ExecutionResult::Trap)
    }

    /// The returned value, if any.
    pub fn value(&self) -> Option<Value> {
        match self {
            ExecutionResult::Value(value) => Some(*value),
            _ => None,
        }
    }
}

/// An instruction budget shared by an invocation and everything it calls.
///
/// Every opcode dispatch consumes one tick; when the budget is exhausted the
/// current invocation traps before executing the instruction. Host functions
/// receive the meter and forward it when they re-enter the interpreter, so
/// the budget spans the whole call tree.
#[derive(Debug)]
pub struct Meter {
    ticks: Cell<u64>,
}

impl Meter {
    /// Creates a meter with the given instruction budget.
    pub fn new(ticks: u64) -> Meter {
        Meter {
            ticks: Cell::new(ticks),
        }
    }

    /// Ticks still available.
    pub fn remaining(&self) -> u64 {
        self.ticks.get()
    }

    /// Consumes one tick; `false` when the budget is exhausted.
    fn tick(&self) -> bool {
        let remaining = self.ticks.get();
        if remaining == 0 {
            return false;
        }
        self.ticks.set(remaining - 1);
        true
    }
}

/// Executes a function of the instance at depth 0, without metering.
///
/// Arguments must match the function signature; this is the caller's
/// responsibility here (checked in debug builds). Use
/// [`ExternalFunction::call`](crate::ExternalFunction::call) for the checked
/// path.
pub fn execute(instance: &InstanceRef, func_idx: FuncIdx, args: &[Value]) -> ExecutionResult {
    execute_with(instance, func_idx, args, 0, None)
}

/// Executes a function of the instance at the given call depth, with
/// optional instruction metering.
///
/// # Panics
///
/// Panics when `func_idx` is not a function of the instance.
pub fn execute_with(
    instance: &InstanceRef,
    func_idx: FuncIdx,
    args: &[Value],
    depth: u32,
    meter: Option<&Meter>,
) -> ExecutionResult {
    if depth >= CALL_STACK_LIMIT {
        return ExecutionResult::Trap;
    }

    let imported = instance.imported_functions();
    if (func_idx as usize) < imported.len() {
        return imported[func_idx as usize].invoke(instance, args, depth, meter);
    }

    let code_idx = func_idx as usize - imported.len();
    let code = &instance.module().codesec[code_idx];
    let func_type = instance.module().get_function_type(func_idx);
    debug_assert_eq!(args.len(), func_type.params().len());
    debug_assert!(args
        .iter()
        .zip(func_type.params())
        .all(|(arg, param)| arg.value_type() == *param));

    let stack = OperandStack::new(args, code.local_count, code.max_stack_height);
    run(instance, code, func_type.result(), stack, depth, meter)
}

/// Reads a branch record and redirects both cursors, dropping the recorded
/// number of operands below the carried values.
fn take_branch(code: &Code, stack: &mut OperandStack, pc: &mut usize, imm: &mut usize) {
    let target_pc = isa::read_u32(&code.immediates, imm);
    let target_imm = isa::read_u32(&code.immediates, imm);
    let drop = isa::read_u32(&code.immediates, imm);
    let arity = isa::read_u8(&code.immediates, imm);
    *pc = target_pc as usize;
    *imm = target_imm as usize;
    stack.drop_keep(drop, arity);
}

fn run(
    instance: &InstanceRef,
    code: &Code,
    result_type: Option<ValueType>,
    mut stack: OperandStack,
    depth: u32,
    meter: Option<&Meter>,
) -> ExecutionResult {
    let memory = instance.memory();
    let mut pc = 0usize;
    let mut imm = 0usize;

    macro_rules! trap {
        () => {
            return ExecutionResult::Trap
        };
    }

    macro_rules! try_op {
        ($op:expr) => {
            match $op {
                Ok(value) => value,
                Err(_) => trap!(),
            }
        };
    }

    macro_rules! memory {
        () => {
            memory.expect("validation admits memory instructions only with a memory")
        };
    }

    macro_rules! read_imm_u32 {
        () => {
            isa::read_u32(&code.immediates, &mut imm)
        };
    }

    // Loads push the loaded value as-is; the extending forms widen through a
    // plain `as` cast, which sign- or zero-extends per the source type.
    macro_rules! load {
        ($ty:ty) => {{
            let offset = read_imm_u32!();
            let address = u32::from(stack.pop());
            let value = try_op!(memory!().load::<$ty>(address, offset));
            stack.push(UntypedValue::from(value));
        }};
        ($src:ty => $dst:ty) => {{
            let offset = read_imm_u32!();
            let address = u32::from(stack.pop());
            let value = try_op!(memory!().load::<$src>(address, offset));
            stack.push(UntypedValue::from(value as $dst));
        }};
    }

    macro_rules! store {
        ($ty:ty) => {{
            let offset = read_imm_u32!();
            let value = <$ty>::from(stack.pop());
            let address = u32::from(stack.pop());
            try_op!(memory!().store::<$ty>(address, offset, value));
        }};
    }

    macro_rules! unary {
        ($method:ident) => {{
            let value = stack.pop();
            stack.push(value.$method());
        }};
    }

    macro_rules! try_unary {
        ($method:ident) => {{
            let value = stack.pop();
            stack.push(try_op!(value.$method()));
        }};
    }

    macro_rules! binary {
        ($method:ident) => {{
            let rhs = stack.pop();
            let lhs = stack.pop();
            stack.push(lhs.$method(rhs));
        }};
    }

    macro_rules! try_binary {
        ($method:ident) => {{
            let rhs = stack.pop();
            let lhs = stack.pop();
            stack.push(try_op!(lhs.$method(rhs)));
        }};
    }

    macro_rules! invoke {
        ($result:expr) => {
            match $result {
                ExecutionResult::Trap => trap!(),
                ExecutionResult::Void => {}
                ExecutionResult::Value(value) => stack.push(UntypedValue::from(value)),
            }
        };
    }

    loop {
        if let Some(meter) = meter {
            if !meter.tick() {
                trap!();
            }
        }

        let instr = code.instructions[pc];
        pc += 1;

        match instr {
            Instr::Unreachable => trap!(),
            Instr::Nop => {}

            // The structure of blocks is fully encoded in branch records;
            // entering one only skips its immediates.
            Instr::Block => imm += 9,
            Instr::Loop => imm += 1,

            Instr::If => {
                imm += 9; // arity byte and end target
                let else_pc = read_imm_u32!();
                let else_imm = read_imm_u32!();
                if u32::from(stack.pop()) == 0 {
                    pc = else_pc as usize;
                    imm = else_imm as usize;
                }
            }

            // Reached only by falling off the then-arm: skip the else-arm.
            Instr::Else => {
                let end_pc = read_imm_u32!();
                let end_imm = read_imm_u32!();
                pc = end_pc as usize;
                imm = end_imm as usize;
            }

            Instr::End => {
                if pc == code.instructions.len() {
                    break;
                }
            }

            Instr::Br | Instr::Return => take_branch(code, &mut stack, &mut pc, &mut imm),

            Instr::BrIf => {
                if u32::from(stack.pop()) != 0 {
                    take_branch(code, &mut stack, &mut pc, &mut imm);
                } else {
                    imm += BRANCH_RECORD_SIZE;
                }
            }

            Instr::BrTable => {
                let count = read_imm_u32!();
                let index = u32::from(stack.pop());
                // Out-of-range indices take the default target, stored after
                // the labelled ones.
                let taken = index.min(count);
                imm += taken as usize * BRANCH_RECORD_SIZE;
                take_branch(code, &mut stack, &mut pc, &mut imm);
            }

            Instr::Call => {
                let callee = read_imm_u32!();
                let func_type = instance.module().get_function_type(callee);
                let args = stack.pop_call_args(func_type.params());
                invoke!(execute_with(instance, callee, &args, depth + 1, meter));
            }

            Instr::CallIndirect => {
                let expected_type_idx = read_imm_u32!();
                let element = u32::from(stack.pop());
                let table = instance
                    .table()
                    .expect("validation admits call_indirect only with a table");
                let func = match table.get(element) {
                    Ok(Some(func)) => func,
                    // Out of bounds or an uninitialized element.
                    _ => trap!(),
                };
                let expected_type = &instance.module().typesec[expected_type_idx as usize];
                if func.func_type() != expected_type {
                    trap!();
                }
                let args = stack.pop_call_args(func.func_type().params());
                invoke!(func.invoke(instance, &args, depth + 1, meter));
            }

            Instr::Drop => {
                stack.pop();
            }

            Instr::Select => {
                let condition = u32::from(stack.pop());
                let val2 = stack.pop();
                let val1 = stack.pop();
                stack.push(if condition != 0 { val1 } else { val2 });
            }

            Instr::LocalGet => {
                let idx = read_imm_u32!();
                stack.push(stack.local(idx));
            }
            Instr::LocalSet => {
                let idx = read_imm_u32!();
                let value = stack.pop();
                stack.set_local(idx, value);
            }
            Instr::LocalTee => {
                let idx = read_imm_u32!();
                stack.set_local(idx, stack.top());
            }

            Instr::GlobalGet => {
                let idx = read_imm_u32!();
                stack.push(UntypedValue::from_bits(instance.global(idx).get_bits()));
            }
            Instr::GlobalSet => {
                let idx = read_imm_u32!();
                instance.global(idx).set_bits(stack.pop().to_bits());
            }

            Instr::I32Load => load!(u32),
            Instr::I64Load => load!(u64),
            Instr::F32Load => load!(F32),
            Instr::F64Load => load!(F64),
            Instr::I32Load8S => load!(i8 => i32),
            Instr::I32Load8U => load!(u8 => u32),
            Instr::I32Load16S => load!(i16 => i32),
            Instr::I32Load16U => load!(u16 => u32),
            Instr::I64Load8S => load!(i8 => i64),
            Instr::I64Load8U => load!(u8 => u64),
            Instr::I64Load16S => load!(i16 => i64),
            Instr::I64Load16U => load!(u16 => u64),
            Instr::I64Load32S => load!(i32 => i64),
            Instr::I64Load32U => load!(u32 => u64),

            Instr::I32Store => store!(u32),
            Instr::I64Store => store!(u64),
            Instr::F32Store => store!(F32),
            Instr::F64Store => store!(F64),
            Instr::I32Store8 | Instr::I64Store8 => store!(u8),
            Instr::I32Store16 | Instr::I64Store16 => store!(u16),
            Instr::I64Store32 => store!(u32),

            Instr::MemorySize => {
                let pages = memory!().current_size().0 as u32;
                stack.push(UntypedValue::from(pages));
            }
            Instr::MemoryGrow => {
                let delta = u32::from(stack.pop());
                stack.push(UntypedValue::from(memory!().grow(delta)));
            }

            Instr::I32Const => {
                let value = read_imm_u32!();
                stack.push(UntypedValue::from(value));
            }
            Instr::I64Const => {
                let value = isa::read_u64(&code.immediates, &mut imm);
                stack.push(UntypedValue::from(value));
            }
            Instr::F32Const => {
                let bits = read_imm_u32!();
                stack.push(UntypedValue::from(F32::from_bits(bits)));
            }
            Instr::F64Const => {
                let bits = isa::read_u64(&code.immediates, &mut imm);
                stack.push(UntypedValue::from(F64::from_bits(bits)));
            }

            Instr::I32Eqz => unary!(i32_eqz),
            Instr::I32Eq => binary!(i32_eq),
            Instr::I32Ne => binary!(i32_ne),
            Instr::I32LtS => binary!(i32_lt_s),
            Instr::I32LtU => binary!(i32_lt_u),
            Instr::I32GtS => binary!(i32_gt_s),
            Instr::I32GtU => binary!(i32_gt_u),
            Instr::I32LeS => binary!(i32_le_s),
            Instr::I32LeU => binary!(i32_le_u),
            Instr::I32GeS => binary!(i32_ge_s),
            Instr::I32GeU => binary!(i32_ge_u),

            Instr::I64Eqz => unary!(i64_eqz),
            Instr::I64Eq => binary!(i64_eq),
            Instr::I64Ne => binary!(i64_ne),
            Instr::I64LtS => binary!(i64_lt_s),
            Instr::I64LtU => binary!(i64_lt_u),
            Instr::I64GtS => binary!(i64_gt_s),
            Instr::I64GtU => binary!(i64_gt_u),
            Instr::I64LeS => binary!(i64_le_s),
            Instr::I64LeU => binary!(i64_le_u),
            Instr::I64GeS => binary!(i64_ge_s),
            Instr::I64GeU => binary!(i64_ge_u),

            Instr::F32Eq => binary!(f32_eq),
            Instr::F32Ne => binary!(f32_ne),
            Instr::F32Lt => binary!(f32_lt),
            Instr::F32Gt => binary!(f32_gt),
            Instr::F32Le => binary!(f32_le),
            Instr::F32Ge => binary!(f32_ge),

            Instr::F64Eq => binary!(f64_eq),
            Instr::F64Ne => binary!(f64_ne),
            Instr::F64Lt => binary!(f64_lt),
            Instr::F64Gt => binary!(f64_gt),
            Instr::F64Le => binary!(f64_le),
            Instr::F64Ge => binary!(f64_ge),

            Instr::I32Clz => unary!(i32_clz),
            Instr::I32Ctz => unary!(i32_ctz),
            Instr::I32Popcnt => unary!(i32_popcnt),
            Instr::I32Add => binary!(i32_add),
            Instr::I32Sub => binary!(i32_sub),
            Instr::I32Mul => binary!(i32_mul),
            Instr::I32DivS => try_binary!(i32_div_s),
            Instr::I32DivU => try_binary!(i32_div_u),
            Instr::I32RemS => try_binary!(i32_rem_s),
            Instr::I32RemU => try_binary!(i32_rem_u),
            Instr::I32And => binary!(i32_and),
            Instr::I32Or => binary!(i32_or),
            Instr::I32Xor => binary!(i32_xor),
            Instr::I32Shl => binary!(i32_shl),
            Instr::I32ShrS => binary!(i32_shr_s),
            Instr::I32ShrU => binary!(i32_shr_u),
            Instr::I32Rotl => binary!(i32_rotl),
            Instr::I32Rotr => binary!(i32_rotr),

            Instr::I64Clz => unary!(i64_clz),
            Instr::I64Ctz => unary!(i64_ctz),
            Instr::I64Popcnt => unary!(i64_popcnt),
            Instr::I64Add => binary!(i64_add),
            Instr::I64Sub => binary!(i64_sub),
            Instr::I64Mul => binary!(i64_mul),
            Instr::I64DivS => try_binary!(i64_div_s),
            Instr::I64DivU => try_binary!(i64_div_u),
            Instr::I64RemS => try_binary!(i64_rem_s),
            Instr::I64RemU => try_binary!(i64_rem_u),
            Instr::I64And => binary!(i64_and),
            Instr::I64Or => binary!(i64_or),
            Instr::I64Xor => binary!(i64_xor),
            Instr::I64Shl => binary!(i64_shl),
            Instr::I64ShrS => binary!(i64_shr_s),
            Instr::I64ShrU => binary!(i64_shr_u),
            Instr::I64Rotl => binary!(i64_rotl),
            Instr::I64Rotr => binary!(i64_rotr),

            Instr::F32Abs => unary!(f32_abs),
            Instr::F32Neg => unary!(f32_neg),
            Instr::F32Ceil => unary!(f32_ceil),
            Instr::F32Floor => unary!(f32_floor),
            Instr::F32Trunc => unary!(f32_trunc),
            Instr::F32Nearest => unary!(f32_nearest),
            Instr::F32Sqrt => unary!(f32_sqrt),
            Instr::F32Add => binary!(f32_add),
            Instr::F32Sub => binary!(f32_sub),
            Instr::F32Mul => binary!(f32_mul),
            Instr::F32Div => try_binary!(f32_div),
            Instr::F32Min => binary!(f32_min),
            Instr::F32Max => binary!(f32_max),
            Instr::F32Copysign => binary!(f32_copysign),

            Instr::F64Abs => unary!(f64_abs),
            Instr::F64Neg => unary!(f64_neg),
            Instr::F64Ceil => unary!(f64_ceil),
            Instr::F64Floor => unary!(f64_floor),
            Instr::F64Trunc => unary!(f64_trunc),
            Instr::F64Nearest => unary!(f64_nearest),
            Instr::F64Sqrt => unary!(f64_sqrt),
            Instr::F64Add => binary!(f64_add),
            Instr::F64Sub => binary!(f64_sub),
            Instr::F64Mul => binary!(f64_mul),
            Instr::F64Div => try_binary!(f64_div),
            Instr::F64Min => binary!(f64_min),
            Instr::F64Max => binary!(f64_max),
            Instr::F64Copysign => binary!(f64_copysign),

            Instr::I32WrapI64 => unary!(i32_wrap_i64),
            Instr::I32TruncF32S => try_unary!(i32_trunc_f32_s),
            Instr::I32TruncF32U => try_unary!(i32_trunc_f32_u),
            Instr::I32TruncF64S => try_unary!(i32_trunc_f64_s),
            Instr::I32TruncF64U => try_unary!(i32_trunc_f64_u),
            Instr::I64ExtendI32S => unary!(i64_extend_i32_s),
            Instr::I64ExtendI32U => unary!(i64_extend_i32_u),
            Instr::I64TruncF32S => try_unary!(i64_trunc_f32_s),
            Instr::I64TruncF32U => try_unary!(i64_trunc_f32_u),
            Instr::I64TruncF64S => try_unary!(i64_trunc_f64_s),
            Instr::I64TruncF64U => try_unary!(i64_trunc_f64_u),
            Instr::F32ConvertI32S => unary!(f32_convert_i32_s),
            Instr::F32ConvertI32U => unary!(f32_convert_i32_u),
            Instr::F32ConvertI64S => unary!(f32_convert_i64_s),
            Instr::F32ConvertI64U => unary!(f32_convert_i64_u),
            Instr::F32DemoteF64 => unary!(f32_demote_f64),
            Instr::F64ConvertI32S => unary!(f64_convert_i32_s),
            Instr::F64ConvertI32U => unary!(f64_convert_i32_u),
            Instr::F64ConvertI64S => unary!(f64_convert_i64_s),
            Instr::F64ConvertI64U => unary!(f64_convert_i64_u),
            Instr::F64PromoteF32 => unary!(f64_promote_f32),

            // Reinterpret casts leave the bits as they are; the 32-bit forms
            // only normalize the unused upper half of the slot.
            Instr::I32ReinterpretF32 | Instr::F32ReinterpretI32 => unary!(reinterpret32),
            Instr::I64ReinterpretF64 | Instr::F64ReinterpretI64 => {}
        }
    }

    let result = match result_type {
        Some(ty) => ExecutionResult::Value(stack.pop().with_type(ty)),
        None => ExecutionResult::Void,
    };
    debug_assert_eq!(stack.height(), 0);
    result
}
