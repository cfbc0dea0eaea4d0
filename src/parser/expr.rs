//! The one-pass function body parser.
//!
//! A single scan over the raw instruction bytes performs three jobs at once:
//! it validates every instruction against an abstract operand-type stack (the
//! Wasm validation algorithm), it emits the flat [`Code`] form described in
//! [`crate::isa`], and it backpatches the targets of forward branches once
//! the matching `end`/`else` is reached. The maximal operand stack height is
//! tracked along the way so the interpreter can pre-size its stack.
//!
//! The abstract stack stores `Option<ValueType>`; `None` is the polymorphic
//! "unknown" type that only appears in unreachable code after `br`,
//! `br_table`, `return` or `unreachable`.

use crate::isa::{self, metrics, Code, Instr};
use crate::module::{ConstantExpression, Module};
use crate::parser::decode::Decoder;
use crate::types::{FuncType, ValueType};
use crate::Error;

fn malformed(message: impl Into<String>) -> Error {
    Error::Malformed(message.into())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}

/// Decodes a valtype byte.
fn valtype(byte: u8) -> Result<ValueType, Error> {
    ValueType::from_byte(byte).ok_or_else(|| invalid(format!("invalid value type {byte}")))
}

/// Decodes a blocktype: `0x40` for an empty result or a single valtype.
fn blocktype(decoder: &mut Decoder) -> Result<Option<ValueType>, Error> {
    const BLOCK_TYPE_EMPTY: u8 = 0x40;
    let byte = decoder.byte()?;
    if byte == BLOCK_TYPE_EMPTY {
        return Ok(None);
    }
    valtype(byte).map(Some)
}

/// What kind of construct opened a control frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FrameKind {
    /// The implicit frame around the whole function body.
    Function,
    Block,
    Loop,
    If,
    Else,
}

/// One entry of the control stack: an open `block`/`loop`/`if`/`else`
/// construct (or the function body itself) together with everything needed
/// to validate branches to it and to backpatch their targets.
struct ControlFrame {
    kind: FrameKind,
    result_type: Option<ValueType>,
    /// Operand stack height at frame entry.
    parent_stack_height: usize,
    /// Set once the rest of the frame is unreachable; enables the
    /// stack-polymorphic typing rules.
    unreachable: bool,
    /// Precomputed branch target for loops (the loop entry).
    entry_pc: u32,
    entry_imm: u32,
    /// Immediate offsets of 8-byte `(pc, imm)` pairs that receive the
    /// end target of this frame when its `end` is parsed.
    end_slots: Vec<u32>,
    /// Immediate offset of the `if`'s else-target pair, patched at `else`
    /// (or together with the end target when there is no `else`).
    else_slot: Option<u32>,
    /// Immediate offsets of branch records targeting this frame, patched
    /// when its `end` is parsed.
    branch_records: Vec<u32>,
}

impl ControlFrame {
    /// Number of values a branch to this frame carries. Branches to a loop
    /// jump back to its beginning and carry nothing.
    fn branch_arity(&self) -> u8 {
        match self.kind {
            FrameKind::Loop => 0,
            _ => self.result_type.is_some() as u8,
        }
    }

    fn branch_value_type(&self) -> Option<ValueType> {
        match self.kind {
            FrameKind::Loop => None,
            _ => self.result_type,
        }
    }
}

/// Resolves a local index to its type without materializing one entry per
/// local (a body may declare billions of locals in a few bytes).
struct Locals<'a> {
    params: &'a [ValueType],
    /// `(one past the last declared-local index of the group, type)`.
    groups: Vec<(u32, ValueType)>,
}

impl Locals<'_> {
    fn type_of(&self, idx: u32) -> Result<ValueType, Error> {
        if let Some(ty) = self.params.get(idx as usize) {
            return Ok(*ty);
        }
        let local_idx = idx - self.params.len() as u32;
        for &(end, ty) in &self.groups {
            if local_idx < end {
                return Ok(ty);
            }
        }
        Err(invalid(format!("invalid local index {idx}")))
    }
}

struct FunctionContext<'a> {
    module: &'a Module,
    locals: Locals<'a>,
    code: Code,
    /// The abstract operand-type stack; `None` is the polymorphic unknown.
    stack: Vec<Option<ValueType>>,
    frames: Vec<ControlFrame>,
}

impl<'a> FunctionContext<'a> {
    fn top_frame(&self) -> &ControlFrame {
        self.frames
            .last()
            .expect("the function frame is popped only when parsing ends")
    }

    fn push_type(&mut self, ty: Option<ValueType>) {
        self.stack.push(ty);
        let height = self.stack.len() as u32;
        if height > self.code.max_stack_height {
            self.code.max_stack_height = height;
        }
    }

    /// Pops any value, applying the stack-polymorphic rule in unreachable
    /// code: popping from an empty polymorphic stack yields the unknown type.
    fn pop_any(&mut self) -> Result<Option<ValueType>, Error> {
        let frame = self.top_frame();
        if self.stack.len() == frame.parent_stack_height {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(invalid("stack underflow"));
        }
        Ok(self.stack.pop().unwrap_or(None))
    }

    fn pop_expect(&mut self, expected: ValueType) -> Result<(), Error> {
        if let Some(actual) = self.pop_any()? {
            if actual != expected {
                return Err(invalid(format!(
                    "type mismatch: expected {expected}, got {actual}"
                )));
            }
        }
        Ok(())
    }

    /// Returns the type `depth` slots below the top without popping.
    fn peek(&self, depth: usize) -> Result<Option<ValueType>, Error> {
        let frame = self.top_frame();
        if self.stack.len() <= frame.parent_stack_height + depth {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(invalid("stack underflow"));
        }
        Ok(self.stack[self.stack.len() - 1 - depth])
    }

    /// Marks the rest of the current frame unreachable and resets the
    /// operand stack to the frame entry height.
    fn set_unreachable(&mut self) {
        let frame = self
            .frames
            .last_mut()
            .expect("the function frame is popped only when parsing ends");
        self.stack.truncate(frame.parent_stack_height);
        frame.unreachable = true;
    }

    /// Applies the fixed stack effect of a non-structural instruction.
    fn apply_metrics(&mut self, instr: Instr) -> Result<(), Error> {
        let metrics =
            metrics(instr).expect("context-dependent instructions are handled explicitly");
        for input in metrics.inputs.iter().rev() {
            self.pop_expect(*input)?;
        }
        if let Some(output) = metrics.output {
            self.push_type(Some(output));
        }
        Ok(())
    }

    /// Checks the label is in range and that the value carried by a branch
    /// to it is on top of the stack with the right type.
    fn validate_branch(&self, label: u32) -> Result<(), Error> {
        let frame_idx = self
            .frames
            .len()
            .checked_sub(1 + label as usize)
            .ok_or_else(|| invalid("invalid label index"))?;
        if let Some(expected) = self.frames[frame_idx].branch_value_type() {
            if let Some(actual) = self.peek(0)? {
                if actual != expected {
                    return Err(invalid(format!(
                        "type mismatch: branch carries {actual}, label expects {expected}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Emits a 13-byte branch record for a branch to `label`.
    ///
    /// Backward targets (loops) are filled immediately; forward targets are
    /// registered with the frame and patched at its `end`.
    fn emit_branch_record(&mut self, label: u32) {
        let frame_idx = self.frames.len() - 1 - label as usize;
        let frame = &self.frames[frame_idx];
        let arity = frame.branch_arity();
        let drop = self
            .stack
            .len()
            .saturating_sub(frame.parent_stack_height + arity as usize) as u32;

        let record_offset = self.code.immediates.len() as u32;
        if frame.kind == FrameKind::Loop {
            isa::push_u32(&mut self.code.immediates, frame.entry_pc);
            isa::push_u32(&mut self.code.immediates, frame.entry_imm);
        } else {
            isa::push_u32(&mut self.code.immediates, 0);
            isa::push_u32(&mut self.code.immediates, 0);
            self.frames[frame_idx].branch_records.push(record_offset);
        }
        isa::push_u32(&mut self.code.immediates, drop);
        self.code.immediates.push(arity);
    }

    /// Reserves an 8-byte `(pc, imm)` target pair in the immediates stream.
    fn reserve_target_pair(&mut self) -> u32 {
        let offset = self.code.immediates.len() as u32;
        isa::push_u32(&mut self.code.immediates, 0);
        isa::push_u32(&mut self.code.immediates, 0);
        offset
    }

    fn patch_target_pair(&mut self, offset: u32, pc: u32, imm: u32) {
        isa::patch_u32(&mut self.code.immediates, offset as usize, pc);
        isa::patch_u32(&mut self.code.immediates, offset as usize + 4, imm);
    }

    /// On the reachable path the operand stack must hold exactly the frame's
    /// result on top of its entry height.
    fn check_frame_result(&self) -> Result<(), Error> {
        let frame = self.top_frame();
        if frame.unreachable {
            return Ok(());
        }
        let arity = frame.result_type.is_some() as usize;
        let expected_height = frame.parent_stack_height + arity;
        if self.stack.len() != expected_height {
            return Err(invalid(
                "type mismatch: operand stack does not match the block result",
            ));
        }
        if let (Some(expected), Some(actual)) = (
            frame.result_type,
            self.stack.last().copied().unwrap_or(None),
        ) {
            if actual != expected {
                return Err(invalid(format!(
                    "type mismatch: block result is {expected}, got {actual}"
                )));
            }
        }
        Ok(())
    }
}

/// Parses one code-section entry (locals declarations followed by the
/// expression) into its pre-processed form.
pub(crate) fn parse_code(
    decoder: &mut Decoder,
    module: &Module,
    func_type: &FuncType,
) -> Result<Code, Error> {
    let mut groups = Vec::new();
    let mut total: u64 = 0;
    let group_count = decoder.leb_u32()?;
    for _ in 0..group_count {
        let count = decoder.leb_u32()?;
        let ty = valtype(decoder.byte()?)?;
        total += count as u64;
        if total > u32::MAX as u64 {
            return Err(invalid("too many locals"));
        }
        groups.push((total as u32, ty));
    }

    let locals = Locals {
        params: func_type.params(),
        groups,
    };

    let mut ctx = FunctionContext {
        module,
        code: Code {
            local_count: total as u32,
            ..Code::default()
        },
        locals,
        stack: Vec::new(),
        frames: vec![ControlFrame {
            kind: FrameKind::Function,
            result_type: func_type.result(),
            parent_stack_height: 0,
            unreachable: false,
            entry_pc: 0,
            entry_imm: 0,
            end_slots: Vec::new(),
            else_slot: None,
            branch_records: Vec::new(),
        }],
    };

    parse_expr(decoder, &mut ctx)?;

    debug_assert!(ctx.frames.is_empty());
    Ok(ctx.code)
}

fn parse_expr(decoder: &mut Decoder, ctx: &mut FunctionContext) -> Result<(), Error> {
    loop {
        let opcode = decoder.byte()?;
        let instr = Instr::from_byte(opcode)
            .ok_or_else(|| malformed(format!("invalid instruction {opcode}")))?;

        match instr {
            Instr::Unreachable => {
                ctx.set_unreachable();
            }
            Instr::Nop => {}

            Instr::Block => {
                let result_type = blocktype(decoder)?;
                ctx.code.immediates.push(result_type.is_some() as u8);
                let parent_stack_height = ctx.stack.len();
                let end_slot = ctx.reserve_target_pair();
                ctx.frames.push(ControlFrame {
                    kind: FrameKind::Block,
                    result_type,
                    parent_stack_height,
                    unreachable: false,
                    entry_pc: 0,
                    entry_imm: 0,
                    end_slots: vec![end_slot],
                    else_slot: None,
                    branch_records: Vec::new(),
                });
            }

            Instr::Loop => {
                let result_type = blocktype(decoder)?;
                ctx.code.immediates.push(result_type.is_some() as u8);
                // A branch to the loop re-enters right after the loop opcode
                // and its arity byte.
                let entry_pc = ctx.code.instructions.len() as u32 + 1;
                let entry_imm = ctx.code.immediates.len() as u32;
                ctx.frames.push(ControlFrame {
                    kind: FrameKind::Loop,
                    result_type,
                    parent_stack_height: ctx.stack.len(),
                    unreachable: false,
                    entry_pc,
                    entry_imm,
                    end_slots: Vec::new(),
                    else_slot: None,
                    branch_records: Vec::new(),
                });
            }

            Instr::If => {
                let result_type = blocktype(decoder)?;
                ctx.pop_expect(ValueType::I32)?;
                ctx.code.immediates.push(result_type.is_some() as u8);
                let parent_stack_height = ctx.stack.len();
                let end_slot = ctx.reserve_target_pair();
                let else_slot = ctx.reserve_target_pair();
                ctx.frames.push(ControlFrame {
                    kind: FrameKind::If,
                    result_type,
                    parent_stack_height,
                    unreachable: false,
                    entry_pc: 0,
                    entry_imm: 0,
                    end_slots: vec![end_slot],
                    else_slot: Some(else_slot),
                    branch_records: Vec::new(),
                });
            }

            Instr::Else => {
                if ctx.top_frame().kind != FrameKind::If {
                    return Err(malformed("unexpected else instruction (if instruction missing)"));
                }
                ctx.check_frame_result()?;

                // The else opcode carries its own end-target pair, read when
                // the then-arm falls through into it.
                let end_pair = ctx.reserve_target_pair();

                let frame = ctx
                    .frames
                    .last_mut()
                    .expect("the if frame was just inspected");
                frame.kind = FrameKind::Else;
                frame.unreachable = false;
                frame.end_slots.push(end_pair);
                let parent_stack_height = frame.parent_stack_height;
                let else_slot = frame
                    .else_slot
                    .take()
                    .expect("an if frame always reserves an else target");
                ctx.stack.truncate(parent_stack_height);

                // A false condition jumps right past the else opcode and its
                // target pair.
                let pc = ctx.code.instructions.len() as u32 + 1;
                let imm = ctx.code.immediates.len() as u32;
                ctx.patch_target_pair(else_slot, pc, imm);
            }

            Instr::End => {
                // An if without an else cannot produce a result: the false
                // path would have none to offer.
                if ctx.top_frame().kind == FrameKind::If && ctx.top_frame().result_type.is_some() {
                    return Err(invalid("if without else must have an empty result type"));
                }
                ctx.check_frame_result()?;

                let frame = ctx
                    .frames
                    .pop()
                    .expect("the function frame is popped only when parsing ends");

                let is_function_end = frame.kind == FrameKind::Function;
                // Inner frames resolve to right after their end instruction;
                // the function frame resolves to the final end itself so the
                // interpreter's termination check fires.
                let target_pc = if is_function_end {
                    ctx.code.instructions.len() as u32
                } else {
                    ctx.code.instructions.len() as u32 + 1
                };
                let target_imm = ctx.code.immediates.len() as u32;

                for slot in &frame.end_slots {
                    ctx.patch_target_pair(*slot, target_pc, target_imm);
                }
                // An if that never saw an else sends the false path here too.
                if let Some(slot) = frame.else_slot {
                    ctx.patch_target_pair(slot, target_pc, target_imm);
                }
                for record in &frame.branch_records {
                    ctx.patch_target_pair(*record, target_pc, target_imm);
                }

                // Restore the stack to the frame result regardless of how the
                // frame ended.
                if frame.unreachable {
                    ctx.stack.truncate(frame.parent_stack_height);
                    if let Some(ty) = frame.result_type {
                        ctx.push_type(Some(ty));
                    }
                }

                if is_function_end {
                    ctx.code.instructions.push(instr);
                    return Ok(());
                }
            }

            Instr::Br => {
                let label = decoder.leb_u32()?;
                ctx.validate_branch(label)?;
                ctx.emit_branch_record(label);
                ctx.set_unreachable();
            }

            Instr::BrIf => {
                let label = decoder.leb_u32()?;
                ctx.pop_expect(ValueType::I32)?;
                ctx.validate_branch(label)?;
                ctx.emit_branch_record(label);
            }

            Instr::BrTable => {
                let labels = decoder.vec_u32()?;
                let default_label = decoder.leb_u32()?;
                ctx.pop_expect(ValueType::I32)?;

                ctx.validate_branch(default_label)?;
                let default_idx = ctx
                    .frames
                    .len()
                    .checked_sub(1 + default_label as usize)
                    .ok_or_else(|| invalid("invalid label index"))?;
                let expected = ctx.frames[default_idx].branch_value_type();
                for label in &labels {
                    ctx.validate_branch(*label)?;
                    let idx = ctx.frames.len() - 1 - *label as usize;
                    if ctx.frames[idx].branch_value_type() != expected {
                        return Err(invalid("br_table labels have inconsistent types"));
                    }
                }

                isa::push_u32(&mut ctx.code.immediates, labels.len() as u32);
                for label in &labels {
                    ctx.emit_branch_record(*label);
                }
                ctx.emit_branch_record(default_label);
                ctx.set_unreachable();
            }

            Instr::Return => {
                let label = ctx.frames.len() as u32 - 1;
                ctx.validate_branch(label)?;
                ctx.emit_branch_record(label);
                ctx.set_unreachable();
            }

            Instr::Call => {
                let func_idx = decoder.leb_u32()?;
                if func_idx as usize >= ctx.module.function_count() {
                    return Err(invalid(format!("invalid function index {func_idx}")));
                }
                isa::push_u32(&mut ctx.code.immediates, func_idx);
                let module = ctx.module;
                let func_type = module.get_function_type(func_idx);
                for param in func_type.params().iter().rev() {
                    ctx.pop_expect(*param)?;
                }
                if let Some(result) = func_type.result() {
                    ctx.push_type(Some(result));
                }
            }

            Instr::CallIndirect => {
                if !ctx.module.has_table() {
                    return Err(invalid("call_indirect requires a table"));
                }
                let type_idx = decoder.leb_u32()?;
                if type_idx as usize >= ctx.module.typesec.len() {
                    return Err(invalid(format!("invalid type index {type_idx}")));
                }
                let table_byte = decoder.byte()?;
                if table_byte != 0 {
                    return Err(malformed("invalid table index encountered with call_indirect"));
                }
                isa::push_u32(&mut ctx.code.immediates, type_idx);

                ctx.pop_expect(ValueType::I32)?;
                let module = ctx.module;
                let func_type = &module.typesec[type_idx as usize];
                for param in func_type.params().iter().rev() {
                    ctx.pop_expect(*param)?;
                }
                if let Some(result) = func_type.result() {
                    ctx.push_type(Some(result));
                }
            }

            Instr::Drop => {
                ctx.pop_any()?;
            }

            Instr::Select => {
                ctx.pop_expect(ValueType::I32)?;
                let second = ctx.pop_any()?;
                let first = ctx.pop_any()?;
                if let (Some(first), Some(second)) = (first, second) {
                    if first != second {
                        return Err(invalid(format!(
                            "type mismatch: select operands are {first} and {second}"
                        )));
                    }
                }
                ctx.push_type(first.or(second));
            }

            Instr::LocalGet => {
                let idx = decoder.leb_u32()?;
                let ty = ctx.locals.type_of(idx)?;
                isa::push_u32(&mut ctx.code.immediates, idx);
                ctx.push_type(Some(ty));
            }

            Instr::LocalSet => {
                let idx = decoder.leb_u32()?;
                let ty = ctx.locals.type_of(idx)?;
                isa::push_u32(&mut ctx.code.immediates, idx);
                ctx.pop_expect(ty)?;
            }

            Instr::LocalTee => {
                let idx = decoder.leb_u32()?;
                let ty = ctx.locals.type_of(idx)?;
                isa::push_u32(&mut ctx.code.immediates, idx);
                ctx.pop_expect(ty)?;
                ctx.push_type(Some(ty));
            }

            Instr::GlobalGet => {
                let idx = decoder.leb_u32()?;
                if idx as usize >= ctx.module.global_count() {
                    return Err(invalid(format!("invalid global index {idx}")));
                }
                isa::push_u32(&mut ctx.code.immediates, idx);
                let ty = ctx.module.global_type(idx).value_type;
                ctx.push_type(Some(ty));
            }

            Instr::GlobalSet => {
                let idx = decoder.leb_u32()?;
                if idx as usize >= ctx.module.global_count() {
                    return Err(invalid(format!("invalid global index {idx}")));
                }
                let global_type = ctx.module.global_type(idx);
                if !global_type.mutable {
                    return Err(invalid(format!("cannot modify immutable global {idx}")));
                }
                isa::push_u32(&mut ctx.code.immediates, idx);
                ctx.pop_expect(global_type.value_type)?;
            }

            Instr::MemorySize | Instr::MemoryGrow => {
                let memory_byte = decoder.byte()?;
                if memory_byte != 0 {
                    return Err(malformed("invalid memory index encountered"));
                }
                if !ctx.module.has_memory() {
                    return Err(invalid(
                        "memory instructions require imported or defined memory",
                    ));
                }
                ctx.apply_metrics(instr)?;
            }

            Instr::I32Const => {
                let value = decoder.leb_s32()?;
                isa::push_u32(&mut ctx.code.immediates, value as u32);
                ctx.apply_metrics(instr)?;
            }

            Instr::I64Const => {
                let value = decoder.leb_s64()?;
                isa::push_u64(&mut ctx.code.immediates, value as u64);
                ctx.apply_metrics(instr)?;
            }

            Instr::F32Const => {
                let bits = decoder.bytes(4)?;
                ctx.code.immediates.extend_from_slice(bits);
                ctx.apply_metrics(instr)?;
            }

            Instr::F64Const => {
                let bits = decoder.bytes(8)?;
                ctx.code.immediates.extend_from_slice(bits);
                ctx.apply_metrics(instr)?;
            }

            memory_access if memory_access.is_memory_access() => {
                let align = decoder.leb_u32()?;
                let offset = decoder.leb_u32()?;
                if !ctx.module.has_memory() {
                    return Err(invalid(
                        "memory instructions require imported or defined memory",
                    ));
                }
                if align > instr.memory_access_size().trailing_zeros() {
                    return Err(invalid("invalid alignment"));
                }
                isa::push_u32(&mut ctx.code.immediates, offset);
                ctx.apply_metrics(instr)?;
            }

            _ => {
                // Pure numeric instructions: no immediates, fixed stack
                // effect from the metrics table.
                ctx.apply_metrics(instr)?;
            }
        }

        ctx.code.instructions.push(instr);
    }
}

/// Parses an initializer expression, restricted to a single constant or a
/// `global.get` of an imported immutable global, followed by `end`.
///
/// The produced value must have `expected_type`; offsets of data and element
/// segments are i32-typed, globals use their declared type.
pub(crate) fn parse_constant_expression(
    decoder: &mut Decoder,
    module: &Module,
    expected_type: ValueType,
) -> Result<ConstantExpression, Error> {
    let opcode = decoder.byte()?;
    let instr = Instr::from_byte(opcode)
        .ok_or_else(|| malformed(format!("invalid instruction {opcode}")))?;

    let (expression, actual_type) = match instr {
        Instr::I32Const => {
            let value = decoder.leb_s32()?;
            (
                ConstantExpression::Constant(value as u32 as u64),
                ValueType::I32,
            )
        }
        Instr::I64Const => {
            let value = decoder.leb_s64()?;
            (ConstantExpression::Constant(value as u64), ValueType::I64)
        }
        Instr::F32Const => {
            let mut bits = [0u8; 4];
            bits.copy_from_slice(decoder.bytes(4)?);
            (
                ConstantExpression::Constant(u32::from_le_bytes(bits) as u64),
                ValueType::F32,
            )
        }
        Instr::F64Const => {
            let mut bits = [0u8; 8];
            bits.copy_from_slice(decoder.bytes(8)?);
            (
                ConstantExpression::Constant(u64::from_le_bytes(bits)),
                ValueType::F64,
            )
        }
        Instr::GlobalGet => {
            let idx = decoder.leb_u32()?;
            let imported = &module.imported_global_types;
            let Some(global_type) = imported.get(idx as usize) else {
                return Err(invalid(
                    "constant expression can use global.get only for imported globals",
                ));
            };
            if global_type.mutable {
                return Err(invalid(
                    "constant expression can use global.get only for const globals",
                ));
            }
            (ConstantExpression::GlobalGet(idx), global_type.value_type)
        }
        _ => {
            return Err(invalid("unexpected instruction in the constant expression"));
        }
    };

    if actual_type != expected_type {
        return Err(invalid(format!(
            "type mismatch in constant expression: expected {expected_type}, got {actual_type}"
        )));
    }

    let end = decoder.byte()?;
    if Instr::from_byte(end) != Some(Instr::End) {
        return Err(invalid("unexpected instruction in the constant expression"));
    }

    Ok(expression)
}
