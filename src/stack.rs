use crate::types::ValueType;
use crate::untyped::UntypedValue;
use crate::value::Value;

/// The per-invocation stack: the function's locals in the low slots and the
/// operand stack growing on top of them, in one allocation.
///
/// The capacity is fixed up front from the pre-computed maximal operand
/// height, so pushes never reallocate, and validation guarantees that no
/// operation under- or overruns the operand region; the accessors only
/// `debug_assert` it.
pub(crate) struct OperandStack {
    values: Vec<UntypedValue>,
    /// Number of local slots (parameters + declared locals) at the bottom.
    locals: usize,
}

impl OperandStack {
    /// Creates a stack holding `args` followed by `local_count` zeroed locals,
    /// with room for `max_stack_height` operands on top.
    pub fn new(args: &[Value], local_count: u32, max_stack_height: u32) -> OperandStack {
        let locals = args.len() + local_count as usize;
        let mut values = Vec::with_capacity(locals + max_stack_height as usize);
        values.extend(args.iter().map(|arg| UntypedValue::from(*arg)));
        values.resize(locals, UntypedValue::default());
        OperandStack { values, locals }
    }

    /// Height of the operand region.
    pub fn height(&self) -> usize {
        self.values.len() - self.locals
    }

    pub fn push(&mut self, value: UntypedValue) {
        debug_assert!(self.values.len() < self.values.capacity());
        self.values.push(value);
    }

    pub fn pop(&mut self) -> UntypedValue {
        debug_assert!(self.height() > 0);
        self.values.pop().unwrap_or_default()
    }

    pub fn top(&self) -> UntypedValue {
        debug_assert!(self.height() > 0);
        self.values[self.values.len() - 1]
    }

    pub fn local(&self, idx: u32) -> UntypedValue {
        debug_assert!((idx as usize) < self.locals);
        self.values[idx as usize]
    }

    pub fn set_local(&mut self, idx: u32, value: UntypedValue) {
        debug_assert!((idx as usize) < self.locals);
        self.values[idx as usize] = value;
    }

    /// Removes `drop` operands while keeping the top `arity` values, as a
    /// taken branch requires.
    pub fn drop_keep(&mut self, drop: u32, arity: u8) {
        debug_assert!(self.height() >= drop as usize + arity as usize);
        if drop == 0 {
            return;
        }
        let len = self.values.len();
        if arity != 0 {
            debug_assert_eq!(arity, 1);
            self.values[len - 1 - drop as usize] = self.values[len - 1];
        }
        self.values.truncate(len - drop as usize);
    }

    /// Pops the arguments of a call, returning them typed and in declaration
    /// order.
    pub fn pop_call_args(&mut self, params: &[ValueType]) -> Vec<Value> {
        debug_assert!(self.height() >= params.len());
        let first = self.values.len() - params.len();
        let args = self.values[first..]
            .iter()
            .zip(params)
            .map(|(value, ty)| value.with_type(*ty))
            .collect();
        self.values.truncate(first);
        args
    }
}
