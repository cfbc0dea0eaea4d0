use crate::types::GlobalType;
use crate::untyped::UntypedValue;
use crate::value::Value;
use crate::Error;
use core::cell::Cell;
use std::rc::Rc;

/// Reference to a [`GlobalInstance`] with reference-counting semantics.
///
/// Cloning the reference aliases the same storage, so a global exported from
/// one instance and imported into another shares its value between them.
#[derive(Clone, Debug)]
pub struct GlobalRef(Rc<GlobalInstance>);

impl ::core::ops::Deref for GlobalRef {
    type Target = GlobalInstance;
    fn deref(&self) -> &GlobalInstance {
        &self.0
    }
}

/// Runtime representation of a global variable.
///
/// The value is stored as a raw 64-bit pattern interpreted through the
/// declared type, matching the representation used on the operand stack.
#[derive(Debug)]
pub struct GlobalInstance {
    value: Cell<u64>,
    global_type: GlobalType,
}

impl GlobalInstance {
    /// Allocates a global holding `value`.
    pub fn alloc(value: Value, mutable: bool) -> GlobalRef {
        let global_type = GlobalType {
            value_type: value.value_type(),
            mutable,
        };
        Self::from_bits(UntypedValue::from(value).to_bits(), global_type)
    }

    pub(crate) fn from_bits(bits: u64, global_type: GlobalType) -> GlobalRef {
        GlobalRef(Rc::new(GlobalInstance {
            value: Cell::new(bits),
            global_type,
        }))
    }

    /// The type and mutability of this global.
    pub fn global_type(&self) -> GlobalType {
        self.global_type
    }

    /// Whether this global can be written.
    pub fn is_mutable(&self) -> bool {
        self.global_type.mutable
    }

    /// Reads the current value.
    pub fn get(&self) -> Value {
        UntypedValue::from_bits(self.value.get()).with_type(self.global_type.value_type)
    }

    /// Writes a new value.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the global is immutable or `value` has the wrong
    /// type.
    pub fn set(&self, value: Value) -> Result<(), Error> {
        if !self.global_type.mutable {
            return Err(Error::Global("trying to set an immutable global".into()));
        }
        if value.value_type() != self.global_type.value_type {
            return Err(Error::Global(format!(
                "expected a value of type {}, got {}",
                self.global_type.value_type,
                value.value_type()
            )));
        }
        self.value.set(UntypedValue::from(value).to_bits());
        Ok(())
    }

    /// Raw read used by the execution loop; mutability and type agreement
    /// were proven by validation.
    pub(crate) fn get_bits(&self) -> u64 {
        self.value.get()
    }

    /// Raw write used by the execution loop.
    pub(crate) fn set_bits(&self, bits: u64) {
        self.value.set(bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn get_returns_the_typed_value() {
        let global = GlobalInstance::alloc(Value::I64(-7), true);
        assert_eq!(global.get(), Value::I64(-7));
        global.set(Value::I64(9)).unwrap();
        assert_eq!(global.get(), Value::I64(9));
    }

    #[test]
    fn set_checks_mutability_and_type() {
        let immutable = GlobalInstance::alloc(Value::I32(1), false);
        assert_matches!(immutable.set(Value::I32(2)), Err(Error::Global(_)));

        let global = GlobalInstance::alloc(Value::I32(1), true);
        assert_matches!(global.set(Value::I64(2)), Err(Error::Global(_)));
    }

    #[test]
    fn clones_alias_the_same_storage() {
        let global = GlobalInstance::alloc(Value::I32(1), true);
        let alias = global.clone();
        global.set(Value::I32(42)).unwrap();
        assert_eq!(alias.get(), Value::I32(42));
    }
}
