//! Raw 64-bit operand slots.
//!
//! The execution loop and the globals pool store values without a type tag;
//! validation has already proven which type every slot holds at every program
//! point, so the tag would be dead weight. A slot is converted to a typed
//! [`Value`] only at the engine boundary, where the expected type is known.

use crate::nan_preserving_float::{F32, F64};
use crate::types::ValueType;
use crate::value::{
    ArithmeticOps, ExtendInto, Float, Integer, TrapCode, TryTruncateInto, Value, WrapInto,
};
use core::ops::{Neg, Shl, Shr};

/// An untyped [`Value`], stored as 64 raw bits.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct UntypedValue {
    bits: u64,
}

impl UntypedValue {
    /// Returns the underlying bits.
    pub fn to_bits(self) -> u64 {
        self.bits
    }

    /// Creates an untyped value from raw bits.
    pub fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Converts this value into a typed [`Value`].
    pub fn with_type(self, value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 => Value::I32(<_>::from(self)),
            ValueType::I64 => Value::I64(<_>::from(self)),
            ValueType::F32 => Value::F32(<_>::from(self)),
            ValueType::F64 => Value::F64(<_>::from(self)),
        }
    }
}

macro_rules! impl_from_untyped_for_int {
    ( $( $int:ty ),* $(,)? ) => {
        $(
            impl From<UntypedValue> for $int {
                fn from(untyped: UntypedValue) -> Self {
                    untyped.to_bits() as _
                }
            }
        )*
    };
}
impl_from_untyped_for_int!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_from_untyped_for_float {
    ( $( $float:ty ),* $(,)? ) => {
        $(
            impl From<UntypedValue> for $float {
                fn from(untyped: UntypedValue) -> Self {
                    Self::from_bits(untyped.to_bits() as _)
                }
            }
        )*
    };
}
impl_from_untyped_for_float!(f32, f64, F32, F64);

impl From<UntypedValue> for bool {
    fn from(untyped: UntypedValue) -> Self {
        untyped.to_bits() != 0
    }
}

macro_rules! impl_from_prim {
    ( $( $prim:ty ),* $(,)? ) => {
        $(
            impl From<$prim> for UntypedValue {
                fn from(value: $prim) -> Self {
                    Self { bits: value as u64 }
                }
            }
        )*
    };
}
#[rustfmt::skip]
impl_from_prim!(
    bool,
    i8, i16, i32, i64,
    u8, u16, u32, u64,
);

impl From<F32> for UntypedValue {
    fn from(value: F32) -> Self {
        Self {
            bits: value.to_bits() as u64,
        }
    }
}

impl From<F64> for UntypedValue {
    fn from(value: F64) -> Self {
        Self {
            bits: value.to_bits(),
        }
    }
}

impl From<Value> for UntypedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::I32(value) => value.into(),
            Value::I64(value) => value.into(),
            Value::F32(value) => value.into(),
            Value::F64(value) => value.into(),
        }
    }
}

macro_rules! op {
    ( $operator:tt ) => {{
        |lhs, rhs| lhs $operator rhs
    }};
}

impl UntypedValue {
    /// Execute an infallible unary operation over `T`.
    fn execute_unary<T, R>(self, op: fn(T) -> R) -> Self
    where
        T: From<Self>,
        R: Into<Self>,
    {
        op(T::from(self)).into()
    }

    /// Execute a fallible unary operation over `T`.
    fn try_execute_unary<T, R>(self, op: fn(T) -> Result<R, TrapCode>) -> Result<Self, TrapCode>
    where
        T: From<Self>,
        R: Into<Self>,
    {
        op(T::from(self)).map(Into::into)
    }

    /// Execute an infallible binary operation over `T`.
    fn execute_binary<T, R>(self, rhs: Self, op: fn(T, T) -> R) -> Self
    where
        T: From<Self>,
        R: Into<Self>,
    {
        op(T::from(self), T::from(rhs)).into()
    }

    /// Execute a fallible binary operation over `T`.
    fn try_execute_binary<T, R>(
        self,
        rhs: Self,
        op: fn(T, T) -> Result<R, TrapCode>,
    ) -> Result<Self, TrapCode>
    where
        T: From<Self>,
        R: Into<Self>,
    {
        op(T::from(self), T::from(rhs)).map(Into::into)
    }

    // Integer comparisons.

    pub fn i32_eqz(self) -> Self {
        self.execute_unary::<i32, bool>(|v| v == 0)
    }

    pub fn i64_eqz(self) -> Self {
        self.execute_unary::<i64, bool>(|v| v == 0)
    }

    pub fn i32_eq(self, rhs: Self) -> Self {
        self.execute_binary::<i32, bool>(rhs, op!(==))
    }

    pub fn i64_eq(self, rhs: Self) -> Self {
        self.execute_binary::<i64, bool>(rhs, op!(==))
    }

    pub fn i32_ne(self, rhs: Self) -> Self {
        self.execute_binary::<i32, bool>(rhs, op!(!=))
    }

    pub fn i64_ne(self, rhs: Self) -> Self {
        self.execute_binary::<i64, bool>(rhs, op!(!=))
    }

    pub fn i32_lt_s(self, rhs: Self) -> Self {
        self.execute_binary::<i32, bool>(rhs, op!(<))
    }

    pub fn i64_lt_s(self, rhs: Self) -> Self {
        self.execute_binary::<i64, bool>(rhs, op!(<))
    }

    pub fn i32_lt_u(self, rhs: Self) -> Self {
        self.execute_binary::<u32, bool>(rhs, op!(<))
    }

    pub fn i64_lt_u(self, rhs: Self) -> Self {
        self.execute_binary::<u64, bool>(rhs, op!(<))
    }

    pub fn i32_gt_s(self, rhs: Self) -> Self {
        self.execute_binary::<i32, bool>(rhs, op!(>))
    }

    pub fn i64_gt_s(self, rhs: Self) -> Self {
        self.execute_binary::<i64, bool>(rhs, op!(>))
    }

    pub fn i32_gt_u(self, rhs: Self) -> Self {
        self.execute_binary::<u32, bool>(rhs, op!(>))
    }

    pub fn i64_gt_u(self, rhs: Self) -> Self {
        self.execute_binary::<u64, bool>(rhs, op!(>))
    }

    pub fn i32_le_s(self, rhs: Self) -> Self {
        self.execute_binary::<i32, bool>(rhs, op!(<=))
    }

    pub fn i64_le_s(self, rhs: Self) -> Self {
        self.execute_binary::<i64, bool>(rhs, op!(<=))
    }

    pub fn i32_le_u(self, rhs: Self) -> Self {
        self.execute_binary::<u32, bool>(rhs, op!(<=))
    }

    pub fn i64_le_u(self, rhs: Self) -> Self {
        self.execute_binary::<u64, bool>(rhs, op!(<=))
    }

    pub fn i32_ge_s(self, rhs: Self) -> Self {
        self.execute_binary::<i32, bool>(rhs, op!(>=))
    }

    pub fn i64_ge_s(self, rhs: Self) -> Self {
        self.execute_binary::<i64, bool>(rhs, op!(>=))
    }

    pub fn i32_ge_u(self, rhs: Self) -> Self {
        self.execute_binary::<u32, bool>(rhs, op!(>=))
    }

    pub fn i64_ge_u(self, rhs: Self) -> Self {
        self.execute_binary::<u64, bool>(rhs, op!(>=))
    }

    // Float comparisons.

    pub fn f32_eq(self, rhs: Self) -> Self {
        self.execute_binary::<F32, bool>(rhs, op!(==))
    }

    pub fn f64_eq(self, rhs: Self) -> Self {
        self.execute_binary::<F64, bool>(rhs, op!(==))
    }

    pub fn f32_ne(self, rhs: Self) -> Self {
        self.execute_binary::<F32, bool>(rhs, op!(!=))
    }

    pub fn f64_ne(self, rhs: Self) -> Self {
        self.execute_binary::<F64, bool>(rhs, op!(!=))
    }

    pub fn f32_lt(self, rhs: Self) -> Self {
        self.execute_binary::<F32, bool>(rhs, op!(<))
    }

    pub fn f64_lt(self, rhs: Self) -> Self {
        self.execute_binary::<F64, bool>(rhs, op!(<))
    }

    pub fn f32_gt(self, rhs: Self) -> Self {
        self.execute_binary::<F32, bool>(rhs, op!(>))
    }

    pub fn f64_gt(self, rhs: Self) -> Self {
        self.execute_binary::<F64, bool>(rhs, op!(>))
    }

    pub fn f32_le(self, rhs: Self) -> Self {
        self.execute_binary::<F32, bool>(rhs, op!(<=))
    }

    pub fn f64_le(self, rhs: Self) -> Self {
        self.execute_binary::<F64, bool>(rhs, op!(<=))
    }

    pub fn f32_ge(self, rhs: Self) -> Self {
        self.execute_binary::<F32, bool>(rhs, op!(>=))
    }

    pub fn f64_ge(self, rhs: Self) -> Self {
        self.execute_binary::<F64, bool>(rhs, op!(>=))
    }

    // Integer bit counting.

    pub fn i32_clz(self) -> Self {
        self.execute_unary(<i32 as Integer<i32>>::leading_zeros)
    }

    pub fn i64_clz(self) -> Self {
        self.execute_unary(<i64 as Integer<i64>>::leading_zeros)
    }

    pub fn i32_ctz(self) -> Self {
        self.execute_unary(<i32 as Integer<i32>>::trailing_zeros)
    }

    pub fn i64_ctz(self) -> Self {
        self.execute_unary(<i64 as Integer<i64>>::trailing_zeros)
    }

    pub fn i32_popcnt(self) -> Self {
        self.execute_unary(<i32 as Integer<i32>>::count_ones)
    }

    pub fn i64_popcnt(self) -> Self {
        self.execute_unary(<i64 as Integer<i64>>::count_ones)
    }

    // Integer arithmetic.

    pub fn i32_add(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i32 as ArithmeticOps<i32>>::add)
    }

    pub fn i64_add(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i64 as ArithmeticOps<i64>>::add)
    }

    pub fn i32_sub(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i32 as ArithmeticOps<i32>>::sub)
    }

    pub fn i64_sub(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i64 as ArithmeticOps<i64>>::sub)
    }

    pub fn i32_mul(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i32 as ArithmeticOps<i32>>::mul)
    }

    pub fn i64_mul(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i64 as ArithmeticOps<i64>>::mul)
    }

    pub fn i32_div_s(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <i32 as ArithmeticOps<i32>>::div)
    }

    pub fn i64_div_s(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <i64 as ArithmeticOps<i64>>::div)
    }

    pub fn i32_div_u(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <u32 as ArithmeticOps<u32>>::div)
    }

    pub fn i64_div_u(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <u64 as ArithmeticOps<u64>>::div)
    }

    pub fn i32_rem_s(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <i32 as Integer<i32>>::rem)
    }

    pub fn i64_rem_s(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <i64 as Integer<i64>>::rem)
    }

    pub fn i32_rem_u(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <u32 as Integer<u32>>::rem)
    }

    pub fn i64_rem_u(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <u64 as Integer<u64>>::rem)
    }

    // Integer bitwise operations.

    pub fn i32_and(self, rhs: Self) -> Self {
        self.execute_binary::<i32, _>(rhs, op!(&))
    }

    pub fn i64_and(self, rhs: Self) -> Self {
        self.execute_binary::<i64, _>(rhs, op!(&))
    }

    pub fn i32_or(self, rhs: Self) -> Self {
        self.execute_binary::<i32, _>(rhs, op!(|))
    }

    pub fn i64_or(self, rhs: Self) -> Self {
        self.execute_binary::<i64, _>(rhs, op!(|))
    }

    pub fn i32_xor(self, rhs: Self) -> Self {
        self.execute_binary::<i32, _>(rhs, op!(^))
    }

    pub fn i64_xor(self, rhs: Self) -> Self {
        self.execute_binary::<i64, _>(rhs, op!(^))
    }

    // Shifts and rotates mask the count to the operand width.

    pub fn i32_shl(self, rhs: Self) -> Self {
        self.execute_binary::<i32, _>(rhs, |lhs, rhs| lhs.shl(rhs & 0x1F))
    }

    pub fn i64_shl(self, rhs: Self) -> Self {
        self.execute_binary::<i64, _>(rhs, |lhs, rhs| lhs.shl(rhs & 0x3F))
    }

    pub fn i32_shr_s(self, rhs: Self) -> Self {
        self.execute_binary::<i32, _>(rhs, |lhs, rhs| lhs.shr(rhs & 0x1F))
    }

    pub fn i64_shr_s(self, rhs: Self) -> Self {
        self.execute_binary::<i64, _>(rhs, |lhs, rhs| lhs.shr(rhs & 0x3F))
    }

    pub fn i32_shr_u(self, rhs: Self) -> Self {
        self.execute_binary::<u32, _>(rhs, |lhs, rhs| lhs.shr(rhs & 0x1F))
    }

    pub fn i64_shr_u(self, rhs: Self) -> Self {
        self.execute_binary::<u64, _>(rhs, |lhs, rhs| lhs.shr(rhs & 0x3F))
    }

    pub fn i32_rotl(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i32 as Integer<i32>>::rotl)
    }

    pub fn i64_rotl(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i64 as Integer<i64>>::rotl)
    }

    pub fn i32_rotr(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i32 as Integer<i32>>::rotr)
    }

    pub fn i64_rotr(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <i64 as Integer<i64>>::rotr)
    }

    // Float unary operations.

    pub fn f32_abs(self) -> Self {
        self.execute_unary(<F32 as Float<F32>>::abs)
    }

    pub fn f64_abs(self) -> Self {
        self.execute_unary(<F64 as Float<F64>>::abs)
    }

    pub fn f32_neg(self) -> Self {
        self.execute_unary(<F32 as Neg>::neg)
    }

    pub fn f64_neg(self) -> Self {
        self.execute_unary(<F64 as Neg>::neg)
    }

    pub fn f32_ceil(self) -> Self {
        self.execute_unary(<F32 as Float<F32>>::ceil)
    }

    pub fn f64_ceil(self) -> Self {
        self.execute_unary(<F64 as Float<F64>>::ceil)
    }

    pub fn f32_floor(self) -> Self {
        self.execute_unary(<F32 as Float<F32>>::floor)
    }

    pub fn f64_floor(self) -> Self {
        self.execute_unary(<F64 as Float<F64>>::floor)
    }

    pub fn f32_trunc(self) -> Self {
        self.execute_unary(<F32 as Float<F32>>::trunc)
    }

    pub fn f64_trunc(self) -> Self {
        self.execute_unary(<F64 as Float<F64>>::trunc)
    }

    pub fn f32_nearest(self) -> Self {
        self.execute_unary(<F32 as Float<F32>>::nearest)
    }

    pub fn f64_nearest(self) -> Self {
        self.execute_unary(<F64 as Float<F64>>::nearest)
    }

    pub fn f32_sqrt(self) -> Self {
        self.execute_unary(<F32 as Float<F32>>::sqrt)
    }

    pub fn f64_sqrt(self) -> Self {
        self.execute_unary(<F64 as Float<F64>>::sqrt)
    }

    // Float binary operations.

    pub fn f32_add(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F32 as ArithmeticOps<F32>>::add)
    }

    pub fn f64_add(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F64 as ArithmeticOps<F64>>::add)
    }

    pub fn f32_sub(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F32 as ArithmeticOps<F32>>::sub)
    }

    pub fn f64_sub(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F64 as ArithmeticOps<F64>>::sub)
    }

    pub fn f32_mul(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F32 as ArithmeticOps<F32>>::mul)
    }

    pub fn f64_mul(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F64 as ArithmeticOps<F64>>::mul)
    }

    pub fn f32_div(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <F32 as ArithmeticOps<F32>>::div)
    }

    pub fn f64_div(self, rhs: Self) -> Result<Self, TrapCode> {
        self.try_execute_binary(rhs, <F64 as ArithmeticOps<F64>>::div)
    }

    pub fn f32_min(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F32 as Float<F32>>::min)
    }

    pub fn f64_min(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F64 as Float<F64>>::min)
    }

    pub fn f32_max(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F32 as Float<F32>>::max)
    }

    pub fn f64_max(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F64 as Float<F64>>::max)
    }

    pub fn f32_copysign(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F32 as Float<F32>>::copysign)
    }

    pub fn f64_copysign(self, rhs: Self) -> Self {
        self.execute_binary(rhs, <F64 as Float<F64>>::copysign)
    }

    // Conversions.

    pub fn i32_wrap_i64(self) -> Self {
        self.execute_unary(<i64 as WrapInto<i32>>::wrap_into)
    }

    pub fn i32_trunc_f32_s(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F32 as TryTruncateInto<i32, TrapCode>>::try_truncate_into)
    }

    pub fn i32_trunc_f32_u(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F32 as TryTruncateInto<u32, TrapCode>>::try_truncate_into)
    }

    pub fn i32_trunc_f64_s(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F64 as TryTruncateInto<i32, TrapCode>>::try_truncate_into)
    }

    pub fn i32_trunc_f64_u(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F64 as TryTruncateInto<u32, TrapCode>>::try_truncate_into)
    }

    pub fn i64_extend_i32_s(self) -> Self {
        self.execute_unary(<i32 as ExtendInto<i64>>::extend_into)
    }

    pub fn i64_extend_i32_u(self) -> Self {
        self.execute_unary(<u32 as ExtendInto<i64>>::extend_into)
    }

    pub fn i64_trunc_f32_s(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F32 as TryTruncateInto<i64, TrapCode>>::try_truncate_into)
    }

    pub fn i64_trunc_f32_u(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F32 as TryTruncateInto<u64, TrapCode>>::try_truncate_into)
    }

    pub fn i64_trunc_f64_s(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F64 as TryTruncateInto<i64, TrapCode>>::try_truncate_into)
    }

    pub fn i64_trunc_f64_u(self) -> Result<Self, TrapCode> {
        self.try_execute_unary(<F64 as TryTruncateInto<u64, TrapCode>>::try_truncate_into)
    }

    pub fn f32_convert_i32_s(self) -> Self {
        self.execute_unary(<i32 as ExtendInto<F32>>::extend_into)
    }

    pub fn f32_convert_i32_u(self) -> Self {
        self.execute_unary(<u32 as ExtendInto<F32>>::extend_into)
    }

    pub fn f32_convert_i64_s(self) -> Self {
        self.execute_unary(<i64 as WrapInto<F32>>::wrap_into)
    }

    pub fn f32_convert_i64_u(self) -> Self {
        self.execute_unary(<u64 as WrapInto<F32>>::wrap_into)
    }

    pub fn f32_demote_f64(self) -> Self {
        self.execute_unary(<F64 as WrapInto<F32>>::wrap_into)
    }

    pub fn f64_convert_i32_s(self) -> Self {
        self.execute_unary(<i32 as ExtendInto<F64>>::extend_into)
    }

    pub fn f64_convert_i32_u(self) -> Self {
        self.execute_unary(<u32 as ExtendInto<F64>>::extend_into)
    }

    pub fn f64_convert_i64_s(self) -> Self {
        self.execute_unary(<i64 as ExtendInto<F64>>::extend_into)
    }

    pub fn f64_convert_i64_u(self) -> Self {
        self.execute_unary(<u64 as ExtendInto<F64>>::extend_into)
    }

    pub fn f64_promote_f32(self) -> Self {
        self.execute_unary(<F32 as ExtendInto<F64>>::extend_into)
    }

    /// Normalizes the slot for a 32-bit reinterpret cast.
    ///
    /// Integer slots are stored sign-extended while float slots are stored
    /// zero-extended, so the upper half is cleared when the bits change
    /// interpretation. 64-bit reinterpret casts are pure no-ops.
    pub fn reinterpret32(self) -> Self {
        Self {
            bits: self.bits & 0xFFFF_FFFF,
        }
    }
}
